//! Named cooperative workers: one OS thread per worker, a monoio runtime
//! driving a FIFO task queue, and optional timers.
//!
//! Grounded in the teacher's `worker_service_lifecycle` module: one thread
//! per worker, spawned and joined through a directive channel
//! (`futures_channel::mpsc`), with a oneshot used to signal shutdown exactly
//! like `worker_fleet_orchestrator::spawn_workers_inner` /
//! `worker_service_lifecycle::serve`'s cancellation future.

use std::{
    cell::Cell,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use futures_channel::{
    mpsc,
    oneshot::{self, Sender as OSender},
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::id::Id;

type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static CURRENT_WORKER: Cell<Option<usize>> = const { Cell::new(None) };
}

static NEXT_WORKER_SEQ: AtomicUsize = AtomicUsize::new(1);

/// A live worker: an OS thread, its task sender, and a handle to stop it.
pub struct Worker {
    handle: WorkerHandle,
    join: Option<JoinHandle<()>>,
    stop: Option<OSender<()>>,
}

/// A cheap, cloneable handle used to post tasks onto a worker.
#[derive(Clone)]
pub struct WorkerHandle {
    id: Id,
    seq: usize,
    name: Arc<str>,
    sender: mpsc::Sender<Task>,
}

/// A handle to a posted task's eventual result. `wait` blocks the calling
/// thread; this is the "coroutine-like API" design note's `future<void>`
/// equivalent, without introducing language-level suspension into the core.
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
    worker_seq: usize,
}

impl<T> TaskHandle<T> {
    /// Blocks the caller until the task completes. Calling this from the
    /// same worker the task was posted to is a programming error (it would
    /// deadlock the worker against itself) and is detected and reported
    /// rather than silently hanging.
    pub fn wait(self) -> Option<T> {
        if CURRENT_WORKER.with(|c| c.get()) == Some(self.worker_seq) {
            tracing::error!(
                "fatal: awaited a worker's own future from within that worker; this deadlocks"
            );
            return None;
        }
        pollster::block_on(self.rx).ok()
    }
}

impl Worker {
    pub fn handle(&self) -> &WorkerHandle {
        &self.handle
    }

    /// Stops the worker by closing its task queue (the "sentinel task" from
    /// the spec) and joins its thread.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.handle.sender.close_channel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.join() {
                warn!("worker `{}` thread panicked: {e:?}", self.handle.name);
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl WorkerHandle {
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if called from the thread that runs this worker's queue.
    pub fn is_current(&self) -> bool {
        CURRENT_WORKER.with(|c| c.get()) == Some(self.seq)
    }

    /// Posts `f` onto the worker's queue, always asynchronously queuing (even
    /// from the worker's own thread). Returns a handle to the eventual
    /// result.
    pub fn post<T, F>(&self, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut sender = self.sender.clone();
        let task: Task = Box::new(move || {
            let result = f();
            let _ = tx.send(result);
        });
        // futures_channel::mpsc requires an async send; block on it since
        // the bounded queue only backs up if the worker is wedged, which is
        // already a fatal condition for that worker.
        if pollster::block_on(sender.send(task)).is_err() {
            warn!("worker `{}` queue closed, task dropped", self.name);
        }
        TaskHandle {
            rx,
            worker_seq: self.seq,
        }
    }

    /// Direct dispatch when already on this worker's thread; otherwise
    /// behaves exactly like [`Self::post`].
    pub fn post_task<T, F>(&self, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_current() {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(f());
            return TaskHandle {
                rx,
                worker_seq: self.seq,
            };
        }
        self.post(f)
    }

    pub fn create_timer(&self) -> Timer {
        Timer::new(self.clone())
    }
}

/// A timer owned by a worker: while running, posts its function to the
/// owning worker at approximately the requested cadence. Exactly one task
/// per tick, never a catch-up burst after a long delay.
pub struct Timer {
    worker: WorkerHandle,
    duration: Duration,
    one_shot: bool,
    function: Option<Arc<dyn Fn() + Send + Sync + 'static>>,
    running: Arc<AtomicBool>,
}

impl Timer {
    fn new(worker: WorkerHandle) -> Self {
        Self {
            worker,
            duration: Duration::from_secs(1),
            one_shot: false,
            function: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_duration(&mut self, duration: Duration) -> &mut Self {
        self.duration = duration;
        self
    }

    pub fn set_function(&mut self, f: impl Fn() + Send + Sync + 'static) -> &mut Self {
        self.function = Some(Arc::new(f));
        self
    }

    pub fn set_one_shot(&mut self, one_shot: bool) -> &mut Self {
        self.one_shot = one_shot;
        self
    }

    pub fn start(&mut self) {
        let Some(function) = self.function.clone() else {
            warn!("timer started with no function set; ignoring");
            return;
        };
        if self.running.swap(true, Ordering::SeqCst) {
            return; // already running
        }
        let duration = self.duration;
        let one_shot = self.one_shot;
        let running = self.running.clone();
        // The ticking loop runs as an ordinary posted task that re-posts
        // itself after sleeping, so each tick is a single task on the
        // worker's own queue like any other.
        fn schedule(worker: WorkerHandle, duration: Duration, one_shot: bool, running: Arc<AtomicBool>, function: Arc<dyn Fn() + Send + Sync + 'static>) {
            let w = worker.clone();
            worker.post(move || {
                if !running.load(Ordering::SeqCst) {
                    return;
                }
                pollster::block_on(monoio::time::sleep(duration));
                if !running.load(Ordering::SeqCst) {
                    return;
                }
                function();
                if !one_shot {
                    schedule(w, duration, one_shot, running, function);
                } else {
                    running.store(false, Ordering::SeqCst);
                }
            });
        }
        schedule(self.worker.clone(), duration, one_shot, running, function);
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Creates named workers. A pool does not own the workers it creates; the
/// caller (typically the runtime or configuration engine) does.
#[derive(Default)]
pub struct WorkerPool {
    next_anon: AtomicUsize,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a new OS thread running a single-threaded monoio runtime,
    /// draining its task queue in FIFO order until stopped.
    pub fn make(&self, name: impl Into<Arc<str>>) -> Worker {
        let name: Arc<str> = name.into();
        let id = Id::new(format!("worker:{name}"));
        let seq = NEXT_WORKER_SEQ.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel::<Task>(1024);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let thread_name = name.clone();
        let join = std::thread::Builder::new()
            .name(format!("sight-worker-{thread_name}"))
            .spawn(move || {
                CURRENT_WORKER.with(|c| c.set(Some(seq)));
                let mut rt = monoio::RuntimeBuilder::<monoio::FusionDriver>::new()
                    .enable_timer()
                    .build()
                    .expect("failed to build monoio runtime for worker");
                rt.block_on(run_queue(rx, stop_rx));
            })
            .expect("failed to spawn worker thread");

        Worker {
            handle: WorkerHandle {
                id,
                seq,
                name,
                sender: tx,
            },
            join: Some(join),
            stop: Some(stop_tx),
        }
    }

    /// Spawns an anonymous worker, e.g. for a default pool.
    pub fn make_anonymous(&self) -> Worker {
        let n = self.next_anon.fetch_add(1, Ordering::Relaxed);
        self.make(format!("anon-{n}"))
    }
}

async fn run_queue(mut rx: mpsc::Receiver<Task>, mut stop: oneshot::Receiver<()>) {
    loop {
        monoio::select! {
            _ = &mut stop => {
                debug!("worker received stop signal");
                break;
            }
            task = rx.next() => {
                match task {
                    Some(task) => task(),
                    None => {
                        debug!("worker queue closed");
                        break;
                    }
                }
            }
        }
    }
}
