//! The signal/slot bus: typed multicast signals, worker-pinned slots,
//! connections with blockers, synchronous and asynchronous emission.
//!
//! Grounded in the teacher's directive/result plumbing style
//! (`worker_service_lifecycle`): connections are looked up under a lock,
//! copied out, and then invoked without holding the lock, exactly as
//! `Signal::emit`'s contract requires ("the list is copied under the lock
//! and then iterated without the lock").

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::RwLock;

use crate::{
    id::Id,
    worker::{TaskHandle, WorkerHandle},
};

static NEXT_CONNECTION_SEQ: AtomicU64 = AtomicU64::new(1);

/// A typed entry point bound to a worker. Calling it directly runs it on the
/// caller's thread; posting queues it on its worker. A slot with no pinned
/// worker runs synchronously wherever it is invoked.
#[derive(Clone)]
pub struct Slot<Args> {
    worker: Option<WorkerHandle>,
    body: Arc<dyn Fn(Args) + Send + Sync>,
}

impl<Args: Send + 'static> Slot<Args> {
    pub fn new(body: impl Fn(Args) + Send + Sync + 'static) -> Self {
        Self {
            worker: None,
            body: Arc::new(body),
        }
    }

    pub fn pinned_to(worker: WorkerHandle, body: impl Fn(Args) + Send + Sync + 'static) -> Self {
        Self {
            worker: Some(worker),
            body: Arc::new(body),
        }
    }

    pub fn worker(&self) -> Option<&WorkerHandle> {
        self.worker.as_ref()
    }

    /// Runs the slot body on the caller's thread.
    pub fn call(&self, args: Args) {
        (self.body)(args);
    }

    /// Queues the slot body on its pinned worker; runs synchronously if
    /// there is none.
    pub fn post(&self, args: Args) -> Option<TaskHandle<()>> {
        match &self.worker {
            Some(w) => {
                let body = self.body.clone();
                Some(w.post(move || (body)(args)))
            }
            None => {
                (self.body)(args);
                None
            }
        }
    }
}

/// Scoped guard that suppresses a connection while it is alive. Blockers
/// nest: the connection fires only once every live blocker has been
/// dropped.
pub struct Blocker {
    count: Arc<AtomicUsize>,
}

impl Blocker {
    fn acquire(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self { count }
    }
}

impl Drop for Blocker {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ConnectionEntry<Args> {
    id: Id,
    slot: Slot<Args>,
    enabled: Arc<std::sync::atomic::AtomicBool>,
    block_count: Arc<AtomicUsize>,
}

impl<Args> Clone for ConnectionEntry<Args> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            slot: self.slot.clone(),
            enabled: self.enabled.clone(),
            block_count: self.block_count.clone(),
        }
    }
}

/// A typed multicast emitter. Holds the live connection list behind a lock
/// that is released before any slot runs.
pub struct Signal<Args> {
    connections: Arc<RwLock<Vec<ConnectionEntry<Args>>>>,
}

impl<Args> Default for Signal<Args> {
    fn default() -> Self {
        Self {
            connections: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl<Args: Clone + Send + 'static> Signal<Args> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, slot: Slot<Args>) -> ConnectionHandle<Args> {
        let id = Id::new(format!("conn-{}", NEXT_CONNECTION_SEQ.fetch_add(1, Ordering::Relaxed)));
        let entry = ConnectionEntry {
            id: id.clone(),
            slot,
            enabled: Arc::new(std::sync::atomic::AtomicBool::new(true)),
            block_count: Arc::new(AtomicUsize::new(0)),
        };
        let block_count = entry.block_count.clone();
        self.connections.write().push(entry);
        ConnectionHandle {
            id,
            connections: self.connections.clone(),
            block_count,
        }
    }

    pub fn disconnect(&self, id: &Id) {
        self.connections.write().retain(|c| &c.id != id);
    }

    pub fn disconnect_all(&self) {
        self.connections.write().clear();
    }

    pub fn num_connections(&self) -> usize {
        self.connections.read().len()
    }

    fn live_connections(&self) -> Vec<ConnectionEntry<Args>> {
        self.connections
            .read()
            .iter()
            .filter(|c| {
                c.enabled.load(Ordering::SeqCst) && c.block_count.load(Ordering::SeqCst) == 0
            })
            .cloned()
            .collect()
    }

    /// Invokes every enabled, unblocked connection synchronously on the
    /// caller's thread.
    pub fn emit(&self, args: Args) {
        for entry in self.live_connections() {
            entry.slot.call(args.clone());
        }
    }

    /// Posts one task per enabled, unblocked connection onto that
    /// connection's slot's worker (or runs synchronously if the slot has no
    /// worker).
    pub fn async_emit(&self, args: Args) {
        for entry in self.live_connections() {
            entry.slot.post(args.clone());
        }
    }
}

/// Owns a live signal-to-slot link. Dropping it disconnects.
pub struct ConnectionHandle<Args> {
    id: Id,
    connections: Arc<RwLock<Vec<ConnectionEntry<Args>>>>,
    block_count: Arc<AtomicUsize>,
}

impl<Args> ConnectionHandle<Args> {
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn block(&self) -> Blocker {
        Blocker::acquire(self.block_count.clone())
    }

    pub fn is_blocked(&self) -> bool {
        self.block_count.load(Ordering::SeqCst) > 0
    }
}

impl<Args> Drop for ConnectionHandle<Args> {
    fn drop(&mut self) {
        self.connections.write().retain(|c| c.id != self.id);
    }
}
