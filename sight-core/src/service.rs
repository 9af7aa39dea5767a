//! The service lifecycle state machine: data ports, auto-connections, and
//! the STOPPED/STARTED cycle (`configure` → `start` → `update`* → `stop`).
//!
//! Split in two layers, mirroring the teacher's directive/result worker
//! lifecycle split between the thin `WorkerHandle` surface and the thread
//! that actually drains a queue:
//!
//! - [`ServiceHooks`] is what a concrete service (e.g. an adder) implements:
//!   its ports, its auto-connections, and what `configure`/`on_start`/
//!   `on_update`/`on_stop` actually do.
//! - [`ServiceCore`] wraps a `ServiceHooks` and supplies the generic
//!   bookkeeping every service needs regardless of kind: the state machine,
//!   port bindings, auto-connection wiring, and posting work onto the
//!   service's own worker. [`ServiceBase`] is the object-safe facade over
//!   `ServiceCore<H>` that the configuration engine and factory registry
//!   hold as `Arc<dyn ServiceBase>`.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::{
    config_node::ConfigNode,
    error::{Result, RuntimeError},
    id::{Id, IdRegistry},
    object::Object,
    signal::{Blocker, ConnectionHandle, Signal, Slot},
    worker::{TaskHandle, WorkerHandle},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Started,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    In,
    InOut,
    Out,
}

/// Static, per-service-class declaration of one data port.
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub key: &'static str,
    pub type_tag: &'static str,
    pub access: Access,
    pub optional: bool,
    pub group: bool,
}

impl PortSpec {
    pub const fn new(key: &'static str, type_tag: &'static str, access: Access) -> Self {
        Self {
            key,
            type_tag,
            access,
            optional: false,
            group: false,
        }
    }

    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub const fn group(mut self) -> Self {
        self.group = true;
        self
    }
}

/// The only signal every `Object` is generically known to carry. Concrete
/// payload types may expose richer signals of their own, but the
/// auto-connection mechanism below only wires this universal one.
pub const MODIFIED_SIGNAL: &str = "modified";

/// A declared `(port key, signal name, slot name)` triple, wired when the
/// service starts and torn down when it stops.
#[derive(Debug, Clone)]
pub struct AutoConnectionSpec {
    pub port_key: &'static str,
    pub signal_name: &'static str,
    pub slot_name: &'static str,
}

enum PortBinding {
    Single(Option<Arc<Object>>),
    Group(Vec<Arc<Object>>),
}

/// The behavior a concrete service kind supplies. Implementors are plain
/// structs; [`ServiceCore`] wraps one to get a full [`ServiceBase`].
pub trait ServiceHooks: Send + Sync + 'static {
    fn ports(&self) -> &'static [PortSpec];

    fn auto_connections(&self) -> &'static [AutoConnectionSpec] {
        &[]
    }

    fn configure(&self, _config: &ConfigNode) -> Result<()> {
        Ok(())
    }

    fn on_start(&self, _ports: &dyn PortAccess) -> Result<()> {
        Ok(())
    }

    /// Invoked once per `update`, and by an auto-connection whose target
    /// slot name is `"update"`. `ports` reads bound input/inout objects and
    /// blocks the hook's own auto-connections around a self-triggering
    /// write (spec scenario S2).
    fn on_update(&self, ports: &dyn PortAccess) -> Result<()>;

    fn on_stop(&self, _ports: &dyn PortAccess) -> Result<()> {
        Ok(())
    }
}

/// Generic lifecycle harness wrapping a [`ServiceHooks`] implementation.
pub struct ServiceCore<H: ServiceHooks> {
    id: Id,
    implementation_tag: &'static str,
    worker: WorkerHandle,
    ids: Arc<IdRegistry>,
    state: RwLock<ServiceState>,
    ports: RwLock<HashMap<&'static str, PortBinding>>,
    auto_conns: RwLock<Vec<(&'static str, ConnectionHandle<u64>)>>,
    pub failed: Signal<String>,
    hooks: H,
}

impl<H: ServiceHooks> ServiceCore<H> {
    pub fn new(id: Id, implementation_tag: &'static str, worker: WorkerHandle, ids: Arc<IdRegistry>, hooks: H) -> Arc<Self> {
        Arc::new(Self {
            id,
            implementation_tag,
            worker,
            ids,
            state: RwLock::new(ServiceState::Stopped),
            ports: RwLock::new(HashMap::new()),
            auto_conns: RwLock::new(Vec::new()),
            failed: Signal::new(),
            hooks,
        })
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    fn port_spec(&self, key: &str) -> Result<&'static PortSpec> {
        self.hooks
            .ports()
            .iter()
            .find(|p| p.key == key)
            .ok_or_else(|| RuntimeError::ConfigurationInvalid(format!("unknown port `{key}`")))
    }

    fn input(&self, key: &str) -> Option<Arc<Object>> {
        match self.ports.read().get(key) {
            Some(PortBinding::Single(obj)) => obj.clone(),
            _ => None,
        }
    }

    fn input_group(&self, key: &str) -> Vec<Arc<Object>> {
        match self.ports.read().get(key) {
            Some(PortBinding::Group(objs)) => objs.clone(),
            _ => Vec::new(),
        }
    }

    /// Fails with `LifecycleViolation` if any non-optional, non-group port is
    /// unbound. Called before a service is allowed to transition to
    /// `Started` (spec §3, §4.4): a mandatory port left unbound is a
    /// configuration mistake, not something `on_start`/`on_update` should
    /// have to guard against on every call.
    fn check_mandatory_ports_bound(&self) -> Result<()> {
        let ports = self.ports.read();
        for spec in self.hooks.ports() {
            if spec.optional || spec.group {
                continue;
            }
            if !matches!(ports.get(spec.key), Some(PortBinding::Single(Some(_)))) {
                return Err(RuntimeError::LifecycleViolation(format!(
                    "service `{}` cannot start: mandatory port `{}` is not bound",
                    self.id, spec.key
                )));
            }
        }
        Ok(())
    }

    /// The stable id a produced output is bound under: `{service id}:{port
    /// key}`. Stable across repeated `output` calls so a config-time
    /// `uid="..."` binding elsewhere keeps resolving to the same entity.
    fn uid_for(&self, key: &str) -> Id {
        Id::new(format!("{}:{key}", self.id))
    }

    /// Publishes `object` as the current value of output port `key` (spec
    /// §4.4's `output` operation). `object` must already be constructed with
    /// the id [`Self::uid_for`] returns for this key — `Object`'s id is
    /// fixed at construction, so there is nothing to rebind it to here.
    fn output(&self, key: &str, object: Arc<Object>) -> Result<()> {
        let spec = self.port_spec(key)?;
        if spec.access != Access::Out {
            return Err(RuntimeError::LifecycleViolation(format!(
                "port `{key}` on service `{}` is not an output port",
                self.id
            )));
        }
        let expected = self.uid_for(key);
        if *object.id() != expected {
            return Err(RuntimeError::LifecycleViolation(format!(
                "output for port `{key}` on service `{}` must be constructed with id `{expected}`, got `{}`",
                self.id,
                object.id()
            )));
        }
        self.ids.bind(&expected, &object);
        self.ports.write().insert(spec.key, PortBinding::Single(Some(object)));
        Ok(())
    }

    fn wire_auto_connections(self: &Arc<Self>) {
        let mut conns = self.auto_conns.write();
        for spec in self.hooks.auto_connections() {
            if spec.signal_name != MODIFIED_SIGNAL {
                tracing::warn!(
                    "service `{}`: auto-connection references unknown signal `{}`, skipping",
                    self.id,
                    spec.signal_name
                );
                continue;
            }
            let Some(object) = self.input(spec.port_key) else {
                // Only an optional port can still be unbound once `start` has
                // passed `check_mandatory_ports_bound`: nothing to wire.
                continue;
            };
            let this = self.clone();
            let slot_name = spec.slot_name;
            let worker = self.worker.clone();
            let handle = object.modified.connect(Slot::pinned_to(worker, move |_stamp| {
                let outcome = match slot_name {
                    "update" => this.hooks.on_update(this.as_ref()),
                    other => {
                        tracing::warn!("service `{}`: unknown auto-connection slot `{other}`", this.id);
                        Ok(())
                    }
                };
                if let Err(e) = outcome {
                    this.failed.emit(e.to_string());
                }
            }));
            conns.push((spec.port_key, handle));
        }
    }

    fn teardown_auto_connections(&self) {
        self.auto_conns.write().clear();
    }

    /// Blocks the auto-connection wired from `port_key`'s `modified` signal,
    /// for as long as the returned [`Blocker`] lives. A hook that writes to
    /// a port which is itself the source of an auto-connection back to this
    /// same service must hold this blocker across the write, or the write's
    /// own `modified` emission re-enters the hook (spec scenario S2).
    fn block_auto_connection(&self, port_key: &str) -> Option<Blocker> {
        self.auto_conns
            .read()
            .iter()
            .find(|(key, _)| *key == port_key)
            .map(|(_, handle)| handle.block())
    }
}

/// The object-safe contract the configuration engine and factory registry
/// hold as `Arc<dyn ServiceBase>`, regardless of which `ServiceHooks` a
/// concrete service wraps.
pub trait ServiceBase: Send + Sync {
    fn id(&self) -> &Id;
    fn implementation_tag(&self) -> &str;
    fn state(&self) -> ServiceState;
    fn worker(&self) -> &WorkerHandle;
    fn ports(&self) -> &'static [PortSpec];

    fn configure(&self, config: &ConfigNode) -> Result<()>;
    fn bind_port(&self, key: &str, object: Arc<Object>) -> Result<()>;
    fn bind_group_port(&self, key: &str, index: usize, object: Arc<Object>) -> Result<()>;
    fn unbind_port(&self, key: &str);

    fn start(self: Arc<Self>) -> TaskHandle<Result<()>>;
    fn update(self: Arc<Self>) -> TaskHandle<Result<()>>;
    fn stop(self: Arc<Self>) -> TaskHandle<Result<()>>;
}

impl<H: ServiceHooks> ServiceBase for ServiceCore<H> {
    fn id(&self) -> &Id {
        &self.id
    }

    fn implementation_tag(&self) -> &str {
        self.implementation_tag
    }

    fn state(&self) -> ServiceState {
        *self.state.read()
    }

    fn worker(&self) -> &WorkerHandle {
        &self.worker
    }

    fn ports(&self) -> &'static [PortSpec] {
        self.hooks.ports()
    }

    fn configure(&self, config: &ConfigNode) -> Result<()> {
        self.hooks.configure(config)
    }

    fn bind_port(&self, key: &str, object: Arc<Object>) -> Result<()> {
        let spec = self.port_spec(key)?;
        if spec.group {
            return Err(RuntimeError::ConfigurationInvalid(format!(
                "port `{key}` is a group port, use bind_group_port"
            )));
        }
        self.ports.write().insert(spec.key, PortBinding::Single(Some(object)));
        Ok(())
    }

    fn bind_group_port(&self, key: &str, index: usize, object: Arc<Object>) -> Result<()> {
        let spec = self.port_spec(key)?;
        if !spec.group {
            return Err(RuntimeError::ConfigurationInvalid(format!(
                "port `{key}` is not a group port"
            )));
        }
        let mut ports = self.ports.write();
        let entry = ports
            .entry(spec.key)
            .or_insert_with(|| PortBinding::Group(Vec::new()));
        if let PortBinding::Group(objs) = entry {
            if objs.len() <= index {
                objs.resize_with(index + 1, || object.clone());
            }
            objs[index] = object;
        }
        Ok(())
    }

    fn unbind_port(&self, key: &str) {
        self.ports.write().remove(key);
    }

    fn start(self: Arc<Self>) -> TaskHandle<Result<()>> {
        let worker = self.worker.clone();
        worker.post_task(move || {
            {
                let mut state = self.state.write();
                if *state != ServiceState::Stopped {
                    return Err(RuntimeError::LifecycleViolation(format!(
                        "service `{}` already started",
                        self.id
                    )));
                }
                self.check_mandatory_ports_bound()?;
                *state = ServiceState::Started;
            }
            let result = self.hooks.on_start(self.as_ref());
            if result.is_ok() {
                self.wire_auto_connections();
            } else {
                *self.state.write() = ServiceState::Stopped;
            }
            result
        })
    }

    fn update(self: Arc<Self>) -> TaskHandle<Result<()>> {
        let worker = self.worker.clone();
        worker.post_task(move || {
            if self.state() != ServiceState::Started {
                return Err(RuntimeError::LifecycleViolation(format!(
                    "service `{}` is not started",
                    self.id
                )));
            }
            self.hooks.on_update(self.as_ref())
        })
    }

    fn stop(self: Arc<Self>) -> TaskHandle<Result<()>> {
        let worker = self.worker.clone();
        worker.post_task(move || {
            {
                let mut state = self.state.write();
                if *state != ServiceState::Started {
                    return Err(RuntimeError::LifecycleViolation(format!(
                        "service `{}` already stopped",
                        self.id
                    )));
                }
                *state = ServiceState::Stopped;
            }
            self.teardown_auto_connections();
            self.hooks.on_stop(self.as_ref())
        })
    }
}

/// Convenience helpers concrete services call from inside `on_update`/etc,
/// exposed as a trait and handed to hooks as `&dyn PortAccess` so they can
/// reach their own ports without depending on `ServiceCore` directly.
pub trait PortAccess {
    fn input(&self, key: &str) -> Option<Arc<Object>>;
    fn input_group(&self, key: &str) -> Vec<Arc<Object>>;
    fn block_auto_connection(&self, port_key: &str) -> Option<Blocker>;
    /// The stable id an object produced for output port `key` must be
    /// constructed with, for use with [`Self::output`].
    fn uid_for(&self, key: &str) -> Id;
    /// Publishes `object` as the current value of output port `key`.
    fn output(&self, key: &str, object: Arc<Object>) -> Result<()>;
}

impl<H: ServiceHooks> PortAccess for ServiceCore<H> {
    fn input(&self, key: &str) -> Option<Arc<Object>> {
        ServiceCore::input(self, key)
    }

    fn input_group(&self, key: &str) -> Vec<Arc<Object>> {
        ServiceCore::input_group(self, key)
    }

    fn block_auto_connection(&self, port_key: &str) -> Option<Blocker> {
        ServiceCore::block_auto_connection(self, port_key)
    }

    fn uid_for(&self, key: &str) -> Id {
        ServiceCore::uid_for(self, key)
    }

    fn output(&self, key: &str, object: Arc<Object>) -> Result<()> {
        ServiceCore::output(self, key, object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerPool;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Adder {
        updates: Arc<AtomicU64>,
    }

    const PORTS: &[PortSpec] = &[
        PortSpec::new("a", "int", Access::In),
        PortSpec::new("b", "int", Access::InOut),
    ];
    const AUTO_CONNS: &[AutoConnectionSpec] = &[AutoConnectionSpec {
        port_key: "a",
        signal_name: MODIFIED_SIGNAL,
        slot_name: "update",
    }];

    impl ServiceHooks for Adder {
        fn ports(&self) -> &'static [PortSpec] {
            PORTS
        }

        fn auto_connections(&self) -> &'static [AutoConnectionSpec] {
            AUTO_CONNS
        }

        fn on_update(&self, _ports: &dyn PortAccess) -> Result<()> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn lifecycle_rejects_double_start_and_update_before_start() {
        let pool = WorkerPool::new();
        let worker = pool.make("svc-test");
        let updates = Arc::new(AtomicU64::new(0));
        let svc = ServiceCore::new(
            Id::new("svc-1"),
            "Adder",
            worker.handle().clone(),
            Arc::new(IdRegistry::new()),
            Adder { updates: updates.clone() },
        );

        assert!(svc.clone().update().wait().unwrap().is_err(), "update before start must fail");
        svc.bind_port("a", Arc::new(Object::new(Id::new("a"), "int", 0i64))).unwrap();
        svc.bind_port("b", Arc::new(Object::new(Id::new("b"), "int", 0i64))).unwrap();
        svc.clone().start().wait().unwrap().unwrap();
        assert!(svc.clone().start().wait().unwrap().is_err(), "double start must fail");
        svc.clone().update().wait().unwrap().unwrap();
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        svc.clone().stop().wait().unwrap().unwrap();
        assert!(svc.clone().stop().wait().unwrap().is_err(), "double stop must fail");
    }

    #[test]
    fn auto_connection_fires_update_on_input_modification() {
        let pool = WorkerPool::new();
        let worker = pool.make("svc-autoconn");
        let updates = Arc::new(AtomicU64::new(0));
        let svc = ServiceCore::new(
            Id::new("svc-2"),
            "Adder",
            worker.handle().clone(),
            Arc::new(IdRegistry::new()),
            Adder { updates: updates.clone() },
        );
        let a = Arc::new(Object::new(Id::new("a"), "int", 0i64));
        svc.bind_port("a", a.clone()).unwrap();
        svc.bind_port("b", Arc::new(Object::new(Id::new("b"), "int", 0i64))).unwrap();
        svc.clone().start().wait().unwrap().unwrap();

        *a.write::<i64>() = 1;
        // Synchronize with the worker: the auto-connection's slot is pinned
        // to the same worker, so a trailing no-op task drains it.
        worker.handle().post(|| ()).wait();
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        svc.clone().stop().wait().unwrap().unwrap();
        *a.write::<i64>() = 2;
        worker.handle().post(|| ()).wait();
        assert_eq!(updates.load(Ordering::SeqCst), 1, "stopped service must not react");
    }

    struct SelfWriting {
        updates: Arc<AtomicU64>,
    }

    const SELF_WRITING_PORTS: &[PortSpec] = &[PortSpec::new("b", "int", Access::InOut)];
    const SELF_WRITING_AUTO_CONNS: &[AutoConnectionSpec] = &[AutoConnectionSpec {
        port_key: "b",
        signal_name: MODIFIED_SIGNAL,
        slot_name: "update",
    }];

    impl ServiceHooks for SelfWriting {
        fn ports(&self) -> &'static [PortSpec] {
            SELF_WRITING_PORTS
        }

        fn auto_connections(&self) -> &'static [AutoConnectionSpec] {
            SELF_WRITING_AUTO_CONNS
        }

        fn on_update(&self, ports: &dyn PortAccess) -> Result<()> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            let b = ports.input("b").expect("b bound");
            let _guard = ports.block_auto_connection("b");
            *b.write::<i64>() = 0; // writes every call: without the blocker this re-enters forever
            Ok(())
        }
    }

    #[test]
    fn blocker_prevents_self_reentry_on_own_write() {
        let pool = WorkerPool::new();
        let worker = pool.make("svc-self-write");
        let updates = Arc::new(AtomicU64::new(0));
        let svc = ServiceCore::new(
            Id::new("svc-3"),
            "SelfWriting",
            worker.handle().clone(),
            Arc::new(IdRegistry::new()),
            SelfWriting { updates: updates.clone() },
        );
        let b = Arc::new(Object::new(Id::new("b"), "int", 0i64));
        svc.bind_port("b", b.clone()).unwrap();
        svc.clone().start().wait().unwrap().unwrap();

        svc.clone().update().wait().unwrap().unwrap();
        worker.handle().post(|| ()).wait();
        assert_eq!(updates.load(Ordering::SeqCst), 1, "blocked self-write must not re-enter update");
    }

    #[test]
    fn start_fails_when_mandatory_port_unbound() {
        let pool = WorkerPool::new();
        let worker = pool.make("svc-unbound");
        let updates = Arc::new(AtomicU64::new(0));
        let svc = ServiceCore::new(
            Id::new("svc-4"),
            "Adder",
            worker.handle().clone(),
            Arc::new(IdRegistry::new()),
            Adder { updates },
        );
        svc.bind_port("a", Arc::new(Object::new(Id::new("a"), "int", 0i64))).unwrap();
        // `b` left unbound: start must reject before ever reaching `on_start`.
        let err = svc.clone().start().wait().unwrap().unwrap_err();
        assert!(matches!(err, RuntimeError::LifecycleViolation(_)));
        assert_eq!(svc.state(), ServiceState::Stopped);
    }

    #[test]
    fn output_rejects_object_with_wrong_id_and_publishes_matching_one() {
        let pool = WorkerPool::new();
        let worker = pool.make("svc-output");
        let ids = Arc::new(IdRegistry::new());
        let svc = ServiceCore::new(
            Id::new("svc-5"),
            "Producer",
            worker.handle().clone(),
            ids.clone(),
            Producer,
        );

        let wrong = Arc::new(Object::new(Id::new("not-the-uid"), "int", 0i64));
        assert!(matches!(svc.output("out", wrong), Err(RuntimeError::LifecycleViolation(_))));

        let target = svc.uid_for("out");
        let produced = Arc::new(Object::new(target.clone(), "int", 42i64));
        svc.output("out", produced).unwrap();
        let bound = ids.lookup_or_not_found::<Object>(&target).unwrap();
        assert_eq!(*bound.read::<i64>(), 42);
    }

    struct Producer;
    const PRODUCER_PORTS: &[PortSpec] = &[PortSpec::new("out", "int", Access::Out)];
    impl ServiceHooks for Producer {
        fn ports(&self) -> &'static [PortSpec] {
            PRODUCER_PORTS
        }
        fn on_update(&self, _ports: &dyn PortAccess) -> Result<()> {
            Ok(())
        }
    }
}
