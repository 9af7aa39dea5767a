//! The service factory registry: implementation tag → constructor, plus the
//! `is_a`-checked binding helper the configuration engine uses to attach
//! objects to ports without letting a mistyped object through.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::{
    error::{Result, RuntimeError},
    id::{Id, IdRegistry},
    object::Object,
    service::ServiceBase,
    type_registry::TypeRegistry,
    worker::WorkerHandle,
};

pub type ServiceCtor = Arc<dyn Fn(Id, WorkerHandle, Arc<IdRegistry>) -> Arc<dyn ServiceBase> + Send + Sync>;

struct Entry {
    /// `None` for a first-party implementation; `Some(module_id)` for one
    /// contributed by a dynamically-loaded module, so [`retract_module`]
    /// knows which entries to drop when that module is unloaded.
    owner: Option<String>,
    ctor: ServiceCtor,
}

#[derive(Default)]
pub struct FactoryRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, implementation_tag: impl Into<String>, ctor: ServiceCtor) {
        self.entries.write().insert(implementation_tag.into(), Entry { owner: None, ctor });
    }

    /// Like [`Self::register`], but tagged with the module that contributed
    /// it so [`Self::retract_module`] can remove it again on unload.
    pub fn register_for_module(&self, implementation_tag: impl Into<String>, module_id: impl Into<String>, ctor: ServiceCtor) {
        self.entries.write().insert(
            implementation_tag.into(),
            Entry { owner: Some(module_id.into()), ctor },
        );
    }

    /// Removes every implementation contributed by `module_id` (spec
    /// scenario S6: `make` must fail with `not_found` once a module that
    /// registered an implementation is unloaded).
    pub fn retract_module(&self, module_id: &str) {
        self.entries.write().retain(|_, entry| entry.owner.as_deref() != Some(module_id));
    }

    pub fn supports(&self, implementation_tag: &str) -> bool {
        self.entries.read().contains_key(implementation_tag)
    }

    pub fn make(&self, implementation_tag: &str, id: Id, worker: WorkerHandle, ids: Arc<IdRegistry>) -> Result<Arc<dyn ServiceBase>> {
        let ctor = self
            .entries
            .read()
            .get(implementation_tag)
            .map(|e| e.ctor.clone())
            .ok_or_else(|| {
                RuntimeError::ConfigurationInvalid(format!(
                    "no service implementation registered for `{implementation_tag}`"
                ))
            })?;
        Ok(ctor(id, worker, ids))
    }

    /// Binds `object` to `service`'s port `key`, rejecting the bind if the
    /// object's declared type is not compatible with the port's declared
    /// type per the type registry's `is_a`.
    pub fn bind_checked(
        &self,
        types: &TypeRegistry,
        service: &dyn ServiceBase,
        key: &str,
        object: Arc<Object>,
    ) -> Result<()> {
        let spec = service
            .ports()
            .iter()
            .find(|p| p.key == key)
            .ok_or_else(|| RuntimeError::ConfigurationInvalid(format!("unknown port `{key}`")))?;
        if !types.is_a(object.type_tag(), spec.type_tag) {
            return Err(RuntimeError::type_mismatch(spec.type_tag, object.type_tag()));
        }
        service.bind_port(key, object)
    }

    /// Like [`Self::bind_checked`] but for an indexed slot of a group port.
    pub fn bind_group_checked(
        &self,
        types: &TypeRegistry,
        service: &dyn ServiceBase,
        key: &str,
        index: usize,
        object: Arc<Object>,
    ) -> Result<()> {
        let spec = service
            .ports()
            .iter()
            .find(|p| p.key == key)
            .ok_or_else(|| RuntimeError::ConfigurationInvalid(format!("unknown port `{key}`")))?;
        if !types.is_a(object.type_tag(), spec.type_tag) {
            return Err(RuntimeError::type_mismatch(spec.type_tag, object.type_tag()));
        }
        service.bind_group_port(key, index, object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        service::{Access, AutoConnectionSpec, PortAccess, PortSpec, ServiceCore, ServiceHooks},
        worker::WorkerPool,
    };

    struct Noop;
    const PORTS: &[PortSpec] = &[PortSpec::new("a", "int", Access::In)];
    impl ServiceHooks for Noop {
        fn ports(&self) -> &'static [PortSpec] {
            PORTS
        }
        fn auto_connections(&self) -> &'static [AutoConnectionSpec] {
            &[]
        }
        fn on_update(&self, _ports: &dyn PortAccess) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn bind_checked_rejects_incompatible_type() {
        let types = TypeRegistry::new();
        types.register("int", None, Arc::new(|id| Arc::new(Object::new(id, "int", 0i64))), None);
        types.register("string", None, Arc::new(|id| Arc::new(Object::new(id, "string", String::new()))), None);

        let pool = WorkerPool::new();
        let worker = pool.make("factory-test");
        let svc = ServiceCore::new(Id::new("svc"), "Noop", worker.handle().clone(), Arc::new(IdRegistry::new()), Noop);
        let factories = FactoryRegistry::new();

        let wrong = Arc::new(Object::new(Id::new("s"), "string", String::from("x")));
        assert!(factories.bind_checked(&types, svc.as_ref(), "a", wrong).is_err());

        let right = Arc::new(Object::new(Id::new("i"), "int", 1i64));
        assert!(factories.bind_checked(&types, svc.as_ref(), "a", right).is_ok());
    }

    #[test]
    fn make_fails_for_unregistered_implementation() {
        let factories = FactoryRegistry::new();
        let pool = WorkerPool::new();
        let worker = pool.make("factory-missing");
        assert!(factories
            .make("Nope", Id::new("x"), worker.handle().clone(), Arc::new(IdRegistry::new()))
            .is_err());
    }

    #[test]
    fn retract_module_removes_only_that_modules_entries() {
        let factories = FactoryRegistry::new();
        factories.register("Builtin", Arc::new(|id, worker, ids| ServiceCore::new(id, "Noop", worker, ids, Noop)));
        factories.register_for_module("FromModule", "sight.demo", Arc::new(|id, worker, ids| ServiceCore::new(id, "Noop", worker, ids, Noop)));
        assert!(factories.supports("Builtin"));
        assert!(factories.supports("FromModule"));

        factories.retract_module("sight.demo");
        assert!(factories.supports("Builtin"), "first-party registrations are never retracted");
        assert!(!factories.supports("FromModule"));
    }
}
