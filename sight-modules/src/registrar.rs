//! The bundle of registries a plugin's entry point is handed so it can
//! publish its factories, activity descriptors, and validators without the
//! loader knowing anything about what's inside the module.

use sight_config::{ActivityDescriptor, ActivityRegistry, ActivityValidator, ObjectValidator, ValidatorRegistry};
use sight_core::{factory::ServiceCtor, type_registry::ObjectCtor, FactoryRegistry, TypeRegistry};
use std::sync::Arc;

pub struct ModuleRegistrar<'a> {
    /// The identifier of the module being registered (or unloaded), used to
    /// tag contributions so they can be retracted together.
    pub module_id: &'a str,
    pub types: &'a TypeRegistry,
    pub factories: &'a FactoryRegistry,
    pub activities: &'a ActivityRegistry,
    pub validators: &'a ValidatorRegistry,
}

impl<'a> ModuleRegistrar<'a> {
    pub fn register_type(&self, name: impl Into<String>, parent: Option<&str>, ctor: ObjectCtor) {
        self.types.register(name, parent, ctor, None);
    }

    pub fn register_service(&self, implementation_tag: impl Into<String>, ctor: ServiceCtor) {
        self.factories.register_for_module(implementation_tag, self.module_id, ctor);
    }

    pub fn register_activity(&self, descriptor: ActivityDescriptor) {
        self.activities.register_for_module(descriptor, self.module_id);
    }

    pub fn register_object_validator(&self, tag: impl Into<String>, validator: Arc<dyn ObjectValidator>) {
        self.validators.register_object_validator_for_module(tag, self.module_id, validator);
    }

    pub fn register_activity_validator(&self, tag: impl Into<String>, validator: Arc<dyn ActivityValidator>) {
        self.validators.register_activity_validator_for_module(tag, self.module_id, validator);
    }
}

/// Implemented by whatever a module's dynamic library exposes at its entry
/// point symbol; `register` runs once, when the loader starts the module.
pub trait ModulePlugin: Send + Sync {
    fn register(&self, registrar: &ModuleRegistrar<'_>);
}
