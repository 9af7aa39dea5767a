//! Core runtime primitives for a component-based service application:
//! identifiers, the signal/slot bus, reference-counted data objects, the
//! class-name type registry, service lifecycle, and the worker pool that
//! everything above runs on.
//!
//! This crate has no notion of XML configuration or dynamic module loading;
//! those live in `sight-config` and `sight-modules` respectively, built on
//! top of the types exported here.

pub mod config_node;
pub mod error;
pub mod factory;
pub mod id;
pub mod notifier;
pub mod object;
pub mod service;
pub mod signal;
pub mod type_registry;
pub mod worker;

pub use config_node::ConfigNode;
pub use error::{AnyError, Result, RuntimeError};
pub use factory::FactoryRegistry;
pub use id::{Id, IdRegistry};
pub use object::{Object, ObjectWriteGuard, Payload};
pub use signal::{Blocker, ConnectionHandle, Signal, Slot};
pub use type_registry::TypeRegistry;
pub use worker::{Timer, Worker, WorkerHandle, WorkerPool};

use std::sync::Arc;

/// The process-local context a running application owns: the identifier
/// table, the class-name registry, the service-factory registry, and the
/// worker pool they all run on. Deliberately a plain struct rather than a
/// set of process-wide statics (see `DESIGN.md`), so an embedder can run
/// more than one isolated runtime, and so tests don't leak state across
/// each other.
pub struct Runtime {
    pub ids: Arc<IdRegistry>,
    pub types: TypeRegistry,
    pub factories: FactoryRegistry,
    pub workers: WorkerPool,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            ids: Arc::new(IdRegistry::new()),
            types: TypeRegistry::new(),
            factories: FactoryRegistry::new(),
            workers: WorkerPool::new(),
        }
    }
}

impl Runtime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}
