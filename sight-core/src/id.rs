//! Process-unique identifiers and the entity registry that resolves them.
//!
//! Mirrors the teacher's worker directive channels in spirit (a single
//! lock-guarded table, looked up by name) but here the table holds weak,
//! type-erased handles to whatever shares an ID: objects, services,
//! connections, workers.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Result, RuntimeError};

/// An opaque, process-unique identifier. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(Arc<str>);

impl Id {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::from(value.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

type AnyEntity = dyn Any + Send + Sync;

/// A process-wide (or per-`Runtime`, see `DESIGN.md`) map from [`Id`] to a
/// weak, type-erased handle. Binding a second entity under an existing ID
/// fails; lookups return a weak reference the caller upgrades.
#[derive(Default)]
pub struct IdRegistry {
    entries: Mutex<HashMap<Id, Weak<AnyEntity>>>,
}

impl IdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `id`, failing if it is already bound to a live entity.
    /// Stale (dropped) bindings are reclaimed automatically.
    pub fn reserve(&self, id: &Id) -> Result<()> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(id) {
            if existing.strong_count() > 0 {
                return Err(RuntimeError::ConfigurationInvalid(format!(
                    "id `{id}` already reserved"
                )));
            }
        }
        entries.insert(id.clone(), Weak::<AnyEntity>::new());
        Ok(())
    }

    /// Binds `id` to `entity`, replacing any previously reserved slot.
    pub fn bind<T: Send + Sync + 'static>(&self, id: &Id, entity: &Arc<T>) {
        let weak: Weak<AnyEntity> = Arc::downgrade(entity) as Weak<AnyEntity>;
        self.entries.lock().insert(id.clone(), weak);
    }

    pub fn unbind(&self, id: &Id) {
        self.entries.lock().remove(id);
    }

    pub fn exists(&self, id: &Id) -> bool {
        self.entries
            .lock()
            .get(id)
            .is_some_and(|w| w.strong_count() > 0)
    }

    /// Looks up `id` and upgrades it to a strong reference of type `T`.
    pub fn lookup<T: Send + Sync + 'static>(&self, id: &Id) -> Option<Arc<T>> {
        let weak = self.entries.lock().get(id)?.clone();
        let strong = weak.upgrade()?;
        strong.downcast::<T>().ok()
    }

    pub fn lookup_or_not_found<T: Send + Sync + 'static>(&self, id: &Id) -> Result<Arc<T>> {
        self.lookup(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no entity bound to id `{id}`")))
    }

    /// Generates an unused ID of the form `{prefix}-{uuid}`.
    pub fn generate_unique(&self, prefix: &str) -> Id {
        loop {
            let candidate = Id::new(format!("{prefix}-{}", Uuid::new_v4()));
            if !self.entries.lock().contains_key(&candidate) {
                return candidate;
            }
        }
    }
}
