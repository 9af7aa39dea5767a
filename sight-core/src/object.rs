//! The shared-state unit services bind to: an ID, an immutable type tag, a
//! monotone modification stamp, a reader/writer-locked payload, a
//! named-field map of sibling references (by [`Id`], never by handle, so
//! object graphs cannot form reference cycles — see `DESIGN.md`), and a
//! `modified` signal.

use std::{
    any::Any,
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{error::RuntimeError, id::Id, signal::Signal};

/// An `Object`'s type-specific payload. Concrete data types (an integer
/// value, an image stub, ...) implement this so the runtime can construct
/// them generically from the type registry.
pub trait Payload: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Send + Sync> Payload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub struct Object {
    id: Id,
    type_tag: String,
    last_modified: AtomicU64,
    data: RwLock<Box<dyn Payload>>,
    fields: RwLock<HashMap<String, Id>>,
    pub modified: Signal<u64>,
}

impl Object {
    pub fn new(id: Id, type_tag: impl Into<String>, payload: impl Payload) -> Self {
        Self {
            id,
            type_tag: type_tag.into(),
            last_modified: AtomicU64::new(0),
            data: RwLock::new(Box::new(payload)),
            fields: RwLock::new(HashMap::new()),
            modified: Signal::new(),
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn last_modified(&self) -> u64 {
        self.last_modified.load(Ordering::SeqCst)
    }

    /// Acquires a shared lock and returns a read guard over the typed
    /// payload. Panics (a fatal programming error per spec §4.4) if the
    /// object does not actually hold a `T`.
    pub fn read<T: 'static>(&self) -> MappedRwLockReadGuard<'_, T> {
        RwLockReadGuard::map(self.data.read(), |b| {
            b.as_any()
                .downcast_ref::<T>()
                .expect("object payload type mismatch: programming error, should be caught at bind time")
        })
    }

    pub fn try_read<T: 'static>(&self) -> Result<MappedRwLockReadGuard<'_, T>, RuntimeError> {
        if self.data.read().as_any().downcast_ref::<T>().is_none() {
            return Err(RuntimeError::type_mismatch(
                std::any::type_name::<T>(),
                &self.type_tag,
            ));
        }
        Ok(self.read())
    }

    /// Acquires an exclusive lock. Bumping the modification stamp and
    /// emitting `modified` happens when the returned guard is dropped, after
    /// the lock itself has been released, so handlers reacting to
    /// `modified` can safely re-acquire a read lock.
    pub fn write<T: 'static>(&self) -> ObjectWriteGuard<'_, T> {
        let guard = RwLockWriteGuard::map(self.data.write(), |b| {
            b.as_any_mut()
                .downcast_mut::<T>()
                .expect("object payload type mismatch: programming error, should be caught at bind time")
        });
        ObjectWriteGuard {
            object: self,
            guard: Some(guard),
        }
    }

    /// Bumps the modification stamp and emits `modified` without touching
    /// the payload; used by services that mutate external resources (files,
    /// GPU buffers) the lock does not cover.
    ///
    /// Uses `async_emit` rather than `emit`: connections are typically
    /// auto-connections pinned to the consuming service's own worker, and
    /// routing through that worker (rather than running inline on whichever
    /// thread happened to perform the write) is what keeps "every slot
    /// invocation runs on a worker thread" true regardless of which worker
    /// touched the object.
    pub fn touch(&self) -> u64 {
        let stamp = self.last_modified.fetch_add(1, Ordering::SeqCst) + 1;
        self.modified.async_emit(stamp);
        stamp
    }

    pub fn set_field(&self, key: impl Into<String>, target: Id) {
        self.fields.write().insert(key.into(), target);
    }

    pub fn field(&self, key: &str) -> Option<Id> {
        self.fields.read().get(key).cloned()
    }

    pub fn remove_field(&self, key: &str) {
        self.fields.write().remove(key);
    }
}

pub struct ObjectWriteGuard<'a, T> {
    object: &'a Object,
    guard: Option<MappedRwLockWriteGuard<'a, T>>,
}

impl<T> std::ops::Deref for ObjectWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.guard.as_ref().expect("guard taken")
    }
}

impl<T> std::ops::DerefMut for ObjectWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().expect("guard taken")
    }
}

impl<T> Drop for ObjectWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.guard.take();
        self.object.touch();
    }
}
