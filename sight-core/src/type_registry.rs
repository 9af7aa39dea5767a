//! The RTTI-like class-name table: a stable name for every polymorphic
//! object type, mapped to a constructor, an optional parent type name, and
//! an optional serializer. `is_a` walks the parent chain; `make` is how the
//! configuration engine turns an `<object type="...">` tag into a live
//! [`Object`].

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::{
    error::{Result, RuntimeError},
    id::Id,
    object::Object,
};

pub type ObjectCtor = Arc<dyn Fn(Id) -> Arc<Object> + Send + Sync>;
pub type Serializer = Arc<dyn Fn(&Object) -> String + Send + Sync>;

struct TypeEntry {
    ctor: ObjectCtor,
    parent: Option<String>,
    serializer: Option<Serializer>,
}

#[derive(Default)]
pub struct TypeRegistry {
    entries: RwLock<HashMap<String, TypeEntry>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        parent: Option<&str>,
        ctor: ObjectCtor,
        serializer: Option<Serializer>,
    ) {
        self.entries.write().insert(
            name.into(),
            TypeEntry {
                ctor,
                parent: parent.map(str::to_owned),
                serializer,
            },
        );
    }

    /// Constructs a fresh object of type `name` bound to `id`.
    pub fn make(&self, name: &str, id: Id) -> Result<Arc<Object>> {
        let entries = self.entries.read();
        let entry = entries
            .get(name)
            .ok_or_else(|| RuntimeError::ConfigurationInvalid(format!("unknown type `{name}`")))?;
        Ok((entry.ctor)(id))
    }

    pub fn serialize(&self, name: &str, object: &Object) -> Option<String> {
        self.entries
            .read()
            .get(name)
            .and_then(|e| e.serializer.as_ref())
            .map(|s| s(object))
    }

    /// Walks the parent chain of `name` looking for `ancestor`. A type is
    /// always assignable from itself.
    pub fn is_a(&self, name: &str, ancestor: &str) -> bool {
        if name == ancestor {
            return true;
        }
        let entries = self.entries.read();
        let mut current = name.to_owned();
        // Bound the walk so a misconfigured cyclic parent chain cannot spin
        // forever; the hierarchy is expected to be shallow in practice.
        for _ in 0..entries.len().max(1) {
            match entries.get(&current).and_then(|e| e.parent.clone()) {
                Some(parent) if parent == ancestor => return true,
                Some(parent) => current = parent,
                None => return false,
            }
        }
        false
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_a_walks_parent_chain() {
        let reg = TypeRegistry::new();
        reg.register("base", None, Arc::new(|id| Arc::new(Object::new(id, "base", 0i64))), None);
        reg.register(
            "mid",
            Some("base"),
            Arc::new(|id| Arc::new(Object::new(id, "mid", 0i64))),
            None,
        );
        reg.register(
            "leaf",
            Some("mid"),
            Arc::new(|id| Arc::new(Object::new(id, "leaf", 0i64))),
            None,
        );
        assert!(reg.is_a("leaf", "base"));
        assert!(reg.is_a("leaf", "mid"));
        assert!(reg.is_a("leaf", "leaf"));
        assert!(!reg.is_a("base", "leaf"));
        assert!(!reg.is_a("mid", "other"));
    }

    #[test]
    fn make_fails_for_unknown_type() {
        let reg = TypeRegistry::new();
        assert!(reg.make("nope", Id::new("x")).is_err());
    }

    #[test]
    fn make_constructs_registered_type() {
        let reg = TypeRegistry::new();
        reg.register(
            "int",
            None,
            Arc::new(|id| Arc::new(Object::new(id, "int", 0i64))),
            None,
        );
        let obj = reg.make("int", Id::new("a")).unwrap();
        assert_eq!(obj.type_tag(), "int");
    }
}
