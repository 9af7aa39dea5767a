//! Concrete payload types used by this crate's services and validators, and
//! their registration into a [`TypeRegistry`].
//!
//! The runtime itself is payload-agnostic (any `Any + Send + Sync` value is
//! a valid [`Object`] payload); these are simply the data kinds the worked
//! scenarios in this crate's tests exercise: a bare integer (`"int"`) and a
//! minimal image stand-in carrying only the attributes a validator needs
//! (`"image"`).

use std::sync::Arc;

use sight_core::{Object, TypeRegistry};

/// A 3D image's size and spacing, without pixel data — enough to validate
/// that two images are compatible inputs to an activity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageStub {
    pub size: (u32, u32, u32),
    pub spacing: (f64, f64, f64),
}

impl Default for ImageStub {
    fn default() -> Self {
        Self {
            size: (0, 0, 0),
            spacing: (1.0, 1.0, 1.0),
        }
    }
}

impl ImageStub {
    pub fn new(size: (u32, u32, u32), spacing: (f64, f64, f64)) -> Self {
        Self { size, spacing }
    }
}

/// Registers the `int` and `image` type tags this crate's services and
/// validators expect to find in a [`TypeRegistry`].
pub fn register_builtin_types(types: &TypeRegistry) {
    types.register("int", None, Arc::new(|id| Arc::new(Object::new(id, "int", 0i64))), None);
    types.register(
        "image",
        None,
        Arc::new(|id| Arc::new(Object::new(id, "image", ImageStub::default()))),
        None,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use sight_core::Id;

    #[test]
    fn registers_int_and_image_constructible() {
        let types = TypeRegistry::new();
        register_builtin_types(&types);
        let int_obj = types.make("int", Id::new("a")).unwrap();
        assert_eq!(*int_obj.read::<i64>(), 0);
        let image_obj = types.make("image", Id::new("im")).unwrap();
        assert_eq!(*image_obj.read::<ImageStub>(), ImageStub::default());
    }
}
