//! Module manifests and the dynamic-library plugin loader: discovering
//! modules on disk, loading their shared libraries, and publishing the
//! services, activities, and validators they contribute into a running
//! application's registries.

pub mod loader;
pub mod manifest;
pub mod registrar;

pub use loader::{ModuleLoader, ENTRY_POINT_SYMBOL};
pub use manifest::{ExtensionContributions, ModuleManifest};
pub use registrar::{ModulePlugin, ModuleRegistrar};
