//! Dynamic-library plugin loading (spec §4.8): discovering module
//! directories under the configured search paths, loading each module's
//! shared library, running its entry point to publish factories, activity
//! descriptors, and validators, and resolving a module's own resources by
//! relative path.
//!
//! # Entry-point ABI
//!
//! A module ships a `cdylib` exporting one `extern "C"` symbol,
//! [`ENTRY_POINT_SYMBOL`], of type `unsafe extern "C" fn() -> *mut dyn
//! ModulePlugin`. The loader calls it once, reconstructs the `Box<dyn
//! ModulePlugin>` from the returned fat pointer, and keeps both the boxed
//! plugin and the `Library` it came from alive for as long as the module is
//! loaded — dropping the `Library` first would leave the plugin's vtable
//! pointing at unmapped memory.
//!
//! Returning a trait object across this boundary only works when host and
//! module were built with the same compiler version and the same layout of
//! `ModulePlugin`'s dependency types; this is the same constraint every
//! `libloading`-based Rust plugin system carries; there is no ABI-stable
//! alternative, short of a fully `extern "C"` surface.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use parking_lot::RwLock;
use sight_core::RuntimeError;
use tracing::{info, warn};

use crate::{
    manifest::ModuleManifest,
    registrar::{ModulePlugin, ModuleRegistrar},
};

pub const ENTRY_POINT_SYMBOL: &[u8] = b"_sight_module_entry_point\0";

type EntryPointFn = unsafe extern "C" fn() -> *mut dyn ModulePlugin;

struct LoadedModule {
    manifest: ModuleManifest,
    // Order matters: `plugin` borrows code from `library`, so it must be
    // dropped first. Field drop order is declaration order.
    plugin: Box<dyn ModulePlugin>,
    #[allow(dead_code)]
    library: libloading::Library,
}

/// Discovers, loads, and owns the lifetime of dynamically-linked modules.
pub struct ModuleLoader {
    search_paths: Vec<PathBuf>,
    loaded: RwLock<HashMap<String, LoadedModule>>,
}

impl ModuleLoader {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// Walks every search path one level deep, returning the manifest of
    /// every subdirectory that contains a `module.toml`. Unreadable or
    /// malformed manifests are logged and skipped rather than aborting the
    /// whole scan, since one broken module shouldn't hide the rest.
    pub fn discover(&self) -> Vec<ModuleManifest> {
        let mut found = Vec::new();
        for root in &self.search_paths {
            let entries = match std::fs::read_dir(root) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %root.display(), error = %e, "module search path unreadable");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let dir = entry.path();
                if !dir.is_dir() || !dir.join("module.toml").is_file() {
                    continue;
                }
                match ModuleManifest::load_dir(&dir) {
                    Ok(manifest) => found.push(manifest),
                    Err(e) => warn!(path = %dir.display(), error = %e, "skipping malformed module manifest"),
                }
            }
        }
        found
    }

    pub fn is_loaded(&self, module_id: &str) -> bool {
        self.loaded.read().contains_key(module_id)
    }

    /// Loads `manifest`'s library and calls its entry point, publishing its
    /// contributions through `registrar`. A no-op if the module is already
    /// loaded.
    pub fn start(&self, manifest: ModuleManifest, registrar: &ModuleRegistrar<'_>) -> Result<(), RuntimeError> {
        if self.is_loaded(&manifest.identifier) {
            return Ok(());
        }

        let path = manifest.library_path();
        // SAFETY: the caller vouches that `path` names a library built
        // against a compatible `ModulePlugin` definition; see the ABI note
        // on this module.
        let library = unsafe { libloading::Library::new(&path) }
            .map_err(|e| RuntimeError::ResourceUnavailable(format!("loading `{}`: {e}", path.display())))?;

        let plugin = unsafe {
            let entry: libloading::Symbol<EntryPointFn> = library
                .get(ENTRY_POINT_SYMBOL)
                .map_err(|e| RuntimeError::ResourceUnavailable(format!("`{}` has no entry point: {e}", path.display())))?;
            let raw = entry();
            if raw.is_null() {
                return Err(RuntimeError::ResourceUnavailable(format!(
                    "`{}` entry point returned a null plugin",
                    path.display()
                )));
            }
            Box::from_raw(raw)
        };

        plugin.register(registrar);
        info!(module = %manifest.identifier, path = %path.display(), "module started");

        self.loaded.write().insert(
            manifest.identifier.clone(),
            LoadedModule { manifest, plugin, library },
        );
        Ok(())
    }

    /// Drops a loaded module, unmapping its library and retracting every
    /// factory, activity descriptor, and validator it registered through
    /// `registrar` (spec scenario S6: `make` must fail `not_found` for a
    /// module's implementations once it's unloaded). Callers that need a
    /// clean teardown should not `stop` a module whose contributions are
    /// still referenced by a launched configuration.
    pub fn stop(&self, module_id: &str, registrar: &ModuleRegistrar<'_>) -> Result<(), RuntimeError> {
        self.loaded
            .write()
            .remove(module_id)
            .ok_or_else(|| RuntimeError::NotFound(format!("module `{module_id}` is not loaded")))?;
        registrar.factories.retract_module(module_id);
        registrar.activities.retract_module(module_id);
        registrar.validators.retract_module(module_id);
        Ok(())
    }

    /// Resolves `relative_path` against a loaded module's resource root.
    pub fn find(&self, module_id: &str, relative_path: impl AsRef<Path>) -> Result<PathBuf, RuntimeError> {
        let loaded = self.loaded.read();
        let module = loaded
            .get(module_id)
            .ok_or_else(|| RuntimeError::NotFound(format!("module `{module_id}` is not loaded")))?;
        Ok(module.manifest.resolve_resource(relative_path))
    }

    pub fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.loaded.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Declares a module's entry point for a `cdylib` crate. Expands to the
/// `extern "C"` symbol [`ENTRY_POINT_SYMBOL`] names, boxing `$plugin_expr`
/// (an expression implementing [`ModulePlugin`]) and leaking it across the
/// FFI boundary as a raw fat pointer.
#[macro_export]
macro_rules! declare_module_plugin {
    ($plugin_expr:expr) => {
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C" fn _sight_module_entry_point() -> *mut dyn $crate::ModulePlugin {
            let plugin: Box<dyn $crate::ModulePlugin> = Box::new($plugin_expr);
            Box::into_raw(plugin)
        }
    };
}
