//! Wires the runtime's registries together, loads modules, and launches a
//! configuration — the logic behind the CLI's three subcommands.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread, time,
};

use sight_config::{ActivityRegistry, ConfigurationEngine, Parameters, ValidatorRegistry};
use sight_core::{service::ServiceCore, Runtime, RuntimeError};
use sight_modules::{ModuleLoader, ModuleRegistrar};
use sight_services::{register_builtin_types, Adder, ImageSizeValidator};
use tracing::{info, warn};

pub struct Driver {
    runtime: Arc<Runtime>,
    activities: ActivityRegistry,
    validators: ValidatorRegistry,
    loader: ModuleLoader,
    config_dir: PathBuf,
}

impl Driver {
    pub fn new(config_dir: PathBuf, module_paths: Vec<PathBuf>) -> Self {
        let runtime = Runtime::new();
        register_builtin_types(&runtime.types);
        runtime
            .factories
            .register("Adder", Arc::new(|id, worker, ids| ServiceCore::new(id, "Adder", worker, ids, Adder)));
        let validators = ValidatorRegistry::new();
        validators.register_object_validator("image-size", Arc::new(ImageSizeValidator));

        Self {
            runtime,
            activities: ActivityRegistry::new(),
            validators,
            loader: ModuleLoader::new(module_paths),
            config_dir,
        }
    }

    /// Loads every module manifest found on the search path, publishing its
    /// contributions into this driver's registries. One module failing to
    /// load is logged and skipped rather than aborting the others.
    pub fn load_all_modules(&self) {
        for manifest in self.loader.discover() {
            let id = manifest.identifier.clone();
            let registrar = ModuleRegistrar {
                module_id: &id,
                types: &self.runtime.types,
                factories: &self.runtime.factories,
                activities: &self.activities,
                validators: &self.validators,
            };
            if let Err(e) = self.loader.start(manifest, &registrar) {
                warn!(module = %id, error = %e, "failed to load module");
            } else {
                info!(module = %id, "module loaded");
            }
        }
    }

    /// Unloads `module_id`, retracting every factory, activity, and
    /// validator it registered (spec scenario S6).
    pub fn unload_module(&self, module_id: &str) -> Result<(), RuntimeError> {
        let registrar = ModuleRegistrar {
            module_id,
            types: &self.runtime.types,
            factories: &self.runtime.factories,
            activities: &self.activities,
            validators: &self.validators,
        };
        self.loader.stop(module_id, &registrar)
    }

    pub fn list_modules(&self) -> Vec<String> {
        self.load_all_modules();
        self.loader.loaded_ids()
    }

    pub fn list_configs(&self) -> anyhow::Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = std::fs::read_dir(&self.config_dir)?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("xml") {
                continue;
            }
            ids.push(config_id_of(&path).unwrap_or_else(|| path.file_stem().unwrap().to_string_lossy().into_owned()));
        }
        ids.sort();
        Ok(ids)
    }

    /// Loads modules, launches `config_id` with `params` substituted in, and
    /// blocks until SIGTERM, then tears the configuration down.
    pub fn run(&self, config_id: &str, params: &[(String, String)]) -> Result<(), RuntimeError> {
        self.load_all_modules();

        let path = self.config_dir.join(format!("{config_id}.xml"));
        let xml = std::fs::read_to_string(&path)
            .map_err(|e| RuntimeError::ConfigurationInvalid(format!("reading `{}`: {e}", path.display())))?;
        let root = sight_config::xml::parse(&xml)?;

        let mut parameters = Parameters::new();
        for (k, v) in params {
            parameters.insert(k.clone(), v.clone());
        }

        let engine = ConfigurationEngine::new(
            Arc::clone(&self.runtime.ids),
            &self.runtime.types,
            &self.runtime.factories,
            &self.runtime.workers,
        );
        let mut launched = engine.launch(&root, &parameters)?;
        info!(config = %config_id, "configuration launched");

        let term = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))
            .map_err(|e| RuntimeError::runtime_failure(e))?;
        while !term.load(Ordering::Relaxed) {
            thread::sleep(time::Duration::from_millis(100));
        }
        info!("SIGTERM received, tearing down");

        launched.teardown(&self.runtime.ids);
        Ok(())
    }
}

/// Reads just enough of `path` to recover its `<config id="...">` attribute,
/// without fully parsing substitution tokens it may not yet be able to
/// resolve. Returns `None` on any parse failure so the caller falls back to
/// the file name.
fn config_id_of(path: &Path) -> Option<String> {
    let xml = std::fs::read_to_string(path).ok()?;
    let root = sight_config::xml::parse(&xml).ok()?;
    root.attr("id").map(str::to_owned)
}

/// Maps a runtime error to the reference driver's exit code (spec §6):
/// `1` configuration error, `2` module load error, `3` runtime fatal.
pub fn exit_code_for(err: &RuntimeError) -> i32 {
    match err {
        RuntimeError::ConfigurationInvalid(_) | RuntimeError::NotFound(_) | RuntimeError::TypeMismatch { .. } | RuntimeError::Cancelled(_) => 1,
        RuntimeError::ResourceUnavailable(_) => 2,
        RuntimeError::LifecycleViolation(_) | RuntimeError::RuntimeFailure(_) => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec_classes() {
        assert_eq!(exit_code_for(&RuntimeError::ConfigurationInvalid("x".into())), 1);
        assert_eq!(exit_code_for(&RuntimeError::ResourceUnavailable("x".into())), 2);
        assert_eq!(exit_code_for(&RuntimeError::LifecycleViolation("x".into())), 3);
    }
}
