//! Per-module declarative resource file (spec §6, "Module manifest"):
//! identifier, dependencies, library name, and the extension points a
//! module contributes. Parsed from TOML, the format the teacher already
//! uses for its own service configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use sight_core::RuntimeError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtensionContributions {
    #[serde(default)]
    pub factories: Vec<String>,
    #[serde(default)]
    pub activities: Vec<String>,
    #[serde(default)]
    pub validators: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModuleManifest {
    pub identifier: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Directory the module's static assets (and this manifest) live under.
    /// Set by `load_dir`, not read from the manifest file itself.
    #[serde(skip)]
    pub resource_root: PathBuf,
    /// Library file stem, e.g. `"sight_module_dicom"`; the loader appends
    /// the platform-specific prefix/extension.
    pub library: String,
    #[serde(default)]
    pub extensions: ExtensionContributions,
}

impl ModuleManifest {
    /// Reads `<dir>/module.toml` and sets `resource_root` to `dir`.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let dir = dir.as_ref();
        let manifest_path = dir.join("module.toml");
        let content = std::fs::read_to_string(&manifest_path).map_err(|e| {
            RuntimeError::ConfigurationInvalid(format!("reading `{}`: {e}", manifest_path.display()))
        })?;
        let mut manifest: ModuleManifest = toml::from_str(&content).map_err(|e| {
            RuntimeError::ConfigurationInvalid(format!("parsing `{}`: {e}", manifest_path.display()))
        })?;
        manifest.resource_root = dir.to_path_buf();
        Ok(manifest)
    }

    /// The platform-specific library file path under the module's own
    /// directory (modules ship their library alongside their manifest).
    pub fn library_path(&self) -> PathBuf {
        self.resource_root.join(libloading::library_filename(&self.library))
    }

    pub fn resolve_resource(&self, relative_path: impl AsRef<Path>) -> PathBuf {
        self.resource_root.join(relative_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_minimal_manifest() {
        let dir = std::env::temp_dir().join(format!("sight-module-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut f = std::fs::File::create(dir.join("module.toml")).unwrap();
        writeln!(
            f,
            r#"
            identifier = "sight.demo"
            library = "sight_module_demo"

            [extensions]
            factories = ["Adder"]
            "#
        )
        .unwrap();

        let manifest = ModuleManifest::load_dir(&dir).unwrap();
        assert_eq!(manifest.identifier, "sight.demo");
        assert_eq!(manifest.extensions.factories, vec!["Adder".to_string()]);
        assert_eq!(manifest.resource_root, dir);

        std::fs::remove_dir_all(&dir).ok();
    }
}
