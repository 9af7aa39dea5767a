//! Argument parsing for the reference driver (spec §6 "CLI surface").

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Reference driver for the sight application runtime", long_about = None)]
pub struct Args {
    /// Directory containing `<config_id>.xml` configuration files.
    #[clap(long, global = true, default_value = "configs")]
    pub config_dir: PathBuf,

    /// Directory to search for module subdirectories, each holding a
    /// `module.toml` manifest. May be given more than once.
    #[clap(long = "module-path", global = true)]
    pub module_paths: Vec<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Loads modules, launches `config_id`, and runs until SIGTERM.
    Run {
        config_id: String,

        /// `name=value` substitution parameter; may be repeated.
        #[clap(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },
    /// Lists module manifests found on the module search path.
    ListModules,
    /// Lists configuration files found in the config directory.
    ListConfigs,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected `name=value`, got `{s}`"))?;
    Ok((key.to_string(), value.to_string()))
}
