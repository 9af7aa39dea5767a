use clap::Parser;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use crate::cli::{Args, Command};
use crate::driver::Driver;

mod cli;
mod driver;

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    let driver = Driver::new(args.config_dir, args.module_paths);

    let exit_code = match args.command {
        Command::ListModules => {
            for id in driver.list_modules() {
                println!("{id}");
            }
            0
        }
        Command::ListConfigs => match driver.list_configs() {
            Ok(ids) => {
                for id in ids {
                    println!("{id}");
                }
                0
            }
            Err(e) => {
                tracing::error!("{e}");
                1
            }
        },
        Command::Run { config_id, params } => match driver.run(&config_id, &params) {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!("{e}");
                driver::exit_code_for(&e)
            }
        },
    };

    std::process::exit(exit_code);
}
