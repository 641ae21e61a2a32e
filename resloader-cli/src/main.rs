//! resloader CLI - Command-line interface
//!
//! Drives the resloader engine over local image files and maintains its
//! disk cache.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::cache::CacheAction;
use commands::load::LoadArgs;
use error::CliError;
use resloader::config::EngineConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "resloader")]
#[command(version = resloader::VERSION)]
#[command(about = "Load, resize and cache images through the resloader engine", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.resloader/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load images through the engine and report what it did
    Load(LoadArgs),

    /// Disk cache management
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load(),
    }
    .map_err(|e| CliError::Config(e.to_string()))?;

    match cli.command {
        Commands::Load(args) => commands::load::run(args, config),
        Commands::Cache { action } => commands::cache::run(action, &config),
    }
}
