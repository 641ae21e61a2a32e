//! Cache management CLI commands.

use clap::Subcommand;
use resloader::cache::{clear_disk_cache, disk_cache_usage};
use resloader::config::{format_size, EngineConfig};

use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Clear the disk cache, removing all cached entries
    Clear,
    /// Show disk cache statistics
    Stats,
}

/// Run a cache subcommand.
pub fn run(action: CacheAction, config: &EngineConfig) -> Result<(), CliError> {
    let cache_dir = &config.disk_cache_dir;

    match action {
        CacheAction::Clear => {
            println!("Clearing disk cache at: {}", cache_dir.display());
            let result = clear_disk_cache(cache_dir).map_err(CliError::Cache)?;
            println!(
                "Deleted {} files, freed {}",
                result.files_deleted,
                format_size(result.bytes_freed as usize)
            );
        }
        CacheAction::Stats => {
            println!("Disk cache: {}", cache_dir.display());
            if !config.disk_cache_enabled {
                println!("  (disabled in configuration)");
            }
            let (files, bytes) = disk_cache_usage(cache_dir).map_err(CliError::Cache)?;
            println!("  Files: {}", files);
            println!("  Size:  {}", format_size(bytes as usize));
        }
    }
    Ok(())
}
