//! Default values for engine configuration.

use std::path::PathBuf;

/// Default memory cache budget: 256MB.
pub const DEFAULT_MEMORY_CACHE_SIZE: usize = 256 * 1024 * 1024;

/// Default log directory, relative to the working directory.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "resloader.log";

/// Get the number of available CPU cores.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Default worker count: one runner per core.
pub fn default_max_workers() -> usize {
    num_cpus()
}

/// Default disk cache directory (`<platform cache dir>/resloader`).
pub fn default_disk_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("resloader")
}
