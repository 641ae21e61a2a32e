//! Engine configuration.
//!
//! [`EngineConfig`] carries every tunable of the engine with defaults, and can
//! be overlaid from an INI file:
//!
//! ```ini
//! [engine]
//! max_workers = 8
//!
//! [cache]
//! memory_size = 256MB
//! directory = ~/.cache/resloader
//! disk_enabled = true
//!
//! [logging]
//! directory = logs
//! file = resloader.log
//! ```

mod defaults;
mod file;
mod parser;
mod size;

pub use defaults::{
    default_disk_cache_dir, default_max_workers, num_cpus, DEFAULT_LOG_DIR, DEFAULT_LOG_FILE,
    DEFAULT_MEMORY_CACHE_SIZE,
};
pub use file::{config_file_path, ConfigFileError, EngineConfig};
pub use size::{format_size, parse_size, SizeParseError};
