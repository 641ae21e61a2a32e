//! Engine configuration and its INI file.
//!
//! Parsing lives in [`super::parser`], constants in [`super::defaults`].

use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::defaults::{
    default_disk_cache_dir, default_max_workers, DEFAULT_LOG_DIR, DEFAULT_LOG_FILE,
    DEFAULT_MEMORY_CACHE_SIZE,
};

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Tunables of a load engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of runners executing at once
    pub max_workers: usize,
    /// Memory cache budget in bytes
    pub memory_cache_size: usize,
    /// Root directory of the persistent cache
    pub disk_cache_dir: PathBuf,
    /// Whether the persistent cache is used at all
    pub disk_cache_enabled: bool,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Log file name
    pub log_file: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            memory_cache_size: DEFAULT_MEMORY_CACHE_SIZE,
            disk_cache_dir: default_disk_cache_dir(),
            disk_cache_enabled: true,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            log_file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.resloader/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_memory_cache_size(mut self, bytes: usize) -> Self {
        self.memory_cache_size = bytes;
        self
    }

    pub fn with_disk_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.disk_cache_dir = dir.into();
        self.disk_cache_enabled = true;
        self
    }

    pub fn without_disk_cache(mut self) -> Self {
        self.disk_cache_enabled = false;
        self
    }
}

/// Get the path to the config file (~/.resloader/config.ini).
pub fn config_file_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".resloader")
        .join("config.ini")
}
