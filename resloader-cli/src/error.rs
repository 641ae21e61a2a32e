//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use resloader::cache::DiskCacheError;
use std::fmt;
use std::process;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// Failed to create the engine
    EngineCreation(DiskCacheError),
    /// Disk cache maintenance failed
    Cache(DiskCacheError),
    /// Some loads did not produce a resource
    LoadFailed { failed: usize, total: usize },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::EngineCreation(_) | CliError::Cache(_) => {
                eprintln!();
                eprintln!("Check that the cache directory is writable, or set");
                eprintln!("disk_enabled = false under [cache] in config.ini.");
            }
            CliError::LoadFailed { .. } => {
                eprintln!();
                eprintln!("Run with RUST_LOG=debug for per-load details.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::EngineCreation(e) => write!(f, "Failed to create engine: {}", e),
            CliError::Cache(e) => write!(f, "Cache operation failed: {}", e),
            CliError::LoadFailed { failed, total } => {
                write!(f, "{} of {} loads failed", failed, total)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Runtime(e) => Some(e),
            CliError::EngineCreation(e) => Some(e),
            CliError::Cache(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            CliError::LoadFailed { failed: 2, total: 5 }.to_string(),
            "2 of 5 loads failed"
        );
        assert_eq!(
            CliError::Config("bad value".to_string()).to_string(),
            "Configuration error: bad value"
        );
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error;
        let io = std::io::Error::other("disk gone");
        let err = CliError::Cache(DiskCacheError::Io(io));
        assert!(err.source().is_some());
        assert!(CliError::Config("x".to_string()).source().is_none());
    }
}
