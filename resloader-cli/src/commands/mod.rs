//! CLI command implementations.
//!
//! - [`cache`] - Disk cache management (clear, stats)
//! - [`load`] - Load images through the engine

pub mod cache;
pub mod load;
