//! Two-tier cache for loaded resources.
//!
//! The memory tier holds decoded, reference-counted [`Resource`](crate::resource::Resource)s;
//! the disk tier holds encoded bytes written by the load pipeline.

mod disk;
mod memory;
mod stats;

pub use disk::{
    clear_disk_cache, disk_cache_usage, ClearResult, DiskCache, DiskCacheError, DiskCacheWriter,
    FileDiskCache, NoOpDiskCache,
};
pub use memory::{LruMemoryCache, MemoryCache, NoOpMemoryCache};
pub use stats::CacheStats;
