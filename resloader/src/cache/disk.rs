//! Persistent cache for encoded resources.
//!
//! The engine only ever writes through a [`DiskCacheWriter`] and reads raw
//! bytes back; the storage layout belongs to the [`DiskCache`] implementation.
//! [`FileDiskCache`] stores one file per key, sharded by the first two hex
//! digits of [`Key::disk_name`].

use crate::cache::CacheStats;
use crate::key::Key;
use parking_lot::Mutex;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// Disk cache errors.
#[derive(Debug, Error)]
pub enum DiskCacheError {
    /// I/O error during cache operations
    #[error("Disk cache I/O error: {0}")]
    Io(#[from] io::Error),

    /// The writer declined to produce an entry
    #[error("Disk cache writer failed for {0}")]
    WriterFailed(String),
}

/// Produces the bytes of one cache entry.
pub trait DiskCacheWriter {
    /// Writes the entry to `sink`. Returns false if nothing usable was written.
    fn write(&self, sink: &mut dyn Write) -> bool;
}

impl<F> DiskCacheWriter for F
where
    F: Fn(&mut dyn Write) -> bool,
{
    fn write(&self, sink: &mut dyn Write) -> bool {
        self(sink)
    }
}

/// Persistent cache abstraction.
pub trait DiskCache: Send + Sync {
    /// Reads the entry for `key`, if present.
    fn get(&self, key: &Key) -> Option<Vec<u8>>;

    /// Writes an entry through `writer`. A failed write leaves no entry.
    fn put(&self, key: &Key, writer: &dyn DiskCacheWriter) -> Result<(), DiskCacheError>;

    /// Deletes the entry for `key`, if present.
    fn delete(&self, key: &Key);
}

/// Result of clearing a disk cache directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClearResult {
    pub files_deleted: u64,
    pub bytes_freed: u64,
}

/// Directory-backed disk cache.
pub struct FileDiskCache {
    cache_dir: PathBuf,
    temp_counter: AtomicU64,
    stats: Mutex<CacheStats>,
}

impl FileDiskCache {
    /// Create a disk cache rooted at `cache_dir`, creating it if needed.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self, DiskCacheError> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;

        Ok(Self {
            cache_dir,
            temp_counter: AtomicU64::new(0),
            stats: Mutex::new(CacheStats::default()),
        })
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the entry for `key`.
    pub fn entry_path(&self, key: &Key) -> PathBuf {
        let name = key.disk_name();
        self.cache_dir.join(&name[..2]).join(name)
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    /// Returns (file count, total bytes) of the stored entries.
    pub fn usage(&self) -> Result<(u64, u64), DiskCacheError> {
        disk_cache_usage(&self.cache_dir)
    }

    /// Removes every entry.
    pub fn clear(&self) -> Result<ClearResult, DiskCacheError> {
        clear_disk_cache(&self.cache_dir)
    }

    fn temp_path(&self, path: &Path) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        path.with_extension(format!("tmp.{}.{}", std::process::id(), n))
    }

    fn write_entry(&self, path: &Path, writer: &dyn DiskCacheWriter) -> Result<bool, io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp = self.temp_path(path);
        let mut pending = PendingEntry {
            path: &temp,
            committed: false,
        };
        let mut file = BufWriter::new(fs::File::create(&temp)?);
        if !writer.write(&mut file) {
            return Ok(false);
        }

        file.into_inner()
            .map_err(|e| e.into_error())?
            .sync_all()?;
        fs::rename(&temp, path)?;
        pending.committed = true;
        Ok(true)
    }
}

/// Temp file of an entry being written. Removed on drop, including while
/// unwinding from a panicking writer, unless it was renamed into place.
struct PendingEntry<'a> {
    path: &'a Path,
    committed: bool,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(self.path);
        }
    }
}

/// Shard directories are named by the first two hex digits of an entry name.
fn is_shard(entry: &fs::DirEntry) -> io::Result<bool> {
    let name = entry.file_name();
    let name = name.to_string_lossy();
    let hex_name = name.len() == 2 && name.bytes().all(|b| b.is_ascii_hexdigit());
    Ok(hex_name && entry.file_type()?.is_dir())
}

impl DiskCache for FileDiskCache {
    fn get(&self, key: &Key) -> Option<Vec<u8>> {
        match fs::read(self.entry_path(key)) {
            Ok(data) => {
                self.stats.lock().record_hit();
                Some(data)
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(key = %key, error = %e, "Failed to read disk cache entry");
                }
                self.stats.lock().record_miss();
                None
            }
        }
    }

    fn put(&self, key: &Key, writer: &dyn DiskCacheWriter) -> Result<(), DiskCacheError> {
        let path = self.entry_path(key);
        match self.write_entry(&path, writer) {
            Ok(true) => {
                self.stats.lock().record_write(true);
                debug!(key = %key, path = %path.display(), "Wrote disk cache entry");
                Ok(())
            }
            Ok(false) => {
                self.stats.lock().record_write(false);
                Err(DiskCacheError::WriterFailed(key.to_string()))
            }
            Err(e) => {
                self.stats.lock().record_write(false);
                Err(e.into())
            }
        }
    }

    fn delete(&self, key: &Key) {
        if let Err(e) = fs::remove_file(self.entry_path(key)) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(key = %key, error = %e, "Failed to delete disk cache entry");
            }
        }
    }
}

/// Disk cache that never stores anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpDiskCache;

impl DiskCache for NoOpDiskCache {
    fn get(&self, _key: &Key) -> Option<Vec<u8>> {
        None
    }

    fn put(&self, _key: &Key, _writer: &dyn DiskCacheWriter) -> Result<(), DiskCacheError> {
        Ok(())
    }

    fn delete(&self, _key: &Key) {}
}

/// Returns (file count, total bytes) for a cache directory.
pub fn disk_cache_usage(cache_dir: &Path) -> Result<(u64, u64), DiskCacheError> {
    let mut files = 0;
    let mut bytes = 0;
    if !cache_dir.exists() {
        return Ok((0, 0));
    }
    for shard in fs::read_dir(cache_dir)? {
        let shard = shard?;
        if !is_shard(&shard)? {
            continue;
        }
        for entry in fs::read_dir(shard.path())? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if metadata.is_file() {
                files += 1;
                bytes += metadata.len();
            }
        }
    }
    Ok((files, bytes))
}

/// Deletes every entry under a cache directory, keeping the directory itself.
///
/// Only shard directories are touched; anything else in `cache_dir` stays.
pub fn clear_disk_cache(cache_dir: &Path) -> Result<ClearResult, DiskCacheError> {
    let (files_deleted, bytes_freed) = disk_cache_usage(cache_dir)?;
    if cache_dir.exists() {
        for shard in fs::read_dir(cache_dir)? {
            let shard = shard?;
            if is_shard(&shard)? {
                fs::remove_dir_all(shard.path())?;
            }
        }
    }
    Ok(ClearResult {
        files_deleted,
        bytes_freed,
    })
}
