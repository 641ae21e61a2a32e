//! In-memory resource cache with LRU eviction.
//!
//! The memory cache is a holder in the resource reference-counting scheme:
//! each present entry owns one acquisition, taken on [`MemoryCache::put`] and
//! given back when the entry is evicted, replaced, removed or cleared.

use crate::cache::CacheStats;
use crate::key::Key;
use crate::resource::Resource;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::marker::PhantomData;
use tracing::debug;

/// Cache abstraction for completed resources.
///
/// Enables different strategies (LRU, no-op) to be injected into the engine.
pub trait MemoryCache<T>: Send + Sync {
    /// Looks up a resource.
    ///
    /// A returned resource has already been acquired on the caller's behalf,
    /// atomically with the lookup, so a concurrent eviction cannot recycle it.
    /// The caller must release it exactly once.
    fn get(&self, key: &Key) -> Option<Resource<T>>;

    /// Stores a resource, acquiring it for as long as the entry is present.
    ///
    /// Returns the entries it displaced (replaced or evicted), each still
    /// carrying the cache's reference. The caller releases every one of them
    /// once it holds no locks of its own.
    #[must_use = "displaced resources must be released"]
    fn insert(&self, key: Key, resource: Resource<T>) -> Vec<Resource<T>>;

    /// Stores a resource and releases whatever it displaced.
    fn put(&self, key: Key, resource: Resource<T>) {
        for displaced in self.insert(key, resource) {
            displaced.release();
        }
    }

    /// Removes an entry and releases the cache's reference.
    ///
    /// Returns true if an entry was present.
    fn remove(&self, key: &Key) -> bool;

    /// Removes every entry.
    fn clear(&self);

    /// Sum of the size estimates of all entries.
    fn size_bytes(&self) -> usize;

    /// Number of entries.
    fn entry_count(&self) -> usize;

    /// Snapshot of hit/miss/eviction statistics.
    fn stats(&self) -> CacheStats;
}

struct CacheEntry<T> {
    resource: Resource<T>,
    /// Logical clock value of the last access, for LRU ordering
    last_used: u64,
}

struct LruState<T> {
    entries: HashMap<Key, CacheEntry<T>>,
    size_bytes: usize,
    clock: u64,
    stats: CacheStats,
}

impl<T> LruState<T> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn take(&mut self, key: &Key) -> Option<Resource<T>> {
        let entry = self.entries.remove(key)?;
        self.size_bytes = self.size_bytes.saturating_sub(entry.resource.size());
        Some(entry.resource)
    }

    fn refresh_stats(&mut self) {
        let (size, count) = (self.size_bytes, self.entries.len());
        self.stats.set_footprint(size, count);
    }
}

/// Byte-bounded memory cache evicting the least recently used entries.
pub struct LruMemoryCache<T> {
    state: Mutex<LruState<T>>,
    max_size_bytes: usize,
}

impl<T> LruMemoryCache<T> {
    /// Create a new memory cache with the given size limit.
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            state: Mutex::new(LruState {
                entries: HashMap::new(),
                size_bytes: 0,
                clock: 0,
                stats: CacheStats::default(),
            }),
            max_size_bytes,
        }
    }

    /// Get the maximum size of the cache in bytes.
    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    /// Check if a key exists in the cache without touching its LRU position.
    pub fn contains(&self, key: &Key) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Evict least recently used entries until the cache fits its limit.
    ///
    /// Returns the evicted resources; the caller releases them after the
    /// lock is dropped so recyclers never run under the cache lock.
    fn evict_over_limit(&self, state: &mut LruState<T>) -> Vec<Resource<T>> {
        if state.size_bytes <= self.max_size_bytes {
            return Vec::new();
        }

        let mut candidates: Vec<(Key, u64)> = state
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.last_used))
            .collect();
        candidates.sort_by_key(|(_, last_used)| *last_used);

        let mut evicted = Vec::new();
        for (key, _) in candidates {
            if state.size_bytes <= self.max_size_bytes {
                break;
            }
            if let Some(resource) = state.take(&key) {
                debug!(key = %key, size = resource.size(), "Evicting from memory cache");
                evicted.push(resource);
            }
        }

        state.stats.record_evictions(evicted.len());
        evicted
    }
}

impl<T: Send + Sync> MemoryCache<T> for LruMemoryCache<T> {
    fn get(&self, key: &Key) -> Option<Resource<T>> {
        let mut state = self.state.lock();
        let now = state.tick();

        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_used = now;
                entry.resource.acquire();
                let resource = entry.resource.clone();
                state.stats.record_hit();
                Some(resource)
            }
            None => {
                state.stats.record_miss();
                None
            }
        }
    }

    fn insert(&self, key: Key, resource: Resource<T>) -> Vec<Resource<T>> {
        if resource.size() > self.max_size_bytes {
            debug!(
                key = %key,
                size = resource.size(),
                limit = self.max_size_bytes,
                "Resource larger than memory cache, not caching"
            );
            return Vec::new();
        }

        resource.acquire();
        let mut state = self.state.lock();
        let last_used = state.tick();
        let replaced = state.take(&key);
        state.size_bytes += resource.size();
        state.entries.insert(
            key,
            CacheEntry {
                resource,
                last_used,
            },
        );
        let evicted = self.evict_over_limit(&mut state);
        state.refresh_stats();
        evicted.into_iter().chain(replaced).collect()
    }

    fn remove(&self, key: &Key) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.take(key);
            state.refresh_stats();
            removed
        };

        match removed {
            Some(resource) => {
                resource.release();
                true
            }
            None => false,
        }
    }

    fn clear(&self) {
        let drained: Vec<Resource<T>> = {
            let mut state = self.state.lock();
            state.size_bytes = 0;
            let drained = state.entries.drain().map(|(_, e)| e.resource).collect();
            state.refresh_stats();
            drained
        };

        for resource in drained {
            resource.release();
        }
    }

    fn size_bytes(&self) -> usize {
        self.state.lock().size_bytes
    }

    fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }
}

/// Memory cache that never stores anything.
///
/// Useful for disabling the memory tier without changing engine wiring.
pub struct NoOpMemoryCache<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> NoOpMemoryCache<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for NoOpMemoryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemoryCache<T> for NoOpMemoryCache<T> {
    fn get(&self, _key: &Key) -> Option<Resource<T>> {
        None
    }

    fn insert(&self, _key: Key, _resource: Resource<T>) -> Vec<Resource<T>> {
        Vec::new()
    }

    fn remove(&self, _key: &Key) -> bool {
        false
    }

    fn clear(&self) {}

    fn size_bytes(&self) -> usize {
        0
    }

    fn entry_count(&self) -> usize {
        0
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}
