//! Per-tier cache counters.

/// Counters of one cache tier.
///
/// Both tiers count lookups. Writes are only counted by persistent caches,
/// evictions and the footprint (`size_bytes`, `entries`) only by memory
/// caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub write_failures: u64,
    pub evictions: u64,
    pub size_bytes: usize,
    pub entries: usize,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups that hit, 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            n => self.hits as f64 / n as f64,
        }
    }

    pub(crate) fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub(crate) fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub(crate) fn record_write(&mut self, ok: bool) {
        if ok {
            self.writes += 1;
        } else {
            self.write_failures += 1;
        }
    }

    pub(crate) fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub(crate) fn set_footprint(&mut self, size_bytes: usize, entries: usize) {
        self.size_bytes = size_bytes;
        self.entries = entries;
    }
}
