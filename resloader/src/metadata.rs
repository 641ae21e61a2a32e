//! Per-load scheduling and caching options.

/// Scheduling priority of a load.
///
/// Ordered so that a higher priority compares greater; the scheduler always
/// dequeues the greatest queued runner first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Speculative work (e.g. preloading off-screen content)
    Low,
    /// Regular on-screen loads
    #[default]
    Normal,
    /// Loads the user is waiting on
    High,
    /// Must run before anything else queued
    Immediate,
}

/// Which forms of a load are written to the persistent cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DiskCacheStrategy {
    /// Persist nothing
    None,
    /// Persist the original fetched data only
    Source,
    /// Persist the decoded and transformed result only
    #[default]
    Result,
    /// Persist both source and result
    All,
}

impl DiskCacheStrategy {
    /// Returns true if raw source data is read from and written to disk.
    pub fn cache_source(&self) -> bool {
        matches!(self, Self::Source | Self::All)
    }

    /// Returns true if the final result is read from and written to disk.
    pub fn cache_result(&self) -> bool {
        matches!(self, Self::Result | Self::All)
    }
}

/// Immutable options attached to one load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    priority: Priority,
    disk_cache_strategy: DiskCacheStrategy,
    memory_cacheable: bool,
}

impl Metadata {
    /// Creates metadata with the given priority and default cache behaviour.
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    /// Sets the disk cache strategy.
    pub fn with_disk_cache_strategy(mut self, strategy: DiskCacheStrategy) -> Self {
        self.disk_cache_strategy = strategy;
        self
    }

    /// Sets whether the memory cache is consulted and populated.
    pub fn with_memory_cacheable(mut self, memory_cacheable: bool) -> Self {
        self.memory_cacheable = memory_cacheable;
        self
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn disk_cache_strategy(&self) -> DiskCacheStrategy {
        self.disk_cache_strategy
    }

    pub fn memory_cacheable(&self) -> bool {
        self.memory_cacheable
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            disk_cache_strategy: DiskCacheStrategy::default(),
            memory_cacheable: true,
        }
    }
}
