//! Load engine: deduplicated, cached, prioritized resource loading.
//!
//! [`Engine::load`] is the front door. For each request it either
//!
//! 1. delivers synchronously from the memory cache,
//! 2. attaches to the in-flight job for the same [`Key`], or
//! 3. starts a new job and queues its runner.
//!
//! These three outcomes are decided under one job-table lock, so concurrent
//! first-time loads of one key start exactly one runner.
//!
//! # Example
//!
//! ```ignore
//! let engine = Engine::from_config(&EngineConfig::default(), Handle::current())?;
//! let pipeline = LoadPipeline::new(fetcher, Arc::new(ImageDecoder), Arc::new(ImageDecoder));
//! if let Some(status) = engine.load("photo.png", 256, 256, pipeline, Metadata::default(), callback) {
//!     // Later, if the caller loses interest:
//!     status.cancel();
//! }
//! ```

mod job;
mod runner;
mod scheduler;

pub use job::{CallbackId, JobStatus};

use crate::cache::{DiskCache, DiskCacheError, FileDiskCache, LruMemoryCache, MemoryCache, NoOpDiskCache};
use crate::config::EngineConfig;
use crate::error::LoadError;
use crate::key::Key;
use crate::metadata::Metadata;
use crate::resource::Resource;
use crate::strategy::LoadPipeline;
use job::{LoadJob, RunnerControl};
use parking_lot::Mutex;
use runner::LoadRunner;
use scheduler::RunnerScheduler;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Receives the outcome of a load.
///
/// Called on a worker thread, or synchronously inside [`Engine::load`] on a
/// memory-cache hit. The resource is pinned for the duration of the call; a
/// callback that keeps it must [`Resource::acquire`] it.
pub trait ResourceCallback<T>: Send + Sync {
    fn on_resource_ready(&self, resource: &Resource<T>);

    fn on_exception(&self, error: &LoadError);
}

/// Live counters shared by the engine and its jobs.
#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    total_loads: AtomicU64,
    memory_hits: AtomicU64,
    coalesced: AtomicU64,
    runners_started: AtomicU64,
    runners_succeeded: AtomicU64,
    runners_failed: AtomicU64,
    runners_cancelled: AtomicU64,
}

impl EngineCounters {
    pub fn record_succeeded(&self) {
        self.runners_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.runners_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.runners_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStats {
        EngineStats {
            total_loads: self.total_loads.load(Ordering::Relaxed),
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            runners_started: self.runners_started.load(Ordering::Relaxed),
            runners_succeeded: self.runners_succeeded.load(Ordering::Relaxed),
            runners_failed: self.runners_failed.load(Ordering::Relaxed),
            runners_cancelled: self.runners_cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of engine statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Calls to [`Engine::load`]
    pub total_loads: u64,
    /// Loads delivered synchronously from the memory cache
    pub memory_hits: u64,
    /// Loads that attached to an already running job
    pub coalesced: u64,
    /// Runners created
    pub runners_started: u64,
    pub runners_succeeded: u64,
    pub runners_failed: u64,
    pub runners_cancelled: u64,
}

impl EngineStats {
    /// Fraction of loads that needed no new runner.
    pub fn dedup_ratio(&self) -> f64 {
        if self.total_loads == 0 {
            0.0
        } else {
            (self.memory_hits + self.coalesced) as f64 / self.total_loads as f64
        }
    }

    /// Fraction of loads served from the memory cache.
    pub fn memory_hit_rate(&self) -> f64 {
        if self.total_loads == 0 {
            0.0
        } else {
            self.memory_hits as f64 / self.total_loads as f64
        }
    }
}

/// State shared between the engine front door and its jobs.
pub(crate) struct EngineShared<T> {
    pub jobs: Mutex<HashMap<Key, Arc<LoadJob<T>>>>,
    pub memory_cache: Arc<dyn MemoryCache<T>>,
    pub disk_cache: Arc<dyn DiskCache>,
    pub stats: EngineCounters,
}

/// Handle to one caller's interest in an in-flight load.
///
/// Dropping the handle keeps the caller attached; only [`LoadStatus::cancel`]
/// detaches it.
pub struct LoadStatus<T> {
    job: Arc<LoadJob<T>>,
    callback_id: CallbackId,
}

impl<T: Send + Sync + 'static> LoadStatus<T> {
    /// Key of the load this handle refers to.
    pub fn key(&self) -> &Key {
        self.job.key()
    }

    /// Current status of the underlying job.
    pub fn job_status(&self) -> JobStatus {
        self.job.status()
    }

    /// Detaches this caller. Its callback will not be invoked. The runner is
    /// cancelled once no caller remains.
    pub fn cancel(self) {
        self.job.remove_callback(self.callback_id);
    }
}

impl<T> std::fmt::Debug for LoadStatus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadStatus")
            .field("job", &self.job)
            .field("callback_id", &self.callback_id)
            .finish()
    }
}

/// Resource loading engine.
///
/// Cheap to clone; clones share caches, jobs and workers.
pub struct Engine<T> {
    shared: Arc<EngineShared<T>>,
    scheduler: Arc<RunnerScheduler>,
}

impl<T> Clone for Engine<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            scheduler: Arc::clone(&self.scheduler),
        }
    }
}

impl<T: Send + Sync + 'static> Engine<T> {
    /// Creates an engine whose runners execute on `runtime`'s blocking pool.
    pub fn new(
        memory_cache: Arc<dyn MemoryCache<T>>,
        disk_cache: Arc<dyn DiskCache>,
        max_workers: usize,
        runtime: Handle,
    ) -> Self {
        let scheduler = RunnerScheduler::new(max_workers, &runtime);
        info!(max_workers = scheduler.max_workers(), "Load engine started");
        Self {
            shared: Arc::new(EngineShared {
                jobs: Mutex::new(HashMap::new()),
                memory_cache,
                disk_cache,
                stats: EngineCounters::default(),
            }),
            scheduler: Arc::new(scheduler),
        }
    }

    /// Creates an engine from configuration.
    ///
    /// Uses an [`LruMemoryCache`] and, if enabled, a [`FileDiskCache`].
    pub fn from_config(config: &EngineConfig, runtime: Handle) -> Result<Self, DiskCacheError> {
        let memory_cache: Arc<dyn MemoryCache<T>> =
            Arc::new(LruMemoryCache::new(config.memory_cache_size));
        let disk_cache: Arc<dyn DiskCache> = if config.disk_cache_enabled {
            Arc::new(FileDiskCache::new(&config.disk_cache_dir)?)
        } else {
            Arc::new(NoOpDiskCache)
        };
        Ok(Self::new(memory_cache, disk_cache, config.max_workers, runtime))
    }

    /// Starts or joins a load of `id` at `width` x `height`.
    ///
    /// Returns `None` if the callback was already invoked synchronously,
    /// either from the memory cache or with [`LoadError::Cancelled`] because
    /// the engine is shut down. Otherwise returns a handle to cancel this
    /// caller's interest.
    pub fn load<D: Send + 'static>(
        &self,
        id: &str,
        width: u32,
        height: u32,
        pipeline: LoadPipeline<D, T>,
        metadata: Metadata,
        callback: Arc<dyn ResourceCallback<T>>,
    ) -> Option<LoadStatus<T>> {
        let key = pipeline.key(id, width, height);
        let stats = &self.shared.stats;
        stats.total_loads.fetch_add(1, Ordering::Relaxed);

        let mut jobs = self.shared.jobs.lock();

        if metadata.memory_cacheable() {
            if let Some(resource) = self.shared.memory_cache.get(&key) {
                drop(jobs);
                stats.memory_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Loaded from memory cache");
                callback.on_resource_ready(&resource);
                resource.release();
                return None;
            }
        }

        if let Some(job) = jobs.get(&key) {
            let callback_id = job.add_callback(callback);
            let job = Arc::clone(job);
            drop(jobs);
            stats.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, waiters = job.waiter_count(), "Attached to running load");
            return Some(LoadStatus { job, callback_id });
        }

        let control = Arc::new(RunnerControl::new(Arc::clone(&pipeline.fetcher)));
        let job = Arc::new(LoadJob::new(
            key.clone(),
            metadata.memory_cacheable(),
            Arc::downgrade(&self.shared),
            Arc::clone(&control),
        ));
        let callback_id = job.add_callback(callback);
        jobs.insert(key.clone(), Arc::clone(&job));
        drop(jobs);

        let priority = metadata.priority();
        let runner = LoadRunner::new(
            key.clone(),
            width,
            height,
            pipeline,
            metadata,
            Arc::clone(&self.shared.disk_cache),
            Arc::clone(&job),
            control,
        );
        if self.scheduler.enqueue(Box::new(runner)).is_err() {
            job.reject(LoadError::Cancelled);
            return None;
        }
        stats.runners_started.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ?priority, "Started new load");

        Some(LoadStatus { job, callback_id })
    }

    /// Number of loads currently in flight.
    pub fn active_jobs(&self) -> usize {
        self.shared.jobs.lock().len()
    }

    /// Number of runners waiting for a worker.
    pub fn queued_runners(&self) -> usize {
        self.scheduler.queued()
    }

    pub fn memory_cache(&self) -> &Arc<dyn MemoryCache<T>> {
        &self.shared.memory_cache
    }

    pub fn disk_cache(&self) -> &Arc<dyn DiskCache> {
        &self.shared.disk_cache
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.stats.snapshot()
    }

    /// Log current statistics at info level.
    pub fn log_stats(&self) {
        let stats = self.stats();
        let cache = self.shared.memory_cache.stats();
        info!(
            total_loads = stats.total_loads,
            memory_hits = stats.memory_hits,
            coalesced = stats.coalesced,
            runners_started = stats.runners_started,
            runners_succeeded = stats.runners_succeeded,
            runners_failed = stats.runners_failed,
            runners_cancelled = stats.runners_cancelled,
            dedup_ratio = format!("{:.1}%", stats.dedup_ratio() * 100.0),
            memory_entries = cache.entries,
            memory_bytes = cache.size_bytes,
            active_jobs = self.active_jobs(),
            "Load engine statistics"
        );
    }

    /// Cancels every in-flight load and stops the workers.
    ///
    /// Waiters of cancelled loads are not notified. Runners already executing
    /// finish their current step and discard their result.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        let jobs: Vec<_> = self.shared.jobs.lock().drain().map(|(_, job)| job).collect();
        let cancelled = jobs.len();
        for job in jobs {
            job.cancel();
        }
        info!(cancelled, "Load engine shut down");
    }
}
