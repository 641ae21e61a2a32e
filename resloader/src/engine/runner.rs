//! Executes one load on a worker thread.
//!
//! The runner walks the cache tiers before doing real work:
//!
//! 1. decoded result from the disk cache (result key)
//! 2. raw source from the disk cache (source key), then transform
//! 3. fetch, persist source, decode, transform, persist result
//!
//! Cancellation is checked between steps. The produced resource is pinned by
//! the runner until the job has published it.

use crate::cache::{DiskCache, DiskCacheError};
use crate::engine::job::{LoadJob, RunnerControl};
use crate::engine::scheduler::Runnable;
use crate::error::LoadError;
use crate::key::Key;
use crate::metadata::{Metadata, Priority};
use crate::resource::Resource;
use crate::strategy::LoadPipeline;
use std::any::Any;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub(crate) struct LoadRunner<D, T> {
    key: Key,
    width: u32,
    height: u32,
    pipeline: LoadPipeline<D, T>,
    metadata: Metadata,
    disk_cache: Arc<dyn DiskCache>,
    job: Arc<LoadJob<T>>,
    control: Arc<RunnerControl>,
}

impl<D, T> LoadRunner<D, T>
where
    D: Send + 'static,
    T: Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key: Key,
        width: u32,
        height: u32,
        pipeline: LoadPipeline<D, T>,
        metadata: Metadata,
        disk_cache: Arc<dyn DiskCache>,
        job: Arc<LoadJob<T>>,
        control: Arc<RunnerControl>,
    ) -> Self {
        Self {
            key,
            width,
            height,
            pipeline,
            metadata,
            disk_cache,
            job,
            control,
        }
    }

    fn check_cancelled(&self) -> Result<(), LoadError> {
        if self.control.is_cancelled() {
            Err(LoadError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Produces the resource, pinned once on the runner's behalf.
    fn produce(&self) -> Result<Resource<T>, LoadError> {
        let strategy = self.metadata.disk_cache_strategy();

        if strategy.cache_result() {
            if let Some(resource) = self.decode_cached(&self.key) {
                trace!(key = %self.key, "Result served from disk cache");
                resource.acquire();
                return Ok(resource);
            }
        }
        self.check_cancelled()?;

        let source_key = self.key.source_key();
        if strategy.cache_source() {
            if let Some(resource) = self.decode_cached(&source_key) {
                trace!(key = %self.key, "Source served from disk cache");
                return self.transform_and_persist(resource);
            }
        }
        self.check_cancelled()?;

        let data = self
            .pipeline
            .fetcher
            .load_data(&self.metadata, self.control.token())?
            .ok_or_else(|| LoadError::FetchFailed("no data".to_string()))?;
        self.check_cancelled()?;

        if strategy.cache_source() {
            let encoder = &self.pipeline.source_encoder;
            self.persist(&source_key, &|sink: &mut dyn Write| encoder.encode(&data, sink));
        }

        let decoded = self
            .pipeline
            .decoder
            .decode(data, self.width, self.height)?
            .ok_or_else(|| LoadError::DecodeFailed("decoder produced no resource".to_string()))?;

        self.transform_and_persist(decoded)
    }

    /// Reads and decodes a disk entry. Unreadable entries are deleted.
    fn decode_cached(&self, key: &Key) -> Option<Resource<T>> {
        let bytes = self.disk_cache.get(key)?;
        match self.pipeline.cache_decoder.decode(bytes, self.width, self.height) {
            Ok(Some(resource)) => Some(resource),
            Ok(None) => {
                warn!(key = %key, "Cache decoder produced nothing, dropping disk entry");
                self.disk_cache.delete(key);
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to decode disk entry, dropping it");
                self.disk_cache.delete(key);
                None
            }
        }
    }

    /// Pins `decoded`, applies the transformation and persists the result.
    ///
    /// A transformation that returns a new resource takes over the pin and
    /// the decoded input is released. A panicking transformation releases
    /// the decoded input before reporting the panic.
    fn transform_and_persist(&self, decoded: Resource<T>) -> Result<Resource<T>, LoadError> {
        decoded.acquire();
        let transformed = panic::catch_unwind(AssertUnwindSafe(|| {
            self.pipeline
                .transformation
                .transform(decoded.clone(), self.width, self.height)
        }));
        let transformed = match transformed {
            Ok(transformed) => transformed,
            Err(payload) => {
                decoded.release();
                return Err(LoadError::Panicked(panic_message(payload.as_ref())));
            }
        };
        if !transformed.ptr_eq(&decoded) {
            transformed.acquire();
            decoded.release();
        }

        if self.metadata.disk_cache_strategy().cache_result() {
            let encoder = &self.pipeline.encoder;
            self.persist(&self.key, &|sink: &mut dyn Write| encoder.encode(&transformed, sink));
        }
        Ok(transformed)
    }

    /// Writes one disk entry. Failures, panicking encoders included, are
    /// logged and never fail the load.
    fn persist(&self, key: &Key, writer: &dyn Fn(&mut dyn Write) -> bool) {
        let written = panic::catch_unwind(AssertUnwindSafe(|| self.disk_cache.put(key, &writer)));
        match written {
            Ok(Ok(())) => {}
            Ok(Err(DiskCacheError::WriterFailed(_))) => {
                trace!(key = %key, "Encoder wrote nothing, no disk entry");
            }
            Ok(Err(e)) => warn!(key = %key, error = %e, "Failed to write disk cache entry"),
            Err(payload) => warn!(
                key = %key,
                panic = %panic_message(payload.as_ref()),
                "Encoder panicked, no disk entry"
            ),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<D, T> Runnable for LoadRunner<D, T>
where
    D: Send + 'static,
    T: Send + Sync + 'static,
{
    fn priority(&self) -> Priority {
        self.metadata.priority()
    }

    fn describe(&self) -> String {
        self.key.to_string()
    }

    fn run(self: Box<Self>) {
        if self.control.is_cancelled() {
            trace!(key = %self.key, "Runner cancelled before start");
            return;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.produce()))
            .unwrap_or_else(|payload| Err(LoadError::Panicked(panic_message(payload.as_ref()))));

        match outcome {
            Ok(resource) => {
                if self.control.is_cancelled() {
                    trace!(key = %self.key, "Dropping result of cancelled runner");
                    resource.release();
                    return;
                }
                self.job.on_resource_ready(resource);
            }
            Err(error) => {
                if self.control.is_cancelled() {
                    trace!(key = %self.key, "Cancelled runner stopped");
                    return;
                }
                debug!(key = %self.key, error = %error, "Runner failed");
                self.job.on_exception(error);
            }
        }
    }
}
