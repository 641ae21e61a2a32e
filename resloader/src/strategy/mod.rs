//! Collaborator contracts injected into each load.
//!
//! The engine never performs I/O or decoding itself. A [`LoadPipeline`]
//! bundles the strategies for one load:
//!
//! ```text
//! ┌─────────────┐   raw D   ┌─────────────────┐  Resource<T>  ┌────────────────┐
//! │ DataFetcher │ ────────► │ ResourceDecoder │ ────────────► │ Transformation │
//! └─────────────┘           └─────────────────┘               └───────┬────────┘
//!        │ SourceEncoder (persist raw)                                 │ ResourceEncoder
//!        ▼                                                            ▼
//!   disk cache (source key)                                   disk cache (result key)
//! ```
//!
//! Reading entries back from disk goes through the cache decoder.

mod bytes;
mod raster;

pub use self::bytes::{
    BytesFetcher, BytesSourceEncoder, FileFetcher, NullEncoder, NullSourceEncoder,
    UnitTransformation,
};
pub use self::raster::{FitCenter, ImageDecoder, ImageEncoder};

use crate::error::{DecodeError, FetchError};
use crate::key::{Key, PipelineIds};
use crate::metadata::Metadata;
use crate::resource::Resource;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Obtains the raw data for one load.
pub trait DataFetcher<D>: Send + Sync {
    /// Fetches the data, blocking the worker thread.
    ///
    /// `Ok(None)` means the source had no data; the runner reports it as a
    /// fetch failure. Implementations should poll `cancel` between blocking
    /// steps and return [`FetchError::Cancelled`] once it fires.
    fn load_data(&self, metadata: &Metadata, cancel: &CancellationToken)
        -> Result<Option<D>, FetchError>;

    /// Aborts an in-flight fetch. Must be idempotent.
    fn cancel(&self) {}
}

/// Decodes raw data into a resource sized for `width` x `height`.
pub trait ResourceDecoder<D, T>: Send + Sync {
    fn decode(&self, data: D, width: u32, height: u32) -> Result<Option<Resource<T>>, DecodeError>;

    /// Identity participating in the load [`Key`].
    fn id(&self) -> &str;
}

/// Serializes a finished resource for the persistent cache.
pub trait ResourceEncoder<T>: Send + Sync {
    /// Returns false if nothing usable was written.
    fn encode(&self, resource: &Resource<T>, sink: &mut dyn Write) -> bool;

    fn id(&self) -> &str;
}

/// Serializes raw fetched data for the persistent cache.
pub trait SourceEncoder<D>: Send + Sync {
    fn encode(&self, data: &D, sink: &mut dyn Write) -> bool;

    fn id(&self) -> &str;
}

/// Transforms a decoded resource, e.g. cropping or scaling.
///
/// Returning the input resource unchanged is allowed. A different resource
/// replaces the input, which the runner then releases.
pub trait Transformation<T>: Send + Sync {
    fn transform(&self, resource: Resource<T>, width: u32, height: u32) -> Resource<T>;

    fn id(&self) -> &str;
}

/// The full set of strategies for one load.
pub struct LoadPipeline<D, T> {
    pub fetcher: Arc<dyn DataFetcher<D>>,
    pub cache_decoder: Arc<dyn ResourceDecoder<Vec<u8>, T>>,
    pub decoder: Arc<dyn ResourceDecoder<D, T>>,
    pub transformation: Arc<dyn Transformation<T>>,
    pub encoder: Arc<dyn ResourceEncoder<T>>,
    pub source_encoder: Arc<dyn SourceEncoder<D>>,
}

impl<D: 'static, T: 'static> LoadPipeline<D, T> {
    /// Creates a pipeline with no transformation and no persistence encoders.
    pub fn new(
        fetcher: Arc<dyn DataFetcher<D>>,
        cache_decoder: Arc<dyn ResourceDecoder<Vec<u8>, T>>,
        decoder: Arc<dyn ResourceDecoder<D, T>>,
    ) -> Self {
        Self {
            fetcher,
            cache_decoder,
            decoder,
            transformation: Arc::new(UnitTransformation::new()),
            encoder: Arc::new(NullEncoder::new()),
            source_encoder: Arc::new(NullSourceEncoder::new()),
        }
    }

    pub fn with_transformation(mut self, transformation: Arc<dyn Transformation<T>>) -> Self {
        self.transformation = transformation;
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn ResourceEncoder<T>>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_source_encoder(mut self, source_encoder: Arc<dyn SourceEncoder<D>>) -> Self {
        self.source_encoder = source_encoder;
        self
    }
}

impl<D, T> LoadPipeline<D, T> {
    /// Identities of every strategy that affects the produced resource.
    pub fn ids(&self) -> PipelineIds {
        PipelineIds {
            cache_decoder: self.cache_decoder.id().to_string(),
            decoder: self.decoder.id().to_string(),
            transformation: self.transformation.id().to_string(),
            encoder: self.encoder.id().to_string(),
            source_encoder: self.source_encoder.id().to_string(),
        }
    }

    /// Deduplication key for loading `id` at `width` x `height` through this pipeline.
    pub fn key(&self, id: &str, width: u32, height: u32) -> Key {
        Key::new(id, width, height, self.ids())
    }
}

impl<D, T> Clone for LoadPipeline<D, T> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            cache_decoder: Arc::clone(&self.cache_decoder),
            decoder: Arc::clone(&self.decoder),
            transformation: Arc::clone(&self.transformation),
            encoder: Arc::clone(&self.encoder),
            source_encoder: Arc::clone(&self.source_encoder),
        }
    }
}
