//! How a request turns its model into a load pipeline.

use crate::metadata::{DiskCacheStrategy, Metadata, Priority};
use crate::strategy::{
    DataFetcher, LoadPipeline, NullEncoder, NullSourceEncoder, ResourceDecoder, ResourceEncoder,
    SourceEncoder, Transformation, UnitTransformation,
};
use std::sync::Arc;

/// Maps a model to a data source.
pub trait ModelLoader<M, D>: Send + Sync {
    /// Stable identifier of the model's data, e.g. a path or URL.
    fn id(&self, model: &M) -> String;

    /// Fetcher for the model's data at the requested size.
    fn fetcher(&self, model: &M, width: u32, height: u32) -> Arc<dyn DataFetcher<D>>;
}

/// Everything except the fetcher that a request needs to build a pipeline.
pub struct LoadProvider<M, D, T> {
    pub model_loader: Arc<dyn ModelLoader<M, D>>,
    pub cache_decoder: Arc<dyn ResourceDecoder<Vec<u8>, T>>,
    pub decoder: Arc<dyn ResourceDecoder<D, T>>,
    pub transformation: Arc<dyn Transformation<T>>,
    pub encoder: Arc<dyn ResourceEncoder<T>>,
    pub source_encoder: Arc<dyn SourceEncoder<D>>,
}

impl<M, D: 'static, T: 'static> LoadProvider<M, D, T> {
    pub fn new(
        model_loader: Arc<dyn ModelLoader<M, D>>,
        cache_decoder: Arc<dyn ResourceDecoder<Vec<u8>, T>>,
        decoder: Arc<dyn ResourceDecoder<D, T>>,
    ) -> Self {
        Self {
            model_loader,
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

    /// Builds the pipeline for loading `model` at `width` x `height`.
    pub(crate) fn pipeline(&self, model: &M, width: u32, height: u32) -> LoadPipeline<D, T> {
        LoadPipeline {
            fetcher: self.model_loader.fetcher(model, width, height),
            cache_decoder: Arc::clone(&self.cache_decoder),
            decoder: Arc::clone(&self.decoder),
            transformation: Arc::clone(&self.transformation),
            encoder: Arc::clone(&self.encoder),
            source_encoder: Arc::clone(&self.source_encoder),
        }
    }
}

impl<M, D, T> Clone for LoadProvider<M, D, T> {
    fn clone(&self) -> Self {
        Self {
            model_loader: Arc::clone(&self.model_loader),
            cache_decoder: Arc::clone(&self.cache_decoder),
            decoder: Arc::clone(&self.decoder),
            transformation: Arc::clone(&self.transformation),
            encoder: Arc::clone(&self.encoder),
            source_encoder: Arc::clone(&self.source_encoder),
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestOptions {
    pub priority: Priority,
    /// Fraction of the target size to load, in (0, 1]
    pub size_multiplier: f32,
    /// Load at this size instead of asking the target
    pub override_size: Option<(u32, u32)>,
    pub memory_cacheable: bool,
    pub disk_cache_strategy: DiskCacheStrategy,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            size_multiplier: 1.0,
            override_size: None,
            memory_cacheable: true,
            disk_cache_strategy: DiskCacheStrategy::default(),
        }
    }
}

impl RequestOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// # Panics
    ///
    /// Panics if `multiplier` is not in (0, 1].
    pub fn with_size_multiplier(mut self, multiplier: f32) -> Self {
        assert!(
            multiplier > 0.0 && multiplier <= 1.0,
            "size multiplier must be in (0, 1], got {}",
            multiplier
        );
        self.size_multiplier = multiplier;
        self
    }

    pub fn with_override_size(mut self, width: u32, height: u32) -> Self {
        self.override_size = Some((width, height));
        self
    }

    pub fn with_memory_cacheable(mut self, memory_cacheable: bool) -> Self {
        self.memory_cacheable = memory_cacheable;
        self
    }

    pub fn with_disk_cache_strategy(mut self, strategy: DiskCacheStrategy) -> Self {
        self.disk_cache_strategy = strategy;
        self
    }

    pub(crate) fn metadata(&self) -> Metadata {
        Metadata::new(self.priority)
            .with_disk_cache_strategy(self.disk_cache_strategy)
            .with_memory_cacheable(self.memory_cacheable)
    }

    /// Applies the size multiplier to a target size.
    pub(crate) fn scaled(&self, width: u32, height: u32) -> (u32, u32) {
        let scale = |v: u32| (self.size_multiplier * v as f32).round() as u32;
        (scale(width), scale(height))
    }
}
