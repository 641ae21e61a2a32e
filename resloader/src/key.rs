//! Load identity used for deduplication and cache lookup.
//!
//! Two loads are the same logical load when their keys are equal: same source,
//! same target size, and the same decode/transform/encode pipeline. The engine
//! relies on this to coalesce concurrent requests and to share memory cache
//! entries between callers.

use sha2::{Digest, Sha256};
use std::fmt;

/// Cache and deduplication key for one load.
///
/// Keys are immutable once constructed. Build them through
/// [`LoadPipeline::key`](crate::strategy::LoadPipeline::key) so the pipeline
/// identity always matches the strategies actually used.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    id: String,
    width: u32,
    height: u32,
    cache_decoder: String,
    decoder: String,
    transformation: String,
    encoder: String,
    source_encoder: String,
}

impl Key {
    /// Creates a key from a source id, target size and pipeline identities.
    pub fn new(id: impl Into<String>, width: u32, height: u32, pipeline: PipelineIds) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            cache_decoder: pipeline.cache_decoder,
            decoder: pipeline.decoder,
            transformation: pipeline.transformation,
            encoder: pipeline.encoder,
            source_encoder: pipeline.source_encoder,
        }
    }

    /// Source identity (e.g. a path or URL).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Requested width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Requested height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Key under which the untransformed source data is persisted.
    ///
    /// Only the source id and the source encoder participate, so every size
    /// requested from one source shares a single persisted original.
    pub fn source_key(&self) -> Key {
        Key {
            id: self.id.clone(),
            width: 0,
            height: 0,
            cache_decoder: String::new(),
            decoder: String::new(),
            transformation: String::new(),
            encoder: String::new(),
            source_encoder: self.source_encoder.clone(),
        }
    }

    /// Stable file name for the persistent cache (SHA-256, lowercase hex).
    pub fn disk_name(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.id.as_str(),
            &self.width.to_string(),
            &self.height.to_string(),
            &self.cache_decoder,
            &self.decoder,
            &self.transformation,
            &self.encoder,
            &self.source_encoder,
        ] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}x{}", self.id, self.width, self.height)
    }
}

/// Identities of the strategies that make up a load pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineIds {
    pub cache_decoder: String,
    pub decoder: String,
    pub transformation: String,
    pub encoder: String,
    pub source_encoder: String,
}
