//! resloader - deduplicating, reference-counted resource loading.
//!
//! Callers ask the [`Engine`](engine::Engine) for a resource identified by a
//! source id, a target size and the set of strategies that produce it. The
//! engine
//!
//! - serves it synchronously from a byte-bounded memory cache when it can,
//! - attaches concurrent requests for the same [`Key`](key::Key) to a single
//!   in-flight load,
//! - runs new loads on a bounded worker pool in priority order, reading and
//!   writing a persistent disk cache along the way.
//!
//! Decoded values are shared as explicitly reference-counted
//! [`Resource`](resource::Resource)s and recycled when their last holder
//! releases them.
//!
//! # High-Level API
//!
//! ```ignore
//! use resloader::config::EngineConfig;
//! use resloader::engine::Engine;
//! use resloader::metadata::Metadata;
//! use resloader::strategy::{FileFetcher, ImageDecoder, LoadPipeline};
//!
//! let engine = Engine::from_config(&EngineConfig::default(), tokio::runtime::Handle::current())?;
//! let pipeline = LoadPipeline::new(
//!     Arc::new(FileFetcher::new("photo.jpg")),
//!     Arc::new(ImageDecoder),
//!     Arc::new(ImageDecoder),
//! );
//! let status = engine.load("photo.jpg", 512, 512, pipeline, Metadata::default(), callback);
//! ```
//!
//! For UI-style consumers, [`request::Request`] wraps a load in a state
//! machine bound to a [`request::Target`].

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod logging;
pub mod metadata;
pub mod request;
pub mod resource;
pub mod strategy;

pub use engine::{Engine, EngineStats, LoadStatus, ResourceCallback};
pub use error::LoadError;
pub use key::Key;
pub use metadata::{DiskCacheStrategy, Metadata, Priority};
pub use resource::Resource;

/// Version of the resloader library and CLI.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
