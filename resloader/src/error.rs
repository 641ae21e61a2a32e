//! Error types for loads.
//!
//! Strategy-level errors ([`FetchError`], [`DecodeError`]) are raised by
//! collaborators. The runner converts them into a single [`LoadError`] that the
//! job fans out to every waiter, so `LoadError` is cheap to clone.

use thiserror::Error;

/// Terminal failure of one load, as seen by callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The fetch strategy failed or produced no data
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// The decoder failed or produced no resource
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// The delivered value is not of the consumer's expected result type
    #[error("expected a resource of type {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// The load was cancelled before it produced a result
    #[error("load cancelled")]
    Cancelled,

    /// The request had no model to load
    #[error("no model to load")]
    MissingModel,

    /// A strategy panicked on the worker thread
    #[error("load panicked: {0}")]
    Panicked(String),
}

/// Errors raised by a [`DataFetcher`](crate::strategy::DataFetcher).
#[derive(Debug, Error)]
pub enum FetchError {
    /// Underlying I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The fetch was aborted through its cancellation token
    #[error("fetch cancelled")]
    Cancelled,

    /// Any other transport failure
    #[error("{0}")]
    Other(String),
}

/// Errors raised by a [`ResourceDecoder`](crate::strategy::ResourceDecoder).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The data is not in a format this decoder understands
    #[error("unsupported or corrupt data: {0}")]
    InvalidData(String),

    /// Underlying I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FetchError> for LoadError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => LoadError::Cancelled,
            other => LoadError::FetchFailed(other.to_string()),
        }
    }
}

impl From<DecodeError> for LoadError {
    fn from(err: DecodeError) -> Self {
        LoadError::DecodeFailed(err.to_string())
    }
}
