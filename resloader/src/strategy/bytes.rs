//! Byte-oriented fetchers, pass-through encoders and the identity transformation.

use super::{DataFetcher, ResourceEncoder, SourceEncoder, Transformation};
use crate::error::FetchError;
use crate::metadata::Metadata;
use crate::resource::Resource;
use std::fs::File;
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Read size between cancellation checks.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Serves a fixed in-memory buffer.
#[derive(Debug, Clone)]
pub struct BytesFetcher {
    data: Arc<[u8]>,
}

impl BytesFetcher {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl DataFetcher<Vec<u8>> for BytesFetcher {
    fn load_data(
        &self,
        _metadata: &Metadata,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        Ok(Some(self.data.to_vec()))
    }
}

/// Reads a local file in chunks, checking for cancellation between reads.
///
/// A missing file is a fetch failure, not an absent source.
#[derive(Debug)]
pub struct FileFetcher {
    path: PathBuf,
    aborted: AtomicBool,
}

impl FileFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            aborted: AtomicBool::new(false),
        }
    }

    fn is_aborted(&self, cancel: &CancellationToken) -> bool {
        cancel.is_cancelled() || self.aborted.load(Ordering::Acquire)
    }
}

impl DataFetcher<Vec<u8>> for FileFetcher {
    fn load_data(
        &self,
        _metadata: &Metadata,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, FetchError> {
        let mut file = File::open(&self.path)?;
        let mut data = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            if self.is_aborted(cancel) {
                trace!(path = %self.path.display(), "File fetch aborted");
                return Err(FetchError::Cancelled);
            }
            let n = file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..n]);
        }

        Ok(Some(data))
    }

    fn cancel(&self) {
        self.aborted.store(true, Ordering::Release);
    }
}

/// Resource encoder that never writes anything.
pub struct NullEncoder<T> {
    _marker: PhantomData<fn(T)>,
}

impl<T> NullEncoder<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for NullEncoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResourceEncoder<T> for NullEncoder<T> {
    fn encode(&self, _resource: &Resource<T>, _sink: &mut dyn Write) -> bool {
        false
    }

    fn id(&self) -> &str {
        ""
    }
}

/// Source encoder that never writes anything.
pub struct NullSourceEncoder<D> {
    _marker: PhantomData<fn(D)>,
}

impl<D> NullSourceEncoder<D> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<D> Default for NullSourceEncoder<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> SourceEncoder<D> for NullSourceEncoder<D> {
    fn encode(&self, _data: &D, _sink: &mut dyn Write) -> bool {
        false
    }

    fn id(&self) -> &str {
        ""
    }
}

/// Writes raw fetched bytes unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesSourceEncoder;

impl SourceEncoder<Vec<u8>> for BytesSourceEncoder {
    fn encode(&self, data: &Vec<u8>, sink: &mut dyn Write) -> bool {
        match sink.write_all(data) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to write source data");
                false
            }
        }
    }

    fn id(&self) -> &str {
        "resloader.BytesSourceEncoder"
    }
}

/// Transformation returning its input unchanged.
pub struct UnitTransformation<T> {
    _marker: PhantomData<fn(T)>,
}

impl<T> UnitTransformation<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for UnitTransformation<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Transformation<T> for UnitTransformation<T> {
    fn transform(&self, resource: Resource<T>, _width: u32, _height: u32) -> Resource<T> {
        resource
    }

    fn id(&self) -> &str {
        ""
    }
}
