//! Consumer-facing collaborators of a request.

use crate::error::LoadError;
use std::sync::{Arc, Weak};

/// Destination of a request's result.
///
/// All methods may be called from any thread: synchronously inside
/// [`Request::begin`](super::Request::begin) on a memory-cache hit, or on a
/// worker thread otherwise.
pub trait Target<R>: Send + Sync {
    /// Asks the target for its size. The target answers, now or later, by
    /// calling [`SizeReadyCallback::on_size_ready`].
    fn get_size(&self, callback: SizeReadyCallback);

    /// The load did not complete synchronously and is now in flight.
    fn on_load_started(&self) {}

    fn on_resource_ready(&self, resource: &R);

    fn on_load_failed(&self, _error: &LoadError) {}

    /// The request released its resource; the target must stop using it.
    fn on_load_cleared(&self) {}
}

/// Observer that may consume a result before the target sees it.
pub trait RequestListener<M, R>: Send + Sync {
    /// Returns true if the listener handled the result and the target should
    /// not be told. `is_first_image` is false once a coordinated request
    /// already completed on the same target.
    fn on_resource_ready(
        &self,
        _resource: &R,
        _model: &M,
        _from_memory_cache: bool,
        _is_first_image: bool,
    ) -> bool {
        false
    }

    /// Returns true if the listener handled the failure.
    fn on_exception(&self, _error: &LoadError, _model: Option<&M>, _is_first_image: bool) -> bool {
        false
    }
}

/// Receiver of a size answer, implemented by requests.
pub(crate) trait SizeReadyHandler: Send + Sync {
    fn on_size_ready(self: Arc<Self>, generation: u64, width: u32, height: u32);
}

/// One-shot answer to [`Target::get_size`].
///
/// Answers for a request that has since been restarted, cancelled, cleared
/// or dropped are ignored.
pub struct SizeReadyCallback {
    handler: Weak<dyn SizeReadyHandler>,
    generation: u64,
}

impl SizeReadyCallback {
    pub(crate) fn new(handler: Weak<dyn SizeReadyHandler>, generation: u64) -> Self {
        Self {
            handler,
            generation,
        }
    }

    pub fn on_size_ready(self, width: u32, height: u32) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_size_ready(self.generation, width, height);
        }
    }
}

impl std::fmt::Debug for SizeReadyCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizeReadyCallback")
            .field("generation", &self.generation)
            .finish()
    }
}
