//! Arena of reusable requests.
//!
//! Live requests are addressed by [`RequestId`], a versioned slot key, so an
//! id kept past [`RequestPool::release`] resolves to `None` instead of to
//! whichever request reuses the slot. Released requests are cleared and
//! parked on a free list for the next [`RequestPool::obtain`].

use super::{Request, RequestSetup};
use crate::resource::Transcode;
use slotmap::{new_key_type, SlotMap};
use tracing::trace;

new_key_type! {
    /// Handle to a live request in a [`RequestPool`].
    pub struct RequestId;
}

/// Default number of recycled requests kept for reuse.
pub const DEFAULT_MAX_FREE: usize = 32;

pub struct RequestPool<M, D, T, R> {
    live: SlotMap<RequestId, Request<M, D, T, R>>,
    free: Vec<Request<M, D, T, R>>,
    max_free: usize,
}

impl<M, D, T, R> RequestPool<M, D, T, R>
where
    M: Send + Sync + 'static,
    D: Send + 'static,
    T: Transcode<R> + Send + Sync + 'static,
    R: 'static,
{
    pub fn new() -> Self {
        Self::with_max_free(DEFAULT_MAX_FREE)
    }

    pub fn with_max_free(max_free: usize) -> Self {
        Self {
            live: SlotMap::with_key(),
            free: Vec::new(),
            max_free,
        }
    }

    /// Returns a request for `setup`, reusing a recycled instance if one is free.
    pub fn obtain(&mut self, setup: RequestSetup<M, D, T, R>) -> RequestId {
        let request = match self.free.pop() {
            Some(request) => {
                request.reinit(setup);
                request
            }
            None => Request::new(setup),
        };
        self.live.insert(request)
    }

    pub fn get(&self, id: RequestId) -> Option<&Request<M, D, T, R>> {
        self.live.get(id)
    }

    /// Clears the request and recycles it. Returns false for a stale id.
    pub fn release(&mut self, id: RequestId) -> bool {
        let Some(request) = self.live.remove(id) else {
            return false;
        };
        request.recycle();
        if self.free.len() < self.max_free {
            self.free.push(request);
        } else {
            trace!("Request pool full, dropping recycled request");
        }
        true
    }

    /// Number of live requests.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Number of recycled requests waiting for reuse.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

impl<M, D, T, R> Default for RequestPool<M, D, T, R>
where
    M: Send + Sync + 'static,
    D: Send + 'static,
    T: Transcode<R> + Send + Sync + 'static,
    R: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
