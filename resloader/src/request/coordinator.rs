//! Coordination between requests that share one target.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Decides what a request may show on a target it shares with other
/// requests, such as a low resolution thumbnail loading next to the
/// full-size image.
pub trait RequestCoordinator: Send + Sync {
    /// Whether the request may hand its result to the target.
    fn can_set_image(&self) -> bool;

    /// Whether the request may tell the target that a load started or failed.
    fn can_notify_status(&self) -> bool;

    /// Whether any coordinated request has completed already.
    fn is_any_request_complete(&self) -> bool;

    /// Records that the request delivered its result.
    fn on_request_complete(&self);
}

#[derive(Debug, Default)]
struct PairState {
    full_complete: AtomicBool,
    thumbnail_complete: AtomicBool,
}

impl PairState {
    fn any_complete(&self) -> bool {
        self.full_complete.load(Ordering::Acquire) || self.thumbnail_complete.load(Ordering::Acquire)
    }
}

/// Pairs a full-size request with a thumbnail request.
///
/// The thumbnail is shown only until the full image arrives, and never
/// reports status. The full request reports failure only while no image is
/// shown.
#[derive(Debug, Clone)]
pub struct ThumbnailCoordinator {
    state: Arc<PairState>,
    is_thumbnail: bool,
}

impl ThumbnailCoordinator {
    /// Returns the (full, thumbnail) views of one new pair.
    pub fn pair() -> (Arc<ThumbnailCoordinator>, Arc<ThumbnailCoordinator>) {
        let state = Arc::new(PairState::default());
        let full = Arc::new(Self {
            state: Arc::clone(&state),
            is_thumbnail: false,
        });
        let thumbnail = Arc::new(Self {
            state,
            is_thumbnail: true,
        });
        (full, thumbnail)
    }
}

impl RequestCoordinator for ThumbnailCoordinator {
    fn can_set_image(&self) -> bool {
        !self.is_thumbnail || !self.state.full_complete.load(Ordering::Acquire)
    }

    fn can_notify_status(&self) -> bool {
        !self.is_thumbnail && !self.state.any_complete()
    }

    fn is_any_request_complete(&self) -> bool {
        self.state.any_complete()
    }

    fn on_request_complete(&self) {
        let flag = if self.is_thumbnail {
            &self.state.thumbnail_complete
        } else {
            &self.state.full_complete
        };
        flag.store(true, Ordering::Release);
    }
}
