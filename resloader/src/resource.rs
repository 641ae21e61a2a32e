//! Reference-counted decoded resources.
//!
//! A [`Resource`] wraps one decoded value together with a byte-size estimate
//! and an explicit acquisition count. Every holder (memory cache entry, job
//! fan-out, consumer request) performs exactly one [`Resource::acquire`] when
//! it starts holding the resource and exactly one [`Resource::release`] when
//! it is done. The value is recycled on the transition from one holder to
//! none.
//!
//! Cloning a `Resource` only copies the handle. It does not acquire.
//!
//! # Lifecycle
//!
//! ```text
//! decode ──► count 0 ──► acquire (runner pin) ──► cache / waiters acquire
//!                                                        │
//!                           recycled ◄── release to 0 ◄──┘
//! ```

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Sentinel stored in the count once the value has been recycled.
const RECYCLED: usize = usize::MAX;

/// Callback receiving the value when the last holder releases it.
pub type Recycler<T> = Box<dyn Fn(T) + Send + Sync>;

/// Type-erased decoded value, for engines serving heterogeneous pipelines.
pub type AnyValue = Box<dyn Any + Send + Sync>;

/// Handle to a reference-counted decoded value.
pub struct Resource<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    value: RwLock<Option<T>>,
    size: usize,
    acquired: AtomicUsize,
    recycler: Option<Recycler<T>>,
}

impl<T> Resource<T> {
    /// Wraps a freshly decoded value. The acquisition count starts at zero.
    pub fn new(value: T, size: usize) -> Self {
        Self::build(value, size, None)
    }

    /// Wraps a value that is handed to `recycler` instead of being dropped
    /// when the last holder releases it (e.g. returned to a buffer pool).
    pub fn with_recycler(value: T, size: usize, recycler: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self::build(value, size, Some(Box::new(recycler)))
    }

    fn build(value: T, size: usize, recycler: Option<Recycler<T>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: RwLock::new(Some(value)),
                size,
                acquired: AtomicUsize::new(0),
                recycler,
            }),
        }
    }

    /// Borrows the value.
    ///
    /// # Panics
    ///
    /// Panics if the resource has already been recycled.
    pub fn get(&self) -> MappedRwLockReadGuard<'_, T> {
        RwLockReadGuard::try_map(self.inner.value.read(), Option::as_ref)
            .unwrap_or_else(|_| panic!("resource used after it was recycled"))
    }

    /// Byte-size estimate used for cache accounting.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Current number of holders.
    pub fn acquired(&self) -> usize {
        match self.inner.acquired.load(Ordering::Acquire) {
            RECYCLED => 0,
            n => n,
        }
    }

    /// Returns true once the value has been handed back for recycling.
    pub fn is_recycled(&self) -> bool {
        self.inner.acquired.load(Ordering::Acquire) == RECYCLED
    }

    /// Registers one more holder.
    ///
    /// # Panics
    ///
    /// Panics if the resource has already been recycled.
    pub fn acquire(&self) {
        let result = self
            .inner
            .acquired
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match n {
                RECYCLED => None,
                n => Some(n + 1),
            });
        if result.is_err() {
            panic!("cannot acquire a recycled resource");
        }
    }

    /// Drops one holder, recycling the value when the last one leaves.
    ///
    /// # Panics
    ///
    /// Panics when there is no outstanding acquisition to release.
    pub fn release(&self) {
        let result = self
            .inner
            .acquired
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match n {
                0 | RECYCLED => None,
                1 => Some(RECYCLED),
                n => Some(n - 1),
            });
        match result {
            Ok(1) => self.recycle(),
            Ok(_) => {}
            Err(RECYCLED) => panic!("cannot release a recycled resource"),
            Err(_) => panic!("cannot release a resource that was never acquired"),
        }
    }

    /// Returns true if both handles refer to the same resource.
    pub fn ptr_eq(&self, other: &Resource<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn recycle(&self) {
        let value = self.inner.value.write().take();
        if let Some(value) = value {
            match &self.inner.recycler {
                Some(recycler) => recycler(value),
                None => drop(value),
            }
        }
    }
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("size", &self.inner.size)
            .field("acquired", &self.acquired())
            .field("recycled", &self.is_recycled())
            .finish()
    }
}

/// Run-time view of a decoded value as a consumer's expected result type.
///
/// Returns `None` when the value is not an `R`, which consumers report as a
/// type mismatch instead of crashing.
pub trait Transcode<R> {
    fn transcode(&self) -> Option<&R>;
}

impl<R: Any> Transcode<R> for AnyValue {
    fn transcode(&self) -> Option<&R> {
        (**self).downcast_ref::<R>()
    }
}

/// Implements `Transcode<T> for T` for concrete result types, so requests can
/// consume them without type erasure.
macro_rules! transcode_as_self {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::resource::Transcode<$ty> for $ty {
                fn transcode(&self) -> Option<&$ty> {
                    Some(self)
                }
            }
        )*
    };
}

pub(crate) use transcode_as_self;

transcode_as_self!(Vec<u8>, String);
