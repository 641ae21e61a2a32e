//! Consumer-side requests.
//!
//! A [`Request`] drives one model into one [`Target`]: it resolves the
//! target's size, builds a pipeline through its [`LoadProvider`], starts the
//! load on the [`Engine`] and holds the delivered resource until cleared.
//!
//! # States
//!
//! ```text
//!         begin            result            (any) clear
//! Idle ──────────► Running ───────► Complete ─────────────► Cleared
//!                     │    └──────► Failed
//!                     └─ cancel ──► Cancelled
//! ```
//!
//! Every `begin`, `cancel`, `clear` and pool reuse bumps the request's
//! generation. Size answers and load results carry the generation they were
//! issued for and are ignored once it is stale.
//!
//! Requests that share a target, such as a thumbnail and its full-size
//! image, consult a [`RequestCoordinator`] before touching the target.

mod coordinator;
mod pool;
mod provider;
mod target;


pub use coordinator::{RequestCoordinator, ThumbnailCoordinator};
pub use pool::{RequestId, RequestPool};
pub use provider::{LoadProvider, ModelLoader, RequestOptions};
pub use target::{RequestListener, SizeReadyCallback, Target};

use crate::engine::{Engine, LoadStatus, ResourceCallback};
use crate::error::LoadError;
use crate::resource::{Resource, Transcode};
use parking_lot::Mutex;
use std::any::type_name;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use target::SizeReadyHandler;
use tracing::{debug, trace, warn};

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Created or recycled, not yet begun
    Idle,
    /// Waiting for a size or a load result
    Running,
    /// Holding a delivered resource, or finished with the result withheld
    /// by a coordinator
    Complete,
    Failed,
    Cancelled,
    /// Resource released and target told to stop using it
    Cleared,
}

/// What a request loads, with which strategies, into which target.
pub struct RequestSetup<M, D, T, R> {
    pub engine: Engine<T>,
    pub provider: LoadProvider<M, D, T>,
    pub model: Option<Arc<M>>,
    pub target: Arc<dyn Target<R>>,
    pub listener: Option<Arc<dyn RequestListener<M, R>>>,
    pub coordinator: Option<Arc<dyn RequestCoordinator>>,
    pub options: RequestOptions,
}

impl<M, D, T, R> RequestSetup<M, D, T, R> {
    pub fn new(
        engine: Engine<T>,
        provider: LoadProvider<M, D, T>,
        model: Option<M>,
        target: Arc<dyn Target<R>>,
    ) -> Self {
        Self {
            engine,
            provider,
            model: model.map(Arc::new),
            target,
            listener: None,
            coordinator: None,
            options: RequestOptions::default(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn RequestListener<M, R>>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_coordinator(mut self, coordinator: Arc<dyn RequestCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

struct RequestState<M, D, T, R> {
    status: RequestStatus,
    generation: u64,
    setup: Option<RequestSetup<M, D, T, R>>,
    resource: Option<Resource<T>>,
    load_status: Option<LoadStatus<T>>,
    /// Thread currently inside `Engine::load` for this request. A result
    /// delivered on that thread before `load` returns came from the memory
    /// cache.
    loading_thread: Option<ThreadId>,
    loaded_from_memory_cache: bool,
}

/// Parties to notify once the state lock is dropped.
struct Notify<M, R> {
    target: Arc<dyn Target<R>>,
    listener: Option<Arc<dyn RequestListener<M, R>>>,
    coordinator: Option<Arc<dyn RequestCoordinator>>,
    model: Option<Arc<M>>,
}

impl<M, R> Notify<M, R> {
    fn can_notify_status(&self) -> bool {
        self.coordinator
            .as_ref()
            .map_or(true, |coordinator| coordinator.can_notify_status())
    }

    fn is_first_image(&self) -> bool {
        self.coordinator
            .as_ref()
            .map_or(true, |coordinator| !coordinator.is_any_request_complete())
    }
}

impl<M, D, T, R> RequestState<M, D, T, R> {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.status == RequestStatus::Running
    }

    fn notify(&self) -> Option<Notify<M, R>> {
        self.setup.as_ref().map(|setup| Notify {
            target: Arc::clone(&setup.target),
            listener: setup.listener.clone(),
            coordinator: setup.coordinator.clone(),
            model: setup.model.clone(),
        })
    }
}

struct RequestInner<M, D, T, R> {
    state: Mutex<RequestState<M, D, T, R>>,
}

/// Handle to a request. Clones refer to the same request.
pub struct Request<M, D, T, R> {
    inner: Arc<RequestInner<M, D, T, R>>,
}

impl<M, D, T, R> Clone for Request<M, D, T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M, D, T, R> Request<M, D, T, R>
where
    M: Send + Sync + 'static,
    D: Send + 'static,
    T: Transcode<R> + Send + Sync + 'static,
    R: 'static,
{
    pub fn new(setup: RequestSetup<M, D, T, R>) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                state: Mutex::new(RequestState {
                    status: RequestStatus::Idle,
                    generation: 0,
                    setup: Some(setup),
                    resource: None,
                    load_status: None,
                    loading_thread: None,
                    loaded_from_memory_cache: false,
                }),
            }),
        }
    }

    /// Starts the request. Does nothing while it is already running.
    pub fn begin(&self) {
        self.inner.begin();
    }

    /// Stops a running request. A resource it already holds is kept.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Cancels the request, releases its resource and tells the target.
    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn status(&self) -> RequestStatus {
        self.inner.state.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == RequestStatus::Running
    }

    pub fn is_complete(&self) -> bool {
        self.status() == RequestStatus::Complete
    }

    pub fn is_failed(&self) -> bool {
        self.status() == RequestStatus::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == RequestStatus::Cancelled
    }

    pub fn is_cleared(&self) -> bool {
        self.status() == RequestStatus::Cleared
    }

    /// Returns true if the held resource was delivered synchronously from
    /// the memory cache.
    pub fn loaded_from_memory_cache(&self) -> bool {
        self.inner.state.lock().loaded_from_memory_cache
    }

    pub fn has_resource(&self) -> bool {
        self.inner.state.lock().resource.is_some()
    }

    /// Runs `f` on the held result, if any.
    pub fn with_result<U>(&self, f: impl FnOnce(&R) -> U) -> Option<U> {
        let resource = {
            let state = self.inner.state.lock();
            let resource = state.resource.clone()?;
            resource.acquire();
            resource
        };
        let out = Transcode::<R>::transcode(&*resource.get()).map(f);
        resource.release();
        out
    }

    pub(crate) fn recycle(&self) {
        self.inner.clear();
        let mut state = self.inner.state.lock();
        state.setup = None;
        state.status = RequestStatus::Idle;
        state.generation += 1;
        state.loading_thread = None;
        state.loaded_from_memory_cache = false;
    }

    pub(crate) fn reinit(&self, setup: RequestSetup<M, D, T, R>) {
        let mut state = self.inner.state.lock();
        debug_assert!(state.resource.is_none() && state.load_status.is_none());
        state.setup = Some(setup);
        state.status = RequestStatus::Idle;
        state.generation += 1;
    }

    #[cfg(test)]
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<M, D, T, R> std::fmt::Debug for Request<M, D, T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Request")
            .field("status", &state.status)
            .field("generation", &state.generation)
            .field("has_resource", &state.resource.is_some())
            .finish()
    }
}

enum Start<M, R> {
    Sized { generation: u64, width: u32, height: u32, notify: Notify<M, R> },
    AskTarget { generation: u64, notify: Notify<M, R> },
    NoModel(Notify<M, R>),
}

enum Delivery<M, R, T> {
    Deliver(Notify<M, R>, bool, Option<Resource<T>>),
    Mismatch(Notify<M, R>),
    /// Another request owns the target now
    Withheld,
}

impl<M, D, T, R> RequestInner<M, D, T, R>
where
    M: Send + Sync + 'static,
    D: Send + 'static,
    T: Transcode<R> + Send + Sync + 'static,
    R: 'static,
{
    fn begin(self: &Arc<Self>) {
        let start = {
            let mut state = self.state.lock();
            if state.status == RequestStatus::Running {
                return;
            }
            let Some(setup) = state.setup.as_ref() else {
                warn!("begin() called on a recycled request");
                return;
            };
            let has_model = setup.model.is_some();
            let override_size = setup.options.override_size;

            state.generation += 1;
            let generation = state.generation;
            let Some(notify) = state.notify() else { return };
            if !has_model {
                state.status = RequestStatus::Failed;
                Start::NoModel(notify)
            } else {
                state.status = RequestStatus::Running;
                match override_size {
                    Some((width, height)) => Start::Sized {
                        generation,
                        width,
                        height,
                        notify,
                    },
                    None => Start::AskTarget { generation, notify },
                }
            }
        };

        match start {
            Start::NoModel(notify) => notify_failure(notify, &LoadError::MissingModel),
            Start::Sized {
                generation,
                width,
                height,
                notify,
            } => {
                Arc::clone(self).start_load(generation, width, height);
                self.notify_started(generation, &notify);
            }
            Start::AskTarget { generation, notify } => {
                let weak = Arc::downgrade(self);
                let handler: Weak<dyn SizeReadyHandler> = weak;
                notify
                    .target
                    .get_size(SizeReadyCallback::new(handler, generation));
                self.notify_started(generation, &notify);
            }
        }
    }

    fn notify_started(&self, generation: u64, notify: &Notify<M, R>) {
        if self.state.lock().is_current(generation) && notify.can_notify_status() {
            notify.target.on_load_started();
        }
    }

    fn start_load(self: Arc<Self>, generation: u64, width: u32, height: u32) {
        let (engine, provider, model, options) = {
            let mut state = self.state.lock();
            if !state.is_current(generation) {
                trace!(generation, "Ignoring stale size answer");
                return;
            }
            let Some(setup) = state.setup.as_ref() else { return };
            let Some(model) = setup.model.clone() else { return };
            let captured = (setup.engine.clone(), setup.provider.clone(), model, setup.options);
            state.loading_thread = Some(thread::current().id());
            captured
        };

        let (width, height) = options.scaled(width, height);
        let id = provider.model_loader.id(&model);
        let pipeline = provider.pipeline(&model, width, height);
        let callback = Arc::new(RequestCallback {
            request: Arc::downgrade(&self),
            generation,
        });
        debug!(id = %id, width, height, "Request starting load");

        let status = engine.load(&id, width, height, pipeline, options.metadata(), callback);

        let stale = {
            let mut state = self.state.lock();
            state.loading_thread = None;
            if state.is_current(generation) {
                state.load_status = status;
                None
            } else {
                status
            }
        };
        if let Some(status) = stale {
            status.cancel();
        }
    }

    fn on_resource_ready(&self, generation: u64, resource: &Resource<T>) {
        let coordinator = {
            let state = self.state.lock();
            if !state.is_current(generation) {
                trace!(generation, "Ignoring stale load result");
                return;
            }
            state.setup.as_ref().and_then(|setup| setup.coordinator.clone())
        };
        let can_set_image = coordinator
            .as_ref()
            .map_or(true, |coordinator| coordinator.can_set_image());

        let outcome = {
            let mut state = self.state.lock();
            if !state.is_current(generation) {
                trace!(generation, "Ignoring stale load result");
                return;
            }
            let Some(notify) = state.notify() else { return };

            state.load_status = None;
            if !can_set_image {
                state.status = RequestStatus::Complete;
                Delivery::Withheld
            } else if Transcode::<R>::transcode(&*resource.get()).is_some() {
                resource.acquire();
                state.status = RequestStatus::Complete;
                state.loaded_from_memory_cache =
                    state.loading_thread == Some(thread::current().id());
                let previous = state.resource.replace(resource.clone());
                Delivery::Deliver(notify, state.loaded_from_memory_cache, previous)
            } else {
                state.status = RequestStatus::Failed;
                Delivery::Mismatch(notify)
            }
        };

        match outcome {
            Delivery::Withheld => {
                debug!(generation, "Coordinator withheld the result from the target");
            }
            Delivery::Deliver(notify, from_memory_cache, previous) => {
                let is_first_image = notify.is_first_image();
                // Pinned so a clear() from inside the target cannot recycle
                // the value while it is borrowed.
                resource.acquire();
                {
                    let value = resource.get();
                    if let Some(result) = Transcode::<R>::transcode(&*value) {
                        let handled = match (&notify.listener, &notify.model) {
                            (Some(listener), Some(model)) => listener.on_resource_ready(
                                result,
                                model,
                                from_memory_cache,
                                is_first_image,
                            ),
                            _ => false,
                        };
                        if !handled {
                            notify.target.on_resource_ready(result);
                        }
                    }
                }
                resource.release();
                if let Some(previous) = previous {
                    previous.release();
                }
                if let Some(coordinator) = &notify.coordinator {
                    coordinator.on_request_complete();
                }
            }
            Delivery::Mismatch(notify) => {
                let error = LoadError::TypeMismatch {
                    expected: type_name::<R>(),
                    actual: type_name::<T>(),
                };
                warn!(error = %error, "Delivered resource has the wrong type");
                notify_failure(notify, &error);
            }
        }
    }

    fn on_exception(&self, generation: u64, error: &LoadError) {
        let notify = {
            let mut state = self.state.lock();
            if !state.is_current(generation) {
                return;
            }
            state.status = RequestStatus::Failed;
            state.load_status = None;
            state.notify()
        };
        if let Some(notify) = notify {
            notify_failure(notify, error);
        }
    }

    fn cancel(&self) {
        let status = {
            let mut state = self.state.lock();
            if state.status != RequestStatus::Running {
                return;
            }
            state.status = RequestStatus::Cancelled;
            state.generation += 1;
            state.load_status.take()
        };
        if let Some(status) = status {
            status.cancel();
        }
    }

    fn clear(&self) {
        let (status, resource, target) = {
            let mut state = self.state.lock();
            if state.status == RequestStatus::Cleared {
                return;
            }
            state.status = RequestStatus::Cleared;
            state.generation += 1;
            let target = state.setup.as_ref().map(|setup| Arc::clone(&setup.target));
            (state.load_status.take(), state.resource.take(), target)
        };

        if let Some(status) = status {
            status.cancel();
        }
        if let Some(target) = target {
            target.on_load_cleared();
        }
        if let Some(resource) = resource {
            resource.release();
        }
    }
}

fn notify_failure<M, R>(notify: Notify<M, R>, error: &LoadError) {
    let is_first_image = notify.is_first_image();
    let handled = notify.listener.as_ref().is_some_and(|listener| {
        listener.on_exception(error, notify.model.as_deref(), is_first_image)
    });
    if !handled && notify.can_notify_status() {
        notify.target.on_load_failed(error);
    }
}

impl<M, D, T, R> SizeReadyHandler for RequestInner<M, D, T, R>
where
    M: Send + Sync + 'static,
    D: Send + 'static,
    T: Transcode<R> + Send + Sync + 'static,
    R: 'static,
{
    fn on_size_ready(self: Arc<Self>, generation: u64, width: u32, height: u32) {
        self.start_load(generation, width, height);
    }
}

/// Engine callback bound to one generation of a request.
struct RequestCallback<M, D, T, R> {
    request: Weak<RequestInner<M, D, T, R>>,
    generation: u64,
}

impl<M, D, T, R> ResourceCallback<T> for RequestCallback<M, D, T, R>
where
    M: Send + Sync + 'static,
    D: Send + 'static,
    T: Transcode<R> + Send + Sync + 'static,
    R: 'static,
{
    fn on_resource_ready(&self, resource: &Resource<T>) {
        if let Some(request) = self.request.upgrade() {
            request.on_resource_ready(self.generation, resource);
        }
    }

    fn on_exception(&self, error: &LoadError) {
        if let Some(request) = self.request.upgrade() {
            request.on_exception(self.generation, error);
        }
    }
}
