//! In-flight load jobs.
//!
//! A [`LoadJob`] is the single in-flight load for one [`Key`]. Every caller
//! that asks for the same key while the job runs attaches a callback to it,
//! and the job fans the runner's one result out to all of them.
//!
//! # Lifecycle
//!
//! ```text
//! Running ──► Succeeded   result delivered, resource memory-cached
//!    │   └──► Failed      error delivered
//!    └──────► Cancelled   last waiter detached; late results are discarded
//! ```
//!
//! A job is registered in the engine's job table exactly while it is
//! `Running`. Lock order is job table, then job state, then memory cache.
//! No callback runs under any of those locks.

use crate::engine::{EngineShared, ResourceCallback};
use crate::error::LoadError;
use crate::key::Key;
use crate::resource::Resource;
use crate::strategy::DataFetcher;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Identifies one attached callback within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Status of a load job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Cancellation handle shared between a job and its runner.
///
/// Cancelling fires the runner's token and asks the fetcher to abort, once.
pub(crate) struct RunnerControl {
    token: CancellationToken,
    cancelled: AtomicBool,
    abort: Box<dyn Fn() + Send + Sync>,
}

impl RunnerControl {
    pub fn new<D: 'static>(fetcher: Arc<dyn DataFetcher<D>>) -> Self {
        Self {
            token: CancellationToken::new(),
            cancelled: AtomicBool::new(false),
            abort: Box::new(move || fetcher.cancel()),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.token.cancel();
            (self.abort)();
        }
    }
}

struct JobState<T> {
    status: JobStatus,
    callbacks: Vec<(CallbackId, Arc<dyn ResourceCallback<T>>)>,
    next_callback_id: u64,
}

pub(crate) struct LoadJob<T> {
    key: Key,
    memory_cacheable: bool,
    shared: Weak<EngineShared<T>>,
    control: Arc<RunnerControl>,
    state: Mutex<JobState<T>>,
}

type JobTable<T> = HashMap<Key, Arc<LoadJob<T>>>;

impl<T: Send + Sync + 'static> LoadJob<T> {
    pub fn new(
        key: Key,
        memory_cacheable: bool,
        shared: Weak<EngineShared<T>>,
        control: Arc<RunnerControl>,
    ) -> Self {
        Self {
            key,
            memory_cacheable,
            shared,
            control,
            state: Mutex::new(JobState {
                status: JobStatus::Running,
                callbacks: Vec::new(),
                next_callback_id: 0,
            }),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    pub fn waiter_count(&self) -> usize {
        self.state.lock().callbacks.len()
    }

    /// Attaches a waiter. Called with the job table locked, so the job is
    /// still `Running`.
    pub fn add_callback(&self, callback: Arc<dyn ResourceCallback<T>>) -> CallbackId {
        let mut state = self.state.lock();
        debug_assert_eq!(state.status, JobStatus::Running);
        let id = CallbackId(state.next_callback_id);
        state.next_callback_id += 1;
        state.callbacks.push((id, callback));
        id
    }

    /// Detaches one waiter. When no waiters remain the job is cancelled.
    ///
    /// A no-op once the job is terminal.
    pub fn remove_callback(&self, id: CallbackId) {
        let shared = self.shared.upgrade();
        {
            let mut table = shared.as_ref().map(|s| s.jobs.lock());
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return;
            }

            state.callbacks.retain(|(cb_id, _)| *cb_id != id);
            if !state.callbacks.is_empty() {
                trace!(key = %self.key, remaining = state.callbacks.len(), "Waiter detached");
                return;
            }
            self.mark_cancelled(&mut state, table.as_deref_mut(), shared.as_deref());
        }
        self.cancel_runner();
    }

    /// Cancels the job outright, detaching every waiter.
    pub fn cancel(&self) {
        let shared = self.shared.upgrade();
        {
            let mut table = shared.as_ref().map(|s| s.jobs.lock());
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return;
            }
            state.callbacks.clear();
            self.mark_cancelled(&mut state, table.as_deref_mut(), shared.as_deref());
        }
        self.cancel_runner();
    }

    /// Ends a job whose runner was never started, telling every waiter.
    pub fn reject(&self, error: LoadError) {
        let shared = self.shared.upgrade();
        let callbacks = {
            let mut table = shared.as_ref().map(|s| s.jobs.lock());
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return;
            }
            let callbacks = std::mem::take(&mut state.callbacks);
            self.mark_cancelled(&mut state, table.as_deref_mut(), shared.as_deref());
            callbacks
        };
        self.cancel_runner();

        debug!(key = %self.key, error = %error, waiters = callbacks.len(), "Load rejected");
        for (_, callback) in &callbacks {
            callback.on_exception(&error);
        }
    }

    fn mark_cancelled(
        &self,
        state: &mut MutexGuard<'_, JobState<T>>,
        table: Option<&mut JobTable<T>>,
        shared: Option<&EngineShared<T>>,
    ) {
        state.status = JobStatus::Cancelled;
        if let Some(table) = table {
            self.deregister(table);
        }
        if let Some(shared) = shared {
            shared.stats.record_cancelled();
        }
    }

    /// Fires the runner's token and aborts the fetcher. Called with no locks
    /// held, as the fetcher's `cancel` is collaborator code.
    fn cancel_runner(&self) {
        self.control.cancel();
        debug!(key = %self.key, "Load cancelled");
    }

    /// Delivers a produced resource to every waiter.
    ///
    /// `resource` carries the runner's pin, which is held through fan-out and
    /// released afterwards. A result arriving after cancellation is discarded.
    ///
    /// # Panics
    ///
    /// Panics if the job already succeeded or failed.
    pub fn on_resource_ready(&self, resource: Resource<T>) {
        let shared = self.shared.upgrade();
        let (callbacks, displaced) = {
            let mut table = shared.as_ref().map(|s| s.jobs.lock());
            let mut state = self.state.lock();
            match state.status {
                JobStatus::Running => {}
                JobStatus::Cancelled => {
                    drop(state);
                    drop(table);
                    trace!(key = %self.key, "Discarding result of cancelled load");
                    resource.release();
                    return;
                }
                status => panic!("load job for {} completed twice (already {:?})", self.key, status),
            }

            state.status = JobStatus::Succeeded;
            let mut displaced = Vec::new();
            if let Some(shared) = shared.as_deref() {
                if self.memory_cacheable {
                    displaced = shared.memory_cache.insert(self.key.clone(), resource.clone());
                }
                shared.stats.record_succeeded();
            }
            if let Some(table) = table.as_deref_mut() {
                self.deregister(table);
            }
            (std::mem::take(&mut state.callbacks), displaced)
        };

        for evicted in displaced {
            evicted.release();
        }
        debug!(key = %self.key, waiters = callbacks.len(), "Load complete");
        for (_, callback) in &callbacks {
            callback.on_resource_ready(&resource);
        }
        resource.release();
    }

    /// Delivers a failure to every waiter. Discarded after cancellation.
    ///
    /// # Panics
    ///
    /// Panics if the job already succeeded or failed.
    pub fn on_exception(&self, error: LoadError) {
        let shared = self.shared.upgrade();
        let callbacks = {
            let mut table = shared.as_ref().map(|s| s.jobs.lock());
            let mut state = self.state.lock();
            match state.status {
                JobStatus::Running => {}
                JobStatus::Cancelled => {
                    trace!(key = %self.key, error = %error, "Discarding failure of cancelled load");
                    return;
                }
                status => panic!("load job for {} completed twice (already {:?})", self.key, status),
            }

            state.status = JobStatus::Failed;
            if let Some(shared) = shared.as_deref() {
                shared.stats.record_failed();
            }
            if let Some(table) = table.as_deref_mut() {
                self.deregister(table);
            }
            std::mem::take(&mut state.callbacks)
        };

        debug!(key = %self.key, error = %error, waiters = callbacks.len(), "Load failed");
        for (_, callback) in &callbacks {
            callback.on_exception(&error);
        }
    }

    /// Removes this job from the table if the table still maps its key to it.
    fn deregister(&self, table: &mut JobTable<T>) {
        let registered = table
            .get(&self.key)
            .is_some_and(|job| std::ptr::eq(Arc::as_ptr(job), self));
        if registered {
            table.remove(&self.key);
        }
    }
}

impl<T> std::fmt::Debug for LoadJob<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadJob")
            .field("key", &self.key)
            .field("memory_cacheable", &self.memory_cacheable)
            .finish()
    }
}
