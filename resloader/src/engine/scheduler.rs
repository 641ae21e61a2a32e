//! Priority scheduler for load runners.
//!
//! Runners wait in a max-heap ordered by [`Priority`] and then by submission
//! order, so equal priorities run FIFO. A single dispatcher task on the tokio
//! runtime pairs the highest queued runner with a free worker permit and runs
//! it on the blocking pool.

use crate::metadata::Priority;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// Unit of work executed on a worker thread.
pub(crate) trait Runnable: Send {
    fn priority(&self) -> Priority;

    /// Label for logging.
    fn describe(&self) -> String;

    fn run(self: Box<Self>);
}

pub(crate) struct QueuedRunner {
    pub runner: Box<dyn Runnable>,
    pub priority: Priority,
    /// Sequence number for FIFO ordering within the same priority level.
    pub sequence: u64,
}

impl PartialEq for QueuedRunner {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedRunner {}

impl PartialOrd for QueuedRunner {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRunner {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then lower sequence (older) first
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other_ordering => other_ordering,
        }
    }
}

impl std::fmt::Debug for QueuedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRunner")
            .field("runner", &self.runner.describe())
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[derive(Default)]
struct RunQueue {
    heap: BinaryHeap<QueuedRunner>,
    next_sequence: u64,
}

/// Bounded worker pool with a priority run queue.
pub(crate) struct RunnerScheduler {
    queue: Arc<Mutex<RunQueue>>,
    notify: Arc<Notify>,
    shutdown: CancellationToken,
    max_workers: usize,
}

impl RunnerScheduler {
    /// Starts the dispatcher on `runtime` with `max_workers` concurrent runners.
    pub fn new(max_workers: usize, runtime: &Handle) -> Self {
        let max_workers = max_workers.max(1);
        let queue = Arc::new(Mutex::new(RunQueue::default()));
        let notify = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        runtime.spawn(dispatch(
            Arc::clone(&queue),
            Arc::clone(&notify),
            Arc::new(Semaphore::new(max_workers)),
            shutdown.clone(),
            runtime.clone(),
        ));
        debug!(max_workers, "Runner scheduler started");

        Self {
            queue,
            notify,
            shutdown,
            max_workers,
        }
    }

    /// Queues a runner. After [`shutdown`](Self::shutdown) the runner is
    /// handed back unrun.
    pub fn enqueue(&self, runner: Box<dyn Runnable>) -> Result<(), Box<dyn Runnable>> {
        {
            // Checked under the queue lock so shutdown cannot miss this runner.
            let mut queue = self.queue.lock();
            if self.shutdown.is_cancelled() {
                debug!(runner = %runner.describe(), "Scheduler shut down, rejecting runner");
                return Err(runner);
            }
            let sequence = queue.next_sequence;
            queue.next_sequence += 1;
            let priority = runner.priority();
            trace!(runner = %runner.describe(), ?priority, sequence, "Runner queued");
            queue.heap.push(QueuedRunner {
                runner,
                priority,
                sequence,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Number of runners waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queue.lock().heap.len()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Stops dispatching and drops every queued runner. Runners already on a
    /// worker finish on their own.
    pub fn shutdown(&self) {
        let dropped = {
            let mut queue = self.queue.lock();
            self.shutdown.cancel();
            std::mem::take(&mut queue.heap)
        };
        debug!(dropped = dropped.len(), "Runner scheduler shut down");
    }
}

impl Drop for RunnerScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dispatch(
    queue: Arc<Mutex<RunQueue>>,
    notify: Arc<Notify>,
    workers: Arc<Semaphore>,
    shutdown: CancellationToken,
    runtime: Handle,
) {
    loop {
        // Take the worker first so the pick happens when a worker is free.
        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            permit = Arc::clone(&workers).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let next = loop {
            let popped = queue.lock().heap.pop();
            if let Some(queued) = popped {
                break Some(queued);
            }
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break None,
                _ = notify.notified() => {}
            }
        };
        let Some(queued) = next else { break };

        trace!(runner = %queued.runner.describe(), priority = ?queued.priority, "Dispatching runner");
        runtime.spawn_blocking(move || {
            let _permit = permit;
            let label = queued.runner.describe();
            if panic::catch_unwind(AssertUnwindSafe(|| queued.runner.run())).is_err() {
                error!(runner = %label, "Runner panicked while publishing its result");
            }
        });
    }
    debug!("Runner dispatcher stopped");
}
