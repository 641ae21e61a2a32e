//! Integration tests for the load engine.
//!
//! These tests verify the complete load workflow including:
//! - Deduplication of concurrent loads for one key
//! - Synchronous memory-cache delivery
//! - Cancellation of waiters and runners
//! - Failure fan-out and retry
//! - Disk cache tiers (result and source)
//! - Priority ordering and shutdown

use parking_lot::{Condvar, Mutex};
use resloader::cache::{DiskCache, FileDiskCache, LruMemoryCache, MemoryCache, NoOpDiskCache};
use resloader::error::{DecodeError, FetchError};
use resloader::strategy::{
    BytesSourceEncoder, DataFetcher, LoadPipeline, ResourceDecoder, ResourceEncoder,
};
use resloader::{
    DiskCacheStrategy, Engine, LoadError, Metadata, Priority, Resource, ResourceCallback,
};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Test Helpers
// =============================================================================

/// A latch the fetcher blocks on until the test opens it.
#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn opened() -> Arc<Self> {
        let gate = Arc::new(Self::default());
        gate.open();
        gate
    }

    fn open(&self) {
        *self.open.lock() = true;
        self.cv.notify_all();
    }

    /// Waits for the gate. Returns false if the token fired first.
    fn wait(&self, cancel: &CancellationToken) -> bool {
        let mut open = self.open.lock();
        while !*open {
            if cancel.is_cancelled() {
                return false;
            }
            self.cv.wait_for(&mut open, Duration::from_millis(5));
        }
        true
    }
}

enum FetchBehavior {
    Data(Vec<u8>),
    NoData,
    Fail,
}

/// Fetcher that blocks on a gate and counts calls and cancellations.
struct TestFetcher {
    name: String,
    behavior: FetchBehavior,
    gate: Arc<Gate>,
    calls: AtomicUsize,
    cancels: AtomicUsize,
    order: Option<Arc<Mutex<Vec<String>>>>,
}

impl TestFetcher {
    fn new(name: &str, behavior: FetchBehavior, gate: Arc<Gate>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            gate,
            calls: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            order: None,
        })
    }

    fn data(value: &str, gate: Arc<Gate>) -> Arc<Self> {
        Self::new(value, FetchBehavior::Data(value.as_bytes().to_vec()), gate)
    }

    fn recording(value: &str, gate: Arc<Gate>, order: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name: value.to_string(),
            behavior: FetchBehavior::Data(value.as_bytes().to_vec()),
            gate,
            calls: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            order: Some(order),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DataFetcher<Vec<u8>> for TestFetcher {
    fn load_data(
        &self,
        _metadata: &Metadata,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(order) = &self.order {
            order.lock().push(self.name.clone());
        }
        if !self.gate.wait(cancel) {
            return Err(FetchError::Cancelled);
        }
        match &self.behavior {
            FetchBehavior::Data(data) => Ok(Some(data.clone())),
            FetchBehavior::NoData => Ok(None),
            FetchBehavior::Fail => Err(FetchError::Other("boom".to_string())),
        }
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

enum DecodeBehavior {
    Decode,
    Nothing,
    Panic,
}

/// Decodes UTF-8 into `String` resources whose recycling is counted.
struct StringDecoder {
    behavior: DecodeBehavior,
    calls: AtomicUsize,
    recycled: Arc<AtomicUsize>,
}

impl StringDecoder {
    fn new(behavior: DecodeBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            recycled: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ResourceDecoder<Vec<u8>, String> for StringDecoder {
    fn decode(
        &self,
        data: Vec<u8>,
        _width: u32,
        _height: u32,
    ) -> Result<Option<Resource<String>>, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            DecodeBehavior::Decode => {
                let value =
                    String::from_utf8(data).map_err(|e| DecodeError::InvalidData(e.to_string()))?;
                let size = value.len().max(1);
                let recycled = Arc::clone(&self.recycled);
                Ok(Some(Resource::with_recycler(value, size, move |_| {
                    recycled.fetch_add(1, Ordering::SeqCst);
                })))
            }
            DecodeBehavior::Nothing => Ok(None),
            DecodeBehavior::Panic => panic!("decoder exploded"),
        }
    }

    fn id(&self) -> &str {
        "test.StringDecoder"
    }
}

/// Writes the string bytes, or refuses to write anything.
struct StringEncoder {
    succeed: bool,
}

impl ResourceEncoder<String> for StringEncoder {
    fn encode(&self, resource: &Resource<String>, sink: &mut dyn Write) -> bool {
        self.succeed && sink.write_all(resource.get().as_bytes()).is_ok()
    }

    fn id(&self) -> &str {
        "test.StringEncoder"
    }
}

/// Encoder that panics halfway through writing an entry.
struct PanickingEncoder;

impl ResourceEncoder<String> for PanickingEncoder {
    fn encode(&self, _resource: &Resource<String>, sink: &mut dyn Write) -> bool {
        let _ = sink.write_all(b"half");
        panic!("encoder blew up");
    }

    fn id(&self) -> &str {
        "test.PanickingEncoder"
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Ready(String),
    Failed(LoadError),
}

#[derive(Default)]
struct RecordingCallback {
    events: Mutex<Vec<Event>>,
    resources: Mutex<Vec<Resource<String>>>,
}

impl RecordingCallback {
    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn count(&self) -> usize {
        self.events.lock().len()
    }
}

impl ResourceCallback<String> for RecordingCallback {
    fn on_resource_ready(&self, resource: &Resource<String>) {
        assert!(resource.acquired() > 0, "delivered resource must be pinned");
        self.events.lock().push(Event::Ready(resource.get().clone()));
        self.resources.lock().push(resource.clone());
    }

    fn on_exception(&self, error: &LoadError) {
        self.events.lock().push(Event::Failed(error.clone()));
    }
}

fn engine_with(disk_cache: Arc<dyn DiskCache>, workers: usize) -> Engine<String> {
    Engine::new(
        Arc::new(LruMemoryCache::new(1024 * 1024)),
        disk_cache,
        workers,
        Handle::current(),
    )
}

fn engine(workers: usize) -> Engine<String> {
    engine_with(Arc::new(NoOpDiskCache), workers)
}

fn pipeline(
    fetcher: Arc<TestFetcher>,
    decoder: Arc<StringDecoder>,
) -> LoadPipeline<Vec<u8>, String> {
    LoadPipeline::new(fetcher, decoder.clone(), decoder)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Gives stray runners time to do something they should not.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

// =============================================================================
// Deduplication
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_back_to_back_loads_share_one_runner() {
    let engine = engine(2);
    let gate = Arc::new(Gate::default());
    let fetcher = TestFetcher::data("hello", Arc::clone(&gate));
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let first = Arc::new(RecordingCallback::default());
    let second = Arc::new(RecordingCallback::default());

    let a = engine.load(
        "id1",
        10,
        10,
        pipeline(fetcher.clone(), decoder.clone()),
        Metadata::default(),
        first.clone(),
    );
    let b = engine.load(
        "id1",
        10,
        10,
        pipeline(fetcher.clone(), decoder.clone()),
        Metadata::default(),
        second.clone(),
    );
    assert!(a.is_some() && b.is_some());
    assert_eq!(engine.active_jobs(), 1);

    gate.open();
    wait_for(|| first.count() == 1 && second.count() == 1).await;

    assert_eq!(first.events(), vec![Event::Ready("hello".to_string())]);
    assert_eq!(second.events(), vec![Event::Ready("hello".to_string())]);
    let first_resource = first.resources.lock()[0].clone();
    let second_resource = second.resources.lock()[0].clone();
    assert!(first_resource.ptr_eq(&second_resource));

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(decoder.calls(), 1);
    let stats = engine.stats();
    assert_eq!(stats.total_loads, 2);
    assert_eq!(stats.runners_started, 1);
    assert_eq!(stats.coalesced, 1);
    assert_eq!(engine.active_jobs(), 0);
    // Only the memory cache holds it once fan-out has finished.
    wait_for(|| first_resource.acquired() == 1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads_from_many_threads_start_one_runner() {
    let engine = engine(4);
    let gate = Arc::new(Gate::default());
    let fetcher = TestFetcher::data("shared", Arc::clone(&gate));
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let callbacks: Vec<_> = (0..8).map(|_| Arc::new(RecordingCallback::default())).collect();

    let threads: Vec<_> = callbacks
        .iter()
        .map(|callback| {
            let engine = engine.clone();
            let pipeline = pipeline(fetcher.clone(), decoder.clone());
            let callback = Arc::clone(callback);
            std::thread::spawn(move || {
                engine.load("id1", 32, 32, pipeline, Metadata::default(), callback)
            })
        })
        .collect();
    for thread in threads {
        assert!(thread.join().unwrap().is_some());
    }

    gate.open();
    wait_for(|| callbacks.iter().all(|c| c.count() == 1)).await;

    assert_eq!(engine.stats().runners_started, 1);
    assert_eq!(engine.stats().coalesced, 7);
    assert_eq!(fetcher.calls(), 1);
    for callback in &callbacks {
        assert_eq!(callback.events(), vec![Event::Ready("shared".to_string())]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_different_sizes_are_different_loads() {
    let engine = engine(2);
    let fetcher = TestFetcher::data("x", Gate::opened());
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let callback = Arc::new(RecordingCallback::default());

    for size in [10, 20] {
        engine.load(
            "id1",
            size,
            size,
            pipeline(fetcher.clone(), decoder.clone()),
            Metadata::default(),
            callback.clone(),
        );
    }
    wait_for(|| callback.count() == 2).await;

    assert_eq!(engine.stats().runners_started, 2);
}

// =============================================================================
// Memory cache
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_memory_cache_hit_is_synchronous_and_skips_strategies() {
    let engine = engine(1);
    let fetcher = TestFetcher::data("fresh", Gate::opened());
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let pipeline = pipeline(fetcher.clone(), decoder.clone());

    let cached = Resource::new("cached".to_string(), 6);
    engine
        .memory_cache()
        .put(pipeline.key("id1", 10, 10), cached.clone());

    let callback = Arc::new(RecordingCallback::default());
    let status = engine.load("id1", 10, 10, pipeline, Metadata::default(), callback.clone());

    assert!(status.is_none());
    assert_eq!(callback.events(), vec![Event::Ready("cached".to_string())]);
    assert_eq!(fetcher.calls(), 0);
    assert_eq!(decoder.calls(), 0);
    assert_eq!(engine.stats().memory_hits, 1);
    assert_eq!(engine.stats().runners_started, 0);
    // The delivery pin was released again.
    assert_eq!(cached.acquired(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_completed_load_is_served_from_memory_next_time() {
    let engine = engine(1);
    let fetcher = TestFetcher::data("value", Gate::opened());
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let first = Arc::new(RecordingCallback::default());

    engine.load(
        "id1",
        10,
        10,
        pipeline(fetcher.clone(), decoder.clone()),
        Metadata::default(),
        first.clone(),
    );
    wait_for(|| first.count() == 1).await;

    let second = Arc::new(RecordingCallback::default());
    let status = engine.load(
        "id1",
        10,
        10,
        pipeline(fetcher.clone(), decoder.clone()),
        Metadata::default(),
        second.clone(),
    );

    assert!(status.is_none());
    assert_eq!(second.events(), vec![Event::Ready("value".to_string())]);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_non_cacheable_loads_bypass_memory_cache() {
    let engine = engine(1);
    let fetcher = TestFetcher::data("value", Gate::opened());
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let metadata = Metadata::default().with_memory_cacheable(false);
    let callback = Arc::new(RecordingCallback::default());

    engine.load("id1", 10, 10, pipeline(fetcher.clone(), decoder.clone()), metadata, callback.clone());
    wait_for(|| callback.count() == 1).await;
    let status = engine.load("id1", 10, 10, pipeline(fetcher.clone(), decoder.clone()), metadata, callback.clone());
    assert!(status.is_some());
    wait_for(|| callback.count() == 2).await;

    assert_eq!(fetcher.calls(), 2);
    assert_eq!(engine.memory_cache().entry_count(), 0);
    // Nobody held the uncached results, so both were recycled.
    wait_for(|| decoder.recycled.load(Ordering::SeqCst) == 2).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lru_eviction_recycles_evicted_resource_once() {
    let engine = Engine::new(
        Arc::new(LruMemoryCache::new(8)),
        Arc::new(NoOpDiskCache),
        1,
        Handle::current(),
    );
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let callback = Arc::new(RecordingCallback::default());

    engine.load(
        "a",
        1,
        1,
        pipeline(TestFetcher::data("aaaaaa", Gate::opened()), decoder.clone()),
        Metadata::default(),
        callback.clone(),
    );
    wait_for(|| callback.count() == 1).await;
    assert_eq!(decoder.recycled.load(Ordering::SeqCst), 0);

    engine.load(
        "b",
        1,
        1,
        pipeline(TestFetcher::data("bbbbbb", Gate::opened()), decoder.clone()),
        Metadata::default(),
        callback.clone(),
    );
    wait_for(|| callback.count() == 2).await;

    wait_for(|| decoder.recycled.load(Ordering::SeqCst) == 1).await;
    settle().await;
    assert_eq!(decoder.recycled.load(Ordering::SeqCst), 1);
    assert!(callback.resources.lock()[0].is_recycled());
    assert!(!callback.resources.lock()[1].is_recycled());
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelling_last_waiter_cancels_runner() {
    let engine = engine(1);
    let gate = Arc::new(Gate::default());
    let fetcher = TestFetcher::data("never", Arc::clone(&gate));
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let callback = Arc::new(RecordingCallback::default());

    let status = engine
        .load(
            "id1",
            10,
            10,
            pipeline(fetcher.clone(), decoder.clone()),
            Metadata::default(),
            callback.clone(),
        )
        .expect("load should be in flight");
    wait_for(|| fetcher.calls() == 1).await;

    status.cancel();

    assert_eq!(engine.active_jobs(), 0);
    assert_eq!(fetcher.cancels.load(Ordering::SeqCst), 1);
    gate.open();
    settle().await;
    assert!(callback.events().is_empty());
    assert_eq!(decoder.calls(), 0);
    assert_eq!(engine.stats().runners_cancelled, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelling_one_waiter_leaves_others_running() {
    let engine = engine(1);
    let gate = Arc::new(Gate::default());
    let fetcher = TestFetcher::data("kept", Arc::clone(&gate));
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let leaving = Arc::new(RecordingCallback::default());
    let staying = Arc::new(RecordingCallback::default());

    let leaving_status = engine
        .load("id1", 10, 10, pipeline(fetcher.clone(), decoder.clone()), Metadata::default(), leaving.clone())
        .unwrap();
    let _staying_status = engine
        .load("id1", 10, 10, pipeline(fetcher.clone(), decoder.clone()), Metadata::default(), staying.clone())
        .unwrap();

    leaving_status.cancel();
    assert_eq!(engine.active_jobs(), 1);
    assert_eq!(fetcher.cancels.load(Ordering::SeqCst), 0);

    gate.open();
    wait_for(|| staying.count() == 1).await;
    settle().await;

    assert_eq!(staying.events(), vec![Event::Ready("kept".to_string())]);
    assert!(leaving.events().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_load_after_cancel_starts_fresh_runner() {
    let engine = engine(2);
    let gate = Arc::new(Gate::default());
    let fetcher = TestFetcher::data("again", Arc::clone(&gate));
    let decoder = StringDecoder::new(DecodeBehavior::Decode);

    engine
        .load("id1", 10, 10, pipeline(fetcher.clone(), decoder.clone()), Metadata::default(), Arc::new(RecordingCallback::default()))
        .unwrap()
        .cancel();

    let callback = Arc::new(RecordingCallback::default());
    engine.load("id1", 10, 10, pipeline(fetcher.clone(), decoder.clone()), Metadata::default(), callback.clone());
    gate.open();
    wait_for(|| callback.count() == 1).await;

    assert_eq!(engine.stats().runners_started, 2);
    assert_eq!(callback.events(), vec![Event::Ready("again".to_string())]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_cancels_in_flight_loads_silently() {
    let engine = engine(1);
    let gate = Arc::new(Gate::default());
    let fetcher = TestFetcher::data("late", Arc::clone(&gate));
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let callback = Arc::new(RecordingCallback::default());

    engine.load("id1", 10, 10, pipeline(fetcher.clone(), decoder.clone()), Metadata::default(), callback.clone());
    engine.load("id2", 10, 10, pipeline(fetcher.clone(), decoder.clone()), Metadata::default(), callback.clone());
    wait_for(|| fetcher.calls() == 1).await;

    engine.shutdown();
    gate.open();
    settle().await;

    assert_eq!(engine.active_jobs(), 0);
    assert_eq!(engine.queued_runners(), 0);
    assert!(callback.events().is_empty());
    assert_eq!(engine.stats().runners_cancelled, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_load_after_shutdown_fails_immediately() {
    let engine = engine(1);
    engine.shutdown();
    let fetcher = TestFetcher::data("never", Gate::opened());
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let first = Arc::new(RecordingCallback::default());
    let second = Arc::new(RecordingCallback::default());

    let status = engine.load("k", 10, 10, pipeline(fetcher.clone(), decoder.clone()), Metadata::default(), first.clone());
    assert!(status.is_none());
    let status = engine.load("k", 10, 10, pipeline(fetcher.clone(), decoder.clone()), Metadata::default(), second.clone());
    assert!(status.is_none());

    assert_eq!(first.events(), vec![Event::Failed(LoadError::Cancelled)]);
    assert_eq!(second.events(), vec![Event::Failed(LoadError::Cancelled)]);
    assert_eq!(engine.active_jobs(), 0);
    settle().await;
    assert_eq!(fetcher.calls(), 0);
    let stats = engine.stats();
    assert_eq!(stats.runners_started, 0);
    assert_eq!(stats.coalesced, 0);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fetch_failure_reaches_every_waiter_and_allows_retry() {
    let engine = engine(1);
    let gate = Arc::new(Gate::default());
    let failing = TestFetcher::new("bad", FetchBehavior::Fail, Arc::clone(&gate));
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let first = Arc::new(RecordingCallback::default());
    let second = Arc::new(RecordingCallback::default());

    engine.load("id1", 10, 10, pipeline(failing.clone(), decoder.clone()), Metadata::default(), first.clone());
    engine.load("id1", 10, 10, pipeline(failing.clone(), decoder.clone()), Metadata::default(), second.clone());
    gate.open();
    wait_for(|| first.count() == 1 && second.count() == 1).await;

    let expected = Event::Failed(LoadError::FetchFailed("boom".to_string()));
    assert_eq!(first.events(), vec![expected.clone()]);
    assert_eq!(second.events(), vec![expected]);
    wait_for(|| engine.active_jobs() == 0).await;

    let retry = Arc::new(RecordingCallback::default());
    let fetcher = TestFetcher::data("ok", Gate::opened());
    engine.load("id1", 10, 10, pipeline(fetcher, decoder.clone()), Metadata::default(), retry.clone());
    wait_for(|| retry.count() == 1).await;

    assert_eq!(engine.stats().runners_started, 2);
    assert_eq!(engine.stats().runners_failed, 1);
    assert_eq!(retry.events(), vec![Event::Ready("ok".to_string())]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_data_and_missing_resource_are_failures() {
    let engine = engine(1);

    let no_data = Arc::new(RecordingCallback::default());
    engine.load(
        "empty",
        10,
        10,
        pipeline(
            TestFetcher::new("empty", FetchBehavior::NoData, Gate::opened()),
            StringDecoder::new(DecodeBehavior::Decode),
        ),
        Metadata::default(),
        no_data.clone(),
    );

    let no_resource = Arc::new(RecordingCallback::default());
    engine.load(
        "nothing",
        10,
        10,
        pipeline(
            TestFetcher::data("x", Gate::opened()),
            StringDecoder::new(DecodeBehavior::Nothing),
        ),
        Metadata::default(),
        no_resource.clone(),
    );

    wait_for(|| no_data.count() == 1 && no_resource.count() == 1).await;
    assert_eq!(
        no_data.events(),
        vec![Event::Failed(LoadError::FetchFailed("no data".to_string()))]
    );
    assert!(matches!(
        no_resource.events()[0],
        Event::Failed(LoadError::DecodeFailed(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_decoder_is_reported_to_every_waiter() {
    let engine = engine(1);
    let gate = Arc::new(Gate::default());
    let fetcher = TestFetcher::data("x", Arc::clone(&gate));
    let decoder = StringDecoder::new(DecodeBehavior::Panic);
    let first = Arc::new(RecordingCallback::default());
    let second = Arc::new(RecordingCallback::default());

    engine.load("id1", 10, 10, pipeline(fetcher.clone(), decoder.clone()), Metadata::default(), first.clone());
    engine.load("id1", 10, 10, pipeline(fetcher.clone(), decoder.clone()), Metadata::default(), second.clone());
    gate.open();
    wait_for(|| first.count() == 1 && second.count() == 1).await;

    let expected = Event::Failed(LoadError::Panicked("decoder exploded".to_string()));
    assert_eq!(first.events(), vec![expected.clone()]);
    assert_eq!(second.events(), vec![expected]);
    wait_for(|| engine.active_jobs() == 0).await;
}

// =============================================================================
// Disk cache
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disk_result_hit_skips_fetcher() {
    let temp_dir = TempDir::new().unwrap();
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let encoder = Arc::new(StringEncoder { succeed: true });

    let warm = engine_with(Arc::new(FileDiskCache::new(temp_dir.path()).unwrap()), 1);
    let first_fetcher = TestFetcher::data("persisted", Gate::opened());
    let callback = Arc::new(RecordingCallback::default());
    warm.load(
        "id1",
        10,
        10,
        pipeline(first_fetcher.clone(), decoder.clone()).with_encoder(encoder.clone()),
        Metadata::default(),
        callback.clone(),
    );
    wait_for(|| callback.count() == 1).await;

    // A fresh engine has an empty memory cache but shares the disk cache.
    let cold = engine_with(Arc::new(FileDiskCache::new(temp_dir.path()).unwrap()), 1);
    let second_fetcher = TestFetcher::data("refetched", Gate::opened());
    let cold_callback = Arc::new(RecordingCallback::default());
    cold.load(
        "id1",
        10,
        10,
        pipeline(second_fetcher.clone(), decoder.clone()).with_encoder(encoder),
        Metadata::default(),
        cold_callback.clone(),
    );
    wait_for(|| cold_callback.count() == 1).await;

    assert_eq!(cold_callback.events(), vec![Event::Ready("persisted".to_string())]);
    assert_eq!(second_fetcher.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disk_source_hit_skips_fetcher() {
    let temp_dir = TempDir::new().unwrap();
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let metadata = Metadata::default().with_disk_cache_strategy(DiskCacheStrategy::Source);

    for (value, expected_calls) in [("source", 1), ("ignored", 0)] {
        let engine = engine_with(Arc::new(FileDiskCache::new(temp_dir.path()).unwrap()), 1);
        let fetcher = TestFetcher::data(value, Gate::opened());
        let callback = Arc::new(RecordingCallback::default());
        engine.load(
            "id1",
            10,
            10,
            pipeline(fetcher.clone(), decoder.clone())
                .with_source_encoder(Arc::new(BytesSourceEncoder)),
            metadata,
            callback.clone(),
        );
        wait_for(|| callback.count() == 1).await;

        assert_eq!(callback.events(), vec![Event::Ready("source".to_string())]);
        assert_eq!(fetcher.calls(), expected_calls);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_persistence_failure_still_delivers() {
    let temp_dir = TempDir::new().unwrap();
    let disk = Arc::new(FileDiskCache::new(temp_dir.path()).unwrap());
    let engine = engine_with(disk.clone(), 1);
    let callback = Arc::new(RecordingCallback::default());

    engine.load(
        "id1",
        10,
        10,
        pipeline(
            TestFetcher::data("value", Gate::opened()),
            StringDecoder::new(DecodeBehavior::Decode),
        )
        .with_encoder(Arc::new(StringEncoder { succeed: false })),
        Metadata::default(),
        callback.clone(),
    );
    wait_for(|| callback.count() == 1).await;

    assert_eq!(callback.events(), vec![Event::Ready("value".to_string())]);
    assert_eq!(disk.usage().unwrap(), (0, 0));
    assert_eq!(disk.stats().write_failures, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_encoder_still_delivers_and_recycles() {
    let temp_dir = TempDir::new().unwrap();
    let disk = Arc::new(FileDiskCache::new(temp_dir.path()).unwrap());
    let engine = engine_with(disk.clone(), 1);
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let callback = Arc::new(RecordingCallback::default());

    engine.load(
        "id1",
        10,
        10,
        pipeline(TestFetcher::data("value", Gate::opened()), decoder.clone())
            .with_encoder(Arc::new(PanickingEncoder)),
        Metadata::default().with_disk_cache_strategy(DiskCacheStrategy::Result),
        callback.clone(),
    );
    wait_for(|| callback.count() == 1).await;

    assert_eq!(callback.events(), vec![Event::Ready("value".to_string())]);
    assert_eq!(disk.usage().unwrap(), (0, 0));
    assert_eq!(engine.active_jobs(), 0);

    // Once fan-out ends only the memory cache holds the resource.
    let resource = callback.resources.lock()[0].clone();
    wait_for(|| resource.acquired() == 1).await;
    engine.memory_cache().clear();
    assert!(resource.is_recycled());
    assert_eq!(decoder.recycled.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_corrupt_disk_entry_is_dropped_and_refetched() {
    let temp_dir = TempDir::new().unwrap();
    let disk = Arc::new(FileDiskCache::new(temp_dir.path()).unwrap());
    let engine = engine_with(disk.clone(), 1);
    let fetcher = TestFetcher::data("fresh", Gate::opened());
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let pipeline = pipeline(fetcher.clone(), decoder.clone())
        .with_encoder(Arc::new(StringEncoder { succeed: true }));
    let key = pipeline.key("id1", 10, 10);
    // Invalid UTF-8 fails the cache decoder.
    disk.put(&key, &|sink: &mut dyn Write| sink.write_all(&[0xff, 0xfe]).is_ok())
        .unwrap();

    let callback = Arc::new(RecordingCallback::default());
    engine.load("id1", 10, 10, pipeline, Metadata::default(), callback.clone());
    wait_for(|| callback.count() == 1).await;

    assert_eq!(callback.events(), vec![Event::Ready("fresh".to_string())]);
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(disk.get(&key), Some(b"fresh".to_vec()));
}

// =============================================================================
// Scheduling
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queued_loads_run_by_priority() {
    let engine = engine(1);
    let decoder = StringDecoder::new(DecodeBehavior::Decode);
    let order = Arc::new(Mutex::new(Vec::new()));
    let blocker_gate = Arc::new(Gate::default());
    let callback = Arc::new(RecordingCallback::default());

    engine.load(
        "blocker",
        1,
        1,
        pipeline(
            TestFetcher::recording("blocker", Arc::clone(&blocker_gate), order.clone()),
            decoder.clone(),
        ),
        Metadata::new(Priority::Immediate),
        callback.clone(),
    );
    wait_for(|| order.lock().len() == 1).await;

    for (name, priority) in [
        ("low", Priority::Low),
        ("normal", Priority::Normal),
        ("high", Priority::High),
    ] {
        engine.load(
            name,
            1,
            1,
            pipeline(
                TestFetcher::recording(name, Gate::opened(), order.clone()),
                decoder.clone(),
            ),
            Metadata::new(priority),
            callback.clone(),
        );
    }
    assert_eq!(engine.queued_runners(), 3);

    blocker_gate.open();
    wait_for(|| callback.count() == 4).await;

    assert_eq!(order.lock().as_slice(), ["blocker", "high", "normal", "low"]);
}
