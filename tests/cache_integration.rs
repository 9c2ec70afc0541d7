//! End-to-end tests for the cache pipeline: storage, generator, and the
//! asynchronous facade wired together the way an embedding application
//! would use them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use previewcache::cache::AsynchronousImageCache;
use previewcache::collector::{CollectedImages, ImageCollector};
use previewcache::generator::ImageCacheGenerator;
use previewcache::storage::{ImageCacheStorage, StorageEntry};
use previewcache::timestamp::TimeStampProvider;
use previewcache::types::{
    AbortCallback, AbortReason, AuxiliaryData, CacheKey, CaptureCallback, TimeStamp,
};

/// Timestamp provider under test control.
struct TestTimeStampProvider {
    time: Mutex<TimeStamp>,
}

impl TestTimeStampProvider {
    fn new(time: TimeStamp) -> Arc<Self> {
        Arc::new(Self {
            time: Mutex::new(time),
        })
    }

    fn set(&self, time: TimeStamp) {
        *self.time.lock().unwrap() = time;
    }
}

impl TimeStampProvider for TestTimeStampProvider {
    fn time_stamp(&self, _name: &str) -> TimeStamp {
        *self.time.lock().unwrap()
    }

    fn pause(&self) -> Duration {
        Duration::ZERO
    }
}

/// Counts invocations and returns fixed distinct variant payloads.
struct CountingCollector {
    calls: AtomicUsize,
}

impl CountingCollector {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

impl ImageCollector for CountingCollector {
    fn collect(
        &self,
        _name: &str,
        _extra_id: &str,
        _auxiliary: &AuxiliaryData,
    ) -> Option<CollectedImages> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(CollectedImages::new(
            b"full".to_vec(),
            b"mid".to_vec(),
            b"small".to_vec(),
        ))
    }
}

/// Always fails; the failure must be cached.
struct FailingCollector {
    calls: AtomicUsize,
}

impl FailingCollector {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

impl ImageCollector for FailingCollector {
    fn collect(
        &self,
        _name: &str,
        _extra_id: &str,
        _auxiliary: &AuxiliaryData,
    ) -> Option<CollectedImages> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        None
    }
}

/// Blocks inside `collect` until released, so tests can pile up
/// concurrent requests behind one in-flight generation.
struct GateCollector {
    calls: AtomicUsize,
    started: mpsc::Sender<()>,
    gate: Mutex<mpsc::Receiver<()>>,
}

impl GateCollector {
    fn new() -> (Arc<Self>, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let collector = Arc::new(Self {
            calls: AtomicUsize::new(0),
            started: started_tx,
            gate: Mutex::new(gate_rx),
        });
        (collector, started_rx, gate_tx)
    }
}

impl ImageCollector for GateCollector {
    fn collect(
        &self,
        _name: &str,
        _extra_id: &str,
        _auxiliary: &AuxiliaryData,
    ) -> Option<CollectedImages> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.send(()).ok();
        let _ = self
            .gate
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(10));
        Some(CollectedImages::new(
            b"full".to_vec(),
            b"mid".to_vec(),
            b"small".to_vec(),
        ))
    }
}

struct Pipeline {
    cache: AsynchronousImageCache,
    generator: Arc<ImageCacheGenerator>,
    storage: Arc<ImageCacheStorage>,
}

fn build_pipeline(collector: Arc<dyn ImageCollector>, source_time: TimeStamp) -> Pipeline {
    let storage = Arc::new(ImageCacheStorage::in_memory().unwrap());
    let generator = Arc::new(ImageCacheGenerator::new(collector, Arc::clone(&storage)));
    let cache = AsynchronousImageCache::new(
        Arc::clone(&storage),
        Arc::clone(&generator),
        TestTimeStampProvider::new(source_time),
    );
    Pipeline {
        cache,
        generator,
        storage,
    }
}

fn capture_into(tx: mpsc::Sender<Vec<u8>>) -> CaptureCallback {
    Box::new(move |data| {
        tx.send(data).unwrap();
    })
}

fn abort_into(tx: mpsc::Sender<AbortReason>) -> AbortCallback {
    Box::new(move |reason| {
        tx.send(reason).unwrap();
    })
}

fn no_capture() -> CaptureCallback {
    Box::new(|_| panic!("capture must not fire"))
}

fn no_abort() -> AbortCallback {
    Box::new(|reason| panic!("abort must not fire, got {reason}"))
}

#[test]
fn end_to_end_generation_then_storage_hit() {
    let collector = CountingCollector::new();
    let pipeline = build_pipeline(collector.clone(), TimeStamp(100));

    // First request on an empty store: generated once, persisted.
    let (tx, rx) = mpsc::channel();
    pipeline
        .cache
        .request_image("foo.png", "", AuxiliaryData::None, capture_into(tx), no_abort());
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        b"full".to_vec()
    );
    assert_eq!(collector.calls.load(Ordering::SeqCst), 1);

    let key = CacheKey::new("foo.png", "");
    assert_eq!(
        pipeline.storage.fetch_image(&key, TimeStamp(100)).unwrap(),
        Some(StorageEntry::Image(b"full".to_vec()))
    );
    assert_eq!(
        pipeline
            .storage
            .fetch_small_image(&key, TimeStamp(100))
            .unwrap(),
        Some(StorageEntry::Image(b"small".to_vec()))
    );
    assert_eq!(
        pipeline.storage.fetch_modified_image_time(&key).unwrap(),
        Some(TimeStamp(100))
    );

    // Second identical request: served from storage, collector untouched.
    let (tx, rx) = mpsc::channel();
    pipeline
        .cache
        .request_image("foo.png", "", AuxiliaryData::None, capture_into(tx), no_abort());
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        b"full".to_vec()
    );
    assert_eq!(collector.calls.load(Ordering::SeqCst), 1);

    let stats = pipeline.cache.stats();
    assert_eq!(stats.requests, 2);
    assert_eq!(stats.storage_hits, 1);
    assert_eq!(stats.generations_requested, 1);
}

#[test]
fn concurrent_requests_for_same_key_coalesce() {
    let (collector, started, gate) = GateCollector::new();
    let pipeline = build_pipeline(collector.clone(), TimeStamp(100));

    let (tx, rx) = mpsc::channel();
    pipeline.cache.request_image(
        "foo.png",
        "",
        AuxiliaryData::None,
        capture_into(tx.clone()),
        no_abort(),
    );
    started.recv_timeout(Duration::from_secs(5)).unwrap();

    // Nine more requests while the first is mid-generation.
    for _ in 0..9 {
        pipeline.cache.request_image(
            "foo.png",
            "",
            AuxiliaryData::None,
            capture_into(tx.clone()),
            no_abort(),
        );
    }

    // Wait until every request has merged into the in-flight task.
    let deadline = Instant::now() + Duration::from_secs(5);
    while pipeline.generator.stats().tasks_merged < 9 {
        assert!(Instant::now() < deadline, "requests did not coalesce");
        std::thread::yield_now();
    }
    gate.send(()).unwrap();

    for _ in 0..10 {
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            b"full".to_vec()
        );
    }
    assert_eq!(collector.calls.load(Ordering::SeqCst), 1);

    let stats = pipeline.generator.stats();
    assert_eq!(stats.tasks_enqueued, 1);
    assert_eq!(stats.tasks_merged, 9);
}

#[test]
fn collector_failure_is_cached_and_replayed() {
    let collector = FailingCollector::new();
    let pipeline = build_pipeline(collector.clone(), TimeStamp(100));

    let (tx, rx) = mpsc::channel();
    pipeline.cache.request_image(
        "broken.png",
        "",
        AuxiliaryData::None,
        no_capture(),
        abort_into(tx),
    );
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        AbortReason::Failed
    );
    assert_eq!(collector.calls.load(Ordering::SeqCst), 1);

    // Replayed from the cached null entry; the collector is not retried.
    let (tx, rx) = mpsc::channel();
    pipeline.cache.request_image(
        "broken.png",
        "",
        AuxiliaryData::None,
        no_capture(),
        abort_into(tx),
    );
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        AbortReason::Failed
    );
    assert_eq!(collector.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.cache.stats().cached_failures, 1);
}

#[test]
fn source_change_invalidates_cached_failure() {
    let collector = FailingCollector::new();
    let storage = Arc::new(ImageCacheStorage::in_memory().unwrap());
    let generator = Arc::new(ImageCacheGenerator::new(
        collector.clone(),
        Arc::clone(&storage),
    ));
    let provider = TestTimeStampProvider::new(TimeStamp(100));
    let cache = AsynchronousImageCache::new(
        Arc::clone(&storage),
        Arc::clone(&generator),
        provider.clone(),
    );

    let (tx, rx) = mpsc::channel();
    cache.request_image(
        "broken.png",
        "",
        AuxiliaryData::None,
        no_capture(),
        abort_into(tx),
    );
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(collector.calls.load(Ordering::SeqCst), 1);

    // The source changed; the cached failure is stale and the collector
    // runs again.
    provider.set(TimeStamp(200));
    let (tx, rx) = mpsc::channel();
    cache.request_image(
        "broken.png",
        "",
        AuxiliaryData::None,
        no_capture(),
        abort_into(tx),
    );
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(collector.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn requested_variant_is_extracted_from_the_triple() {
    let collector = CountingCollector::new();
    let pipeline = build_pipeline(collector, TimeStamp(100));

    let (tx, rx) = mpsc::channel();
    pipeline.cache.request_mid_size_image(
        "foo.png",
        "",
        AuxiliaryData::None,
        capture_into(tx),
        no_abort(),
    );
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        b"mid".to_vec()
    );

    let (tx, rx) = mpsc::channel();
    pipeline.cache.request_small_image(
        "foo.png",
        "",
        AuxiliaryData::None,
        capture_into(tx),
        no_abort(),
    );
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        b"small".to_vec()
    );
}

#[test]
fn clean_aborts_every_pending_request_exactly_once() {
    let (collector, started, gate) = GateCollector::new();
    let pipeline = build_pipeline(collector, TimeStamp(100));

    let (abort_tx, abort_rx) = mpsc::channel();
    pipeline.cache.request_image(
        "in-flight.png",
        "",
        AuxiliaryData::None,
        Box::new(|_| {}),
        abort_into(abort_tx.clone()),
    );
    started.recv_timeout(Duration::from_secs(5)).unwrap();

    pipeline.cache.request_image(
        "pending-one.png",
        "",
        AuxiliaryData::None,
        Box::new(|_| {}),
        abort_into(abort_tx.clone()),
    );
    pipeline.cache.request_image(
        "pending-two.png",
        "",
        AuxiliaryData::None,
        Box::new(|_| {}),
        abort_into(abort_tx),
    );

    // Both pending requests must reach the generator queue before the
    // flush, or the dispatcher could forward one after the drain.
    let deadline = Instant::now() + Duration::from_secs(5);
    while pipeline.generator.queued_task_count() < 3 {
        assert!(Instant::now() < deadline, "requests did not queue up");
        std::thread::yield_now();
    }

    pipeline.cache.clean();
    gate.send(()).unwrap();

    let mut reasons = Vec::new();
    for _ in 0..3 {
        reasons.push(abort_rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }
    assert_eq!(reasons, vec![AbortReason::Abort; 3]);

    // Exactly once each: no further callbacks arrive.
    assert!(abort_rx.recv_timeout(Duration::from_millis(200)).is_err());

    drop(pipeline.cache);
    pipeline.generator.wait_for_finished();
}

#[test]
fn teardown_aborts_requests_still_queued() {
    let (collector, started, gate) = GateCollector::new();
    let pipeline = build_pipeline(collector, TimeStamp(100));

    let (capture_tx, capture_rx) = mpsc::channel();
    pipeline.cache.request_image(
        "current.png",
        "",
        AuxiliaryData::None,
        capture_into(capture_tx),
        no_abort(),
    );
    started.recv_timeout(Duration::from_secs(5)).unwrap();

    let (abort_tx, abort_rx) = mpsc::channel();
    pipeline.cache.request_image(
        "queued.png",
        "",
        AuxiliaryData::None,
        Box::new(|_| {}),
        abort_into(abort_tx),
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    while pipeline.generator.queued_task_count() < 2 {
        assert!(Instant::now() < deadline, "request did not queue up");
        std::thread::yield_now();
    }

    // Release the gate only after shutdown has begun, so the worker
    // finishes the in-flight task and never starts the queued one.
    let release = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        gate.send(()).unwrap();
    });
    drop(pipeline.cache);
    pipeline.generator.wait_for_finished();
    release.join().unwrap();

    // The in-flight task completed normally.
    assert_eq!(
        capture_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        b"full".to_vec()
    );

    // Whatever was still queued received Abort exactly once.
    let mut aborts = 0;
    while let Ok(reason) = abort_rx.recv_timeout(Duration::from_millis(200)) {
        assert_eq!(reason, AbortReason::Abort);
        aborts += 1;
    }
    assert_eq!(aborts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_requests_share_one_generation() {
    let (collector, started, gate) = GateCollector::new();
    let pipeline = Arc::new(build_pipeline(collector.clone(), TimeStamp(100)));

    let first = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .cache
                .image("foo.png", "", AuxiliaryData::None)
                .await
        })
    };
    started.recv_timeout(Duration::from_secs(5)).unwrap();

    let second = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .cache
                .image("foo.png", "", AuxiliaryData::None)
                .await
        })
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while pipeline.generator.stats().tasks_merged < 1 {
        assert!(Instant::now() < deadline, "second request did not coalesce");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    gate.send(()).unwrap();

    assert_eq!(first.await.unwrap(), Ok(b"full".to_vec()));
    assert_eq!(second.await.unwrap(), Ok(b"full".to_vec()));
    assert_eq!(collector.calls.load(Ordering::SeqCst), 1);
}
