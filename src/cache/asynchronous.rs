//! Generating cache facade.
//!
//! Requests are enqueued onto an internal dispatch queue. Per request the
//! dispatcher computes the key, checks storage for a sufficiently fresh
//! entry of the requested variant, and either answers immediately (bytes
//! or a replayed cached failure) or forwards the request to the generator
//! with a variant-extracting capture adapter.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::warn;

use crate::cache::stats::CacheStats;
use crate::cache::TaskQueue;
use crate::collector::CollectedImages;
use crate::generator::{ImageCacheGenerator, ImagesCaptureCallback};
use crate::storage::{ImageCacheStorage, StorageEntry};
use crate::timestamp::TimeStampProvider;
use crate::types::{
    AbortCallback, AbortReason, AuxiliaryData, CacheKey, CaptureCallback, ImageVariant,
};

struct RequestEntry {
    name: String,
    extra_id: String,
    auxiliary: AuxiliaryData,
    variant: ImageVariant,
    on_capture: CaptureCallback,
    on_abort: AbortCallback,
}

/// Disk-backed asynchronous image cache with generation fallback.
///
/// Storage, generator, and timestamp provider are shared with the
/// embedding application and must outlive the cache; `Arc` makes that
/// aliasing explicit. Exactly one callback (capture or abort) is invoked
/// per request, including across `clean()` and teardown.
pub struct AsynchronousImageCache {
    queue: TaskQueue<RequestEntry>,
    generator: Arc<ImageCacheGenerator>,
    stats: Arc<Mutex<CacheStats>>,
}

impl AsynchronousImageCache {
    /// Create a cache over the given storage, generator, and timestamp
    /// provider.
    pub fn new(
        storage: Arc<ImageCacheStorage>,
        generator: Arc<ImageCacheGenerator>,
        provider: Arc<dyn TimeStampProvider>,
    ) -> Self {
        let stats = Arc::new(Mutex::new(CacheStats::default()));

        let dispatch_stats = Arc::clone(&stats);
        let dispatch_generator = Arc::clone(&generator);
        let queue = TaskQueue::new(
            "image-cache-dispatch",
            move |entry: RequestEntry| {
                dispatch(
                    entry,
                    &storage,
                    &dispatch_generator,
                    provider.as_ref(),
                    &dispatch_stats,
                );
            },
            |entry: RequestEntry| (entry.on_abort)(AbortReason::Abort),
        );

        Self {
            queue,
            generator,
            stats,
        }
    }

    /// Request the full-resolution image for `(name, extra_id)`.
    pub fn request_image(
        &self,
        name: &str,
        extra_id: &str,
        auxiliary: AuxiliaryData,
        on_capture: CaptureCallback,
        on_abort: AbortCallback,
    ) {
        self.push(ImageVariant::Image, name, extra_id, auxiliary, on_capture, on_abort);
    }

    /// Request the mid-size image variant.
    pub fn request_mid_size_image(
        &self,
        name: &str,
        extra_id: &str,
        auxiliary: AuxiliaryData,
        on_capture: CaptureCallback,
        on_abort: AbortCallback,
    ) {
        self.push(
            ImageVariant::MidSizeImage,
            name,
            extra_id,
            auxiliary,
            on_capture,
            on_abort,
        );
    }

    /// Request the small image variant.
    pub fn request_small_image(
        &self,
        name: &str,
        extra_id: &str,
        auxiliary: AuxiliaryData,
        on_capture: CaptureCallback,
        on_abort: AbortCallback,
    ) {
        self.push(
            ImageVariant::SmallImage,
            name,
            extra_id,
            auxiliary,
            on_capture,
            on_abort,
        );
    }

    /// Request the icon for `(name, extra_id)`.
    ///
    /// Icons are pre-populated via [`ImageCacheStorage::store_icon`]; the
    /// collector never produces them, so a miss aborts with
    /// [`AbortReason::NoEntry`].
    pub fn request_icon(
        &self,
        name: &str,
        extra_id: &str,
        auxiliary: AuxiliaryData,
        on_capture: CaptureCallback,
        on_abort: AbortCallback,
    ) {
        self.push(ImageVariant::Icon, name, extra_id, auxiliary, on_capture, on_abort);
    }

    /// Await the full-resolution image.
    pub async fn image(
        &self,
        name: &str,
        extra_id: &str,
        auxiliary: AuxiliaryData,
    ) -> Result<Vec<u8>, AbortReason> {
        self.request_async(ImageVariant::Image, name, extra_id, auxiliary)
            .await
    }

    /// Await the mid-size image variant.
    pub async fn mid_size_image(
        &self,
        name: &str,
        extra_id: &str,
        auxiliary: AuxiliaryData,
    ) -> Result<Vec<u8>, AbortReason> {
        self.request_async(ImageVariant::MidSizeImage, name, extra_id, auxiliary)
            .await
    }

    /// Await the small image variant.
    pub async fn small_image(
        &self,
        name: &str,
        extra_id: &str,
        auxiliary: AuxiliaryData,
    ) -> Result<Vec<u8>, AbortReason> {
        self.request_async(ImageVariant::SmallImage, name, extra_id, auxiliary)
            .await
    }

    /// Await the icon.
    pub async fn icon(
        &self,
        name: &str,
        extra_id: &str,
        auxiliary: AuxiliaryData,
    ) -> Result<Vec<u8>, AbortReason> {
        self.request_async(ImageVariant::Icon, name, extra_id, auxiliary)
            .await
    }

    /// Flush all pending work.
    ///
    /// Drains the generator's task queue and this cache's dispatch queue,
    /// aborting every pending request with [`AbortReason::Abort`].
    pub fn clean(&self) {
        self.generator.clean();
        self.queue.clean();
    }

    /// Snapshot of the dispatch counters.
    pub fn stats(&self) -> CacheStats {
        *self.stats.lock().unwrap()
    }

    fn push(
        &self,
        variant: ImageVariant,
        name: &str,
        extra_id: &str,
        auxiliary: AuxiliaryData,
        on_capture: CaptureCallback,
        on_abort: AbortCallback,
    ) {
        self.queue.push(RequestEntry {
            name: name.to_owned(),
            extra_id: extra_id.to_owned(),
            auxiliary,
            variant,
            on_capture,
            on_abort,
        });
    }

    async fn request_async(
        &self,
        variant: ImageVariant,
        name: &str,
        extra_id: &str,
        auxiliary: AuxiliaryData,
    ) -> Result<Vec<u8>, AbortReason> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let capture_tx = Arc::clone(&tx);

        let on_capture: CaptureCallback = Box::new(move |data| {
            if let Some(tx) = capture_tx.lock().unwrap().take() {
                let _ = tx.send(Ok(data));
            }
        });
        let on_abort: AbortCallback = Box::new(move |reason| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(Err(reason));
            }
        });

        self.push(variant, name, extra_id, auxiliary, on_capture, on_abort);

        // A dropped sender means the pipeline was torn down before the
        // request resolved.
        rx.await.unwrap_or(Err(AbortReason::Abort))
    }
}

fn dispatch(
    entry: RequestEntry,
    storage: &ImageCacheStorage,
    generator: &ImageCacheGenerator,
    provider: &dyn TimeStampProvider,
    stats: &Mutex<CacheStats>,
) {
    let key = CacheKey::new(&entry.name, &entry.extra_id);
    let source_time = provider.time_stamp(&entry.name);
    let min_time = source_time.freshness_floor(provider.pause());
    stats.lock().unwrap().requests += 1;

    let fetched = match entry.variant {
        ImageVariant::Image => storage.fetch_image(&key, min_time),
        ImageVariant::MidSizeImage => storage.fetch_mid_size_image(&key, min_time),
        ImageVariant::SmallImage => storage.fetch_small_image(&key, min_time),
        ImageVariant::Icon => storage.fetch_icon(&key, min_time),
    };

    match fetched {
        Ok(Some(StorageEntry::Image(data))) => {
            stats.lock().unwrap().storage_hits += 1;
            (entry.on_capture)(data);
        }
        Ok(Some(StorageEntry::NullImage)) => {
            stats.lock().unwrap().cached_failures += 1;
            (entry.on_abort)(AbortReason::Failed);
        }
        Ok(None) if entry.variant == ImageVariant::Icon => {
            stats.lock().unwrap().no_entry += 1;
            (entry.on_abort)(AbortReason::NoEntry);
        }
        Ok(None) => {
            stats.lock().unwrap().generations_requested += 1;
            forward_to_generator(entry, source_time, generator);
        }
        Err(err) => {
            warn!(key = %key, variant = %entry.variant, error = %err, "Storage fetch failed");
            (entry.on_abort)(AbortReason::Failed);
        }
    }
}

fn forward_to_generator(
    entry: RequestEntry,
    source_time: crate::types::TimeStamp,
    generator: &ImageCacheGenerator,
) {
    let variant = entry.variant;
    let on_capture = entry.on_capture;

    // Both adapter closures need the abort callback; only one of them
    // ever takes it.
    let abort_slot: Arc<Mutex<Option<AbortCallback>>> = Arc::new(Mutex::new(Some(entry.on_abort)));
    let capture_abort_slot = Arc::clone(&abort_slot);

    let capture: ImagesCaptureCallback = Box::new(move |images: &CollectedImages| {
        let selected = select_variant(images, variant);
        if selected.is_empty() {
            if let Some(abort) = capture_abort_slot.lock().unwrap().take() {
                abort(AbortReason::Failed);
            }
        } else {
            on_capture(selected);
        }
    });
    let abort: AbortCallback = Box::new(move |reason| {
        if let Some(abort) = abort_slot.lock().unwrap().take() {
            abort(reason);
        }
    });

    generator.generate_image(
        &entry.name,
        &entry.extra_id,
        source_time,
        capture,
        abort,
        entry.auxiliary,
    );
}

fn select_variant(images: &CollectedImages, variant: ImageVariant) -> Vec<u8> {
    match variant {
        ImageVariant::Image => images.image.clone(),
        ImageVariant::MidSizeImage => images.mid_size.clone(),
        ImageVariant::SmallImage => images.small.clone(),
        // Icons are never generated; a miss was answered before the
        // generator was involved.
        ImageVariant::Icon => Vec::new(),
    }
}
