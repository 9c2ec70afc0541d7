//! Pre-populated-only cache facade.
//!
//! Serves whatever storage already holds, with no timestamp check and no
//! generation fallback: a missing row aborts with
//! [`AbortReason::NoEntry`], a null row replays the recorded failure.

use std::sync::Arc;

use tracing::warn;

use crate::cache::TaskQueue;
use crate::storage::{ImageCacheStorage, StorageEntry};
use crate::types::{
    AbortCallback, AbortReason, CacheKey, CaptureCallback, ImageVariant, TimeStamp,
};

struct ExplicitRequestEntry {
    name: String,
    extra_id: String,
    variant: ImageVariant,
    on_capture: CaptureCallback,
    on_abort: AbortCallback,
}

/// Cache over explicitly stored entries only.
pub struct ExplicitImageCache {
    queue: TaskQueue<ExplicitRequestEntry>,
}

impl ExplicitImageCache {
    /// Create a cache over the given storage.
    pub fn new(storage: Arc<ImageCacheStorage>) -> Self {
        let queue = TaskQueue::new(
            "explicit-cache-dispatch",
            move |entry: ExplicitRequestEntry| dispatch(entry, &storage),
            |entry: ExplicitRequestEntry| (entry.on_abort)(AbortReason::Abort),
        );
        Self { queue }
    }

    /// Request the full-resolution image for `(name, extra_id)`.
    pub fn request_image(
        &self,
        name: &str,
        extra_id: &str,
        on_capture: CaptureCallback,
        on_abort: AbortCallback,
    ) {
        self.push(ImageVariant::Image, name, extra_id, on_capture, on_abort);
    }

    /// Request the mid-size image variant.
    pub fn request_mid_size_image(
        &self,
        name: &str,
        extra_id: &str,
        on_capture: CaptureCallback,
        on_abort: AbortCallback,
    ) {
        self.push(ImageVariant::MidSizeImage, name, extra_id, on_capture, on_abort);
    }

    /// Request the small image variant.
    pub fn request_small_image(
        &self,
        name: &str,
        extra_id: &str,
        on_capture: CaptureCallback,
        on_abort: AbortCallback,
    ) {
        self.push(ImageVariant::SmallImage, name, extra_id, on_capture, on_abort);
    }

    /// Request the icon.
    pub fn request_icon(
        &self,
        name: &str,
        extra_id: &str,
        on_capture: CaptureCallback,
        on_abort: AbortCallback,
    ) {
        self.push(ImageVariant::Icon, name, extra_id, on_capture, on_abort);
    }

    /// Drain the dispatch queue, aborting every pending request with
    /// [`AbortReason::Abort`].
    pub fn clean(&self) {
        self.queue.clean();
    }

    fn push(
        &self,
        variant: ImageVariant,
        name: &str,
        extra_id: &str,
        on_capture: CaptureCallback,
        on_abort: AbortCallback,
    ) {
        self.queue.push(ExplicitRequestEntry {
            name: name.to_owned(),
            extra_id: extra_id.to_owned(),
            variant,
            on_capture,
            on_abort,
        });
    }
}

fn dispatch(entry: ExplicitRequestEntry, storage: &ImageCacheStorage) {
    let key = CacheKey::new(&entry.name, &entry.extra_id);

    let fetched = match entry.variant {
        ImageVariant::Image => storage.fetch_image(&key, TimeStamp::ZERO),
        ImageVariant::MidSizeImage => storage.fetch_mid_size_image(&key, TimeStamp::ZERO),
        ImageVariant::SmallImage => storage.fetch_small_image(&key, TimeStamp::ZERO),
        ImageVariant::Icon => storage.fetch_icon(&key, TimeStamp::ZERO),
    };

    match fetched {
        Ok(Some(StorageEntry::Image(data))) => (entry.on_capture)(data),
        Ok(Some(StorageEntry::NullImage)) => (entry.on_abort)(AbortReason::Failed),
        Ok(None) => (entry.on_abort)(AbortReason::NoEntry),
        Err(err) => {
            warn!(key = %key, variant = %entry.variant, error = %err, "Storage fetch failed");
            (entry.on_abort)(AbortReason::Failed);
        }
    }
}
