//! Core types shared across the cache pipeline.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Cache key uniquely identifying a cached entry.
///
/// Derived deterministically from the source name and an optional extra
/// identifier. Two requests with identical name and extra id always map to
/// the same storage row and the same in-flight generation task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Create a cache key from a source name and an optional extra id.
    ///
    /// An empty `extra_id` yields the bare name; otherwise the two are
    /// joined with a `+` separator.
    pub fn new(name: &str, extra_id: &str) -> Self {
        if extra_id.is_empty() {
            Self(name.to_owned())
        } else {
            Self(format!("{name}+{extra_id}"))
        }
    }

    /// The key as stored in the `name` column.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Modification timestamp in whole seconds since the Unix epoch.
///
/// `TimeStamp::MAX` is the missing-source sentinel: a source that no longer
/// exists is treated as infinitely fresh, so its last cached entry keeps
/// being served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeStamp(pub i64);

impl TimeStamp {
    /// Zero timestamp; as a freshness floor it accepts any stored entry.
    pub const ZERO: TimeStamp = TimeStamp(0);

    /// Missing-source sentinel.
    pub const MAX: TimeStamp = TimeStamp(i64::MAX);

    /// Whether this is the missing-source sentinel.
    pub fn is_sentinel(self) -> bool {
        self == Self::MAX
    }

    /// The oldest stored timestamp still considered fresh for a source
    /// with this modification time, given a debounce `pause`.
    ///
    /// The sentinel maps to [`TimeStamp::ZERO`]: entries for missing
    /// sources are never stale.
    pub fn freshness_floor(self, pause: Duration) -> TimeStamp {
        if self.is_sentinel() {
            TimeStamp::ZERO
        } else {
            TimeStamp(self.0.saturating_sub(pause.as_secs() as i64))
        }
    }
}

impl From<SystemTime> for TimeStamp {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => TimeStamp(elapsed.as_secs() as i64),
            Err(_) => TimeStamp::ZERO,
        }
    }
}

/// Reason a request completed without a captured image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// The cache was flushed or shut down before the request completed.
    Abort,
    /// The collector could not produce an image, or a previously cached
    /// failure was replayed from storage.
    Failed,
    /// Storage has no record for the key and no generation was attempted.
    NoEntry,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Abort => f.write_str("aborted"),
            AbortReason::Failed => f.write_str("failed"),
            AbortReason::NoEntry => f.write_str("no entry"),
        }
    }
}

/// The derived representation a request selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageVariant {
    /// Full-resolution image.
    Image,
    /// Mid-size preview.
    MidSizeImage,
    /// Small preview.
    SmallImage,
    /// Pre-populated icon; never produced by the collector.
    Icon,
}

impl fmt::Display for ImageVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageVariant::Image => f.write_str("image"),
            ImageVariant::MidSizeImage => f.write_str("mid-size image"),
            ImageVariant::SmallImage => f.write_str("small image"),
            ImageVariant::Icon => f.write_str("icon"),
        }
    }
}

/// Completion callback receiving the requested variant's bytes.
///
/// Consuming: exactly one of the capture/abort pair registered for a
/// request is ever invoked.
pub type CaptureCallback = Box<dyn FnOnce(Vec<u8>) + Send>;

/// Completion callback receiving the reason no image was captured.
pub type AbortCallback = Box<dyn FnOnce(AbortReason) + Send>;

/// Opaque payload forwarded to the collector alongside a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuxiliaryData {
    /// No auxiliary payload.
    #[default]
    None,
    /// Requested raster size, for collectors that rasterize vector sources.
    IconSize { width: u32, height: u32 },
    /// Free-form text payload (e.g. a font preview string).
    Text(String),
}
