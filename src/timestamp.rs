//! Source modification timestamps for staleness checks.
//!
//! A [`TimeStampProvider`] answers "when did this source last change" so
//! the cache can decide whether a stored entry is still fresh. The
//! filesystem implementation reads file mtimes; a missing source yields the
//! [`TimeStamp::MAX`] sentinel so its last cached entry is never considered
//! stale.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::TimeStamp;

/// Default debounce window subtracted from staleness comparisons.
///
/// Avoids regenerating images for sources that changed within the window.
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(1);

/// Provides modification timestamps for named source resources.
///
/// Implementations must be free of side effects and safe to call from both
/// the caller thread (hit path) and the generator worker thread.
pub trait TimeStampProvider: Send + Sync {
    /// Last modification time of the named source, or [`TimeStamp::MAX`]
    /// if the source does not exist.
    fn time_stamp(&self, name: &str) -> TimeStamp;

    /// Grace period subtracted from staleness comparisons.
    fn pause(&self) -> Duration {
        DEFAULT_PAUSE
    }
}

/// Filesystem-backed timestamp provider reading file mtimes.
#[derive(Debug, Clone)]
pub struct FileTimeStampProvider {
    /// Optional root the source names are resolved against.
    root: Option<PathBuf>,
    /// Debounce window.
    pause: Duration,
}

impl FileTimeStampProvider {
    /// Create a provider resolving names as-is (absolute or cwd-relative).
    pub fn new() -> Self {
        Self {
            root: None,
            pause: DEFAULT_PAUSE,
        }
    }

    /// Resolve source names relative to `root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Set the debounce window.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    fn resolve(&self, name: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(name),
            None => PathBuf::from(name),
        }
    }
}

impl Default for FileTimeStampProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeStampProvider for FileTimeStampProvider {
    fn time_stamp(&self, name: &str) -> TimeStamp {
        let path = self.resolve(name);
        match fs::metadata(&path).and_then(|meta| meta.modified()) {
            Ok(mtime) => TimeStamp::from(mtime),
            Err(_) => TimeStamp::MAX,
        }
    }

    fn pause(&self) -> Duration {
        self.pause
    }
}
