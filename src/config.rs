//! Configuration for the cache pipeline.

use std::path::PathBuf;
use std::time::Duration;

/// Default worker idle timeout before the generator thread goes to sleep.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Retry policy for storage busy/lock contention.
///
/// The backing store is retried with a linearly growing delay; exhausting
/// the attempts surfaces as a storage error instead of livelocking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts per operation (default: 8).
    pub max_attempts: u32,
    /// Delay after the first busy failure; grows linearly per attempt
    /// (default: 10 ms).
    pub initial_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_millis(10),
        }
    }
}

/// Configuration for the age-based eviction daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionConfig {
    /// Entries with a stored timestamp older than this are deleted
    /// (default: 30 days).
    pub max_age: Duration,
    /// Interval between eviction checks (default: 3600 seconds).
    pub check_interval_secs: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(30 * 24 * 60 * 60),
            check_interval_secs: 3600,
        }
    }
}

/// Complete cache pipeline configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Path of the SQLite database file.
    pub database_path: PathBuf,
    /// Worker idle timeout before the generator thread sleeps.
    pub idle_timeout: Duration,
    /// Debounce window subtracted from staleness comparisons.
    pub pause: Duration,
    /// Storage contention retry policy.
    pub retry: RetryConfig,
    /// Optional eviction daemon; `None` preserves the grow-forever
    /// behavior of the original design.
    pub eviction: Option<EvictionConfig>,
}

impl CacheConfig {
    /// Create a configuration with defaults for the given database path.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            pause: crate::timestamp::DEFAULT_PAUSE,
            retry: RetryConfig::default(),
            eviction: None,
        }
    }

    /// Set the worker idle timeout.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Set the staleness debounce window.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Set the storage retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Enable the eviction daemon.
    pub fn with_eviction(mut self, eviction: EvictionConfig) -> Self {
        self.eviction = Some(eviction);
        self
    }
}
