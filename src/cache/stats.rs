//! Cache request statistics.

/// Counters for monitoring the request dispatch path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests dispatched.
    pub requests: u64,
    /// Requests served directly from storage.
    pub storage_hits: u64,
    /// Requests answered by a cached failure (null entry).
    pub cached_failures: u64,
    /// Requests forwarded to the generator.
    pub generations_requested: u64,
    /// Requests answered with "no entry" (pre-populated-only paths).
    pub no_entry: u64,
}

impl CacheStats {
    /// Storage hit rate over all dispatched requests (0.0 to 1.0).
    ///
    /// Cached failures count as hits: they were answered from storage
    /// without touching the collector.
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            (self.storage_hits + self.cached_failures) as f64 / self.requests as f64
        }
    }
}
