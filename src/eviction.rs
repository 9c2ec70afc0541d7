//! Background age-based eviction daemon.
//!
//! The persisted store is otherwise append/overwrite-forever; entries are
//! updated but never deleted. This daemon bounds its growth by
//! periodically deleting rows whose stored timestamp is older than a
//! configured maximum age, then checkpointing the write-ahead log. It
//! responds to cancellation for graceful shutdown.
//!
//! # Usage
//!
//! ```ignore
//! use previewcache::eviction::run_eviction_daemon;
//! use tokio_util::sync::CancellationToken;
//!
//! let cancellation = CancellationToken::new();
//! tokio::spawn(run_eviction_daemon(storage, config, cancellation));
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EvictionConfig;
use crate::storage::{ImageCacheStorage, PruneResult};
use crate::types::TimeStamp;

/// Result of one eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionResult {
    /// Rows deleted per table.
    pub pruned: PruneResult,
    /// Duration of the pass in milliseconds.
    pub duration_ms: u64,
}

/// Run the eviction daemon until cancelled.
///
/// Performs an initial pass on startup, then one per configured interval.
pub async fn run_eviction_daemon(
    storage: Arc<ImageCacheStorage>,
    config: EvictionConfig,
    cancellation: CancellationToken,
) {
    info!(
        max_age_secs = config.max_age.as_secs(),
        interval_secs = config.check_interval_secs,
        "Starting cache eviction daemon"
    );

    match run_eviction_pass(Arc::clone(&storage), config.max_age).await {
        Ok(result) => log_eviction_result(&result),
        Err(err) => warn!(error = %err, "Eviction pass failed"),
    }

    let interval = Duration::from_secs(config.check_interval_secs);
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => {
                info!("Eviction daemon shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {
                match run_eviction_pass(Arc::clone(&storage), config.max_age).await {
                    Ok(result) => log_eviction_result(&result),
                    Err(err) => warn!(error = %err, "Eviction pass failed"),
                }
            }
        }
    }
}

/// Delete all entries older than `max_age` and checkpoint.
pub async fn run_eviction_pass(
    storage: Arc<ImageCacheStorage>,
    max_age: Duration,
) -> Result<EvictionResult, crate::storage::StorageError> {
    let cutoff = TimeStamp::from(SystemTime::now()).freshness_floor(max_age);
    let started = Instant::now();

    let pruned = tokio::task::spawn_blocking(move || {
        let pruned = storage.prune_older_than(cutoff)?;
        if pruned.total() > 0 {
            storage.wal_checkpoint_full()?;
        }
        Ok::<_, crate::storage::StorageError>(pruned)
    })
    .await
    .expect("eviction task panicked")?;

    Ok(EvictionResult {
        pruned,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

fn log_eviction_result(result: &EvictionResult) {
    if result.pruned.total() == 0 {
        debug!("Eviction pass found nothing to delete");
    } else {
        info!(
            images_deleted = result.pruned.images_deleted,
            icons_deleted = result.pruned.icons_deleted,
            duration_ms = result.duration_ms,
            "Evicted stale cache entries"
        );
    }
}
