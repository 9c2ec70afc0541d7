//! Persistent image store backed by SQLite.
//!
//! One row per cache key, holding the three image variants (or an icon)
//! tagged with the source modification time. Fetches are freshness-checked;
//! writes are upserts. A null payload is a valid persisted state recording a
//! permanently failed generation, so repeated requests replay the failure
//! instead of regenerating.

mod error;
mod sqlite;

pub use error::StorageError;
pub use sqlite::{ImageCacheStorage, PruneResult, StorageEntry, SCHEMA_VERSION};
