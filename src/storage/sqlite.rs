//! SQLite implementation of the image store.

use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::config::RetryConfig;
use crate::storage::StorageError;
use crate::types::{CacheKey, TimeStamp};

/// Current on-disk schema version.
///
/// Version 0 predates the `midSizeImage` column; migrating to version 1
/// adds the column and clears existing rows (destructive, by design).
pub const SCHEMA_VERSION: i64 = 1;

/// A sufficiently fresh stored entry for one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEntry {
    /// Fresh entry with pixel data.
    Image(Vec<u8>),
    /// Fresh entry recording a failed generation for this variant.
    NullImage,
}

/// Result of an eviction pass over the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneResult {
    /// Rows deleted from the images table.
    pub images_deleted: usize,
    /// Rows deleted from the icons table.
    pub icons_deleted: usize,
}

impl PruneResult {
    /// Total rows deleted.
    pub fn total(&self) -> usize {
        self.images_deleted + self.icons_deleted
    }
}

/// Persistent key-value image store.
///
/// All operations are safe under concurrent access: the connection is
/// serialized behind a mutex, so the hit path (caller thread) and the
/// post-generation write (worker thread) may block briefly on each other.
/// Busy/lock contention from other connections is retried with bounded,
/// linearly growing backoff.
pub struct ImageCacheStorage {
    conn: Mutex<Connection>,
    retry: RetryConfig,
}

impl ImageCacheStorage {
    /// Open (or create) the store at `path`.
    ///
    /// Switches the database to WAL mode and migrates the schema if
    /// required.
    pub fn open(path: impl AsRef<Path>, retry: RetryConfig) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_millis(100))?;

        let storage = Self {
            conn: Mutex::new(conn),
            retry,
        };
        storage.initialize()?;

        info!(path = %path.as_ref().display(), "Opened image cache store");
        Ok(storage)
    }

    /// Open a private in-memory store.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
            retry: RetryConfig::default(),
        };
        storage.initialize()?;
        Ok(storage)
    }

    fn initialize(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(StorageError::UnsupportedVersion(version));
        }

        let has_images: bool = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'images'",
                [],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        if !has_images {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS images (
                     id INTEGER PRIMARY KEY,
                     name TEXT NOT NULL UNIQUE,
                     mtime INTEGER,
                     image BLOB,
                     smallImage BLOB,
                     midSizeImage BLOB
                 );
                 CREATE TABLE IF NOT EXISTS icons (
                     id INTEGER PRIMARY KEY,
                     name TEXT NOT NULL UNIQUE,
                     mtime INTEGER,
                     icon BLOB
                 );",
            )?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            return Ok(());
        }

        if version == 0 {
            // Version 0 rows have no mid-size column; adding it invalidates
            // everything already cached.
            info!("Migrating image cache store from schema version 0");
            conn.execute_batch(
                "ALTER TABLE images ADD COLUMN midSizeImage BLOB;
                 DELETE FROM images;
                 CREATE TABLE IF NOT EXISTS icons (
                     id INTEGER PRIMARY KEY,
                     name TEXT NOT NULL UNIQUE,
                     mtime INTEGER,
                     icon BLOB
                 );",
            )?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(())
    }

    /// Fetch the full image for `key` if its stored timestamp is at least
    /// `min_time`.
    ///
    /// `None` means no sufficiently fresh row exists; absent and stale are
    /// indistinguishable since either triggers regeneration.
    pub fn fetch_image(
        &self,
        key: &CacheKey,
        min_time: TimeStamp,
    ) -> Result<Option<StorageEntry>, StorageError> {
        self.fetch_variant(
            "SELECT image FROM images WHERE name = ?1 AND mtime >= ?2",
            key,
            min_time,
        )
    }

    /// Fetch the mid-size image variant; see [`fetch_image`](Self::fetch_image).
    pub fn fetch_mid_size_image(
        &self,
        key: &CacheKey,
        min_time: TimeStamp,
    ) -> Result<Option<StorageEntry>, StorageError> {
        self.fetch_variant(
            "SELECT midSizeImage FROM images WHERE name = ?1 AND mtime >= ?2",
            key,
            min_time,
        )
    }

    /// Fetch the small image variant; see [`fetch_image`](Self::fetch_image).
    pub fn fetch_small_image(
        &self,
        key: &CacheKey,
        min_time: TimeStamp,
    ) -> Result<Option<StorageEntry>, StorageError> {
        self.fetch_variant(
            "SELECT smallImage FROM images WHERE name = ?1 AND mtime >= ?2",
            key,
            min_time,
        )
    }

    /// Fetch the icon for `key`; see [`fetch_image`](Self::fetch_image).
    pub fn fetch_icon(
        &self,
        key: &CacheKey,
        min_time: TimeStamp,
    ) -> Result<Option<StorageEntry>, StorageError> {
        self.fetch_variant(
            "SELECT icon FROM icons WHERE name = ?1 AND mtime >= ?2",
            key,
            min_time,
        )
    }

    fn fetch_variant(
        &self,
        sql: &str,
        key: &CacheKey,
        min_time: TimeStamp,
    ) -> Result<Option<StorageEntry>, StorageError> {
        let row = self.with_retry(|conn| {
            conn.query_row(sql, params![key.as_str(), min_time.0], |row| {
                row.get::<_, Option<Vec<u8>>>(0)
            })
            .optional()
        })?;

        Ok(row.map(|blob| match blob {
            Some(data) if !data.is_empty() => StorageEntry::Image(data),
            _ => StorageEntry::NullImage,
        }))
    }

    /// Upsert all three image variants for `key` as one write.
    ///
    /// Empty payloads are stored as NULL, recording a failed generation for
    /// that variant.
    pub fn store_image(
        &self,
        key: &CacheKey,
        timestamp: TimeStamp,
        image: &[u8],
        mid_size_image: &[u8],
        small_image: &[u8],
    ) -> Result<(), StorageError> {
        debug!(key = %key, mtime = timestamp.0, "Storing image variants");
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO images (name, mtime, image, midSizeImage, smallImage)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                     mtime = excluded.mtime,
                     image = excluded.image,
                     midSizeImage = excluded.midSizeImage,
                     smallImage = excluded.smallImage",
                params![
                    key.as_str(),
                    timestamp.0,
                    blob_param(image),
                    blob_param(mid_size_image),
                    blob_param(small_image),
                ],
            )
            .map(|_| ())
        })
    }

    /// Upsert the icon for `key`.
    pub fn store_icon(
        &self,
        key: &CacheKey,
        timestamp: TimeStamp,
        icon: &[u8],
    ) -> Result<(), StorageError> {
        debug!(key = %key, mtime = timestamp.0, "Storing icon");
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO icons (name, mtime, icon) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                     mtime = excluded.mtime,
                     icon = excluded.icon",
                params![key.as_str(), timestamp.0, blob_param(icon)],
            )
            .map(|_| ())
        })
    }

    /// Stored modification time for `key`, if a row exists.
    pub fn fetch_modified_image_time(
        &self,
        key: &CacheKey,
    ) -> Result<Option<TimeStamp>, StorageError> {
        let mtime = self.with_retry(|conn| {
            conn.query_row(
                "SELECT mtime FROM images WHERE name = ?1",
                params![key.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()
        })?;
        Ok(mtime.map(TimeStamp))
    }

    /// Whether a non-null full image is stored for `key`.
    pub fn fetch_has_image(&self, key: &CacheKey) -> Result<bool, StorageError> {
        let has = self.with_retry(|conn| {
            conn.query_row(
                "SELECT image IS NOT NULL FROM images WHERE name = ?1",
                params![key.as_str()],
                |row| row.get::<_, bool>(0),
            )
            .optional()
        })?;
        Ok(has.unwrap_or(false))
    }

    /// Flush and compact the write-ahead log.
    ///
    /// Invoked by the generator when its queue drains rather than on every
    /// write, amortizing the I/O cost.
    pub fn wal_checkpoint_full(&self) -> Result<(), StorageError> {
        self.with_retry(|conn| {
            conn.query_row("PRAGMA wal_checkpoint(FULL)", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|_| ())
        })
    }

    /// Delete every row whose stored timestamp is older than `min_time`.
    ///
    /// Rows carrying the missing-source sentinel are never pruned.
    pub fn prune_older_than(&self, min_time: TimeStamp) -> Result<PruneResult, StorageError> {
        let images_deleted = self.with_retry(|conn| {
            conn.execute("DELETE FROM images WHERE mtime < ?1", params![min_time.0])
        })?;
        let icons_deleted = self.with_retry(|conn| {
            conn.execute("DELETE FROM icons WHERE mtime < ?1", params![min_time.0])
        })?;
        Ok(PruneResult {
            images_deleted,
            icons_deleted,
        })
    }

    /// Number of rows in the images table.
    pub fn image_count(&self) -> Result<usize, StorageError> {
        let count = self.with_retry(|conn| {
            conn.query_row("SELECT COUNT(*) FROM images", [], |row| {
                row.get::<_, i64>(0)
            })
        })?;
        Ok(count as usize)
    }

    fn with_retry<T>(
        &self,
        mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut delay = self.retry.initial_delay;

        for attempt in 1..=self.retry.max_attempts {
            match op(&conn) {
                Ok(value) => return Ok(value),
                Err(err) if is_busy(&err) && attempt < self.retry.max_attempts => {
                    debug!(attempt, "Database busy, retrying");
                    thread::sleep(delay);
                    delay += self.retry.initial_delay;
                }
                Err(err) if is_busy(&err) => {
                    return Err(StorageError::Busy {
                        attempts: self.retry.max_attempts,
                    })
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(StorageError::Busy {
            attempts: self.retry.max_attempts,
        })
    }
}

fn blob_param(data: &[u8]) -> Option<&[u8]> {
    if data.is_empty() {
        None
    } else {
        Some(data)
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}
