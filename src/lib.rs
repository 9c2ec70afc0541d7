//! previewcache - Disk-backed asynchronous image cache
//!
//! This library provides a deduplicated, background-thread image generation
//! pipeline: clients request derived image variants (full, mid-size, small,
//! icon) for a named source resource, fresh results are served from a SQLite
//! store, and misses are generated once per key by an injected collector on a
//! dedicated worker thread, then persisted and fanned out to every waiter.
//!
//! # High-Level API
//!
//! For most use cases, the [`service`] module provides a simplified facade:
//!
//! ```ignore
//! use previewcache::config::CacheConfig;
//! use previewcache::service::ImageCacheService;
//!
//! let config = CacheConfig::new("/var/cache/previews.db");
//! let service = ImageCacheService::start(config, collector).await?;
//!
//! let image = service.cache().image("diagram.qml", "", Default::default()).await?;
//! ```

pub mod cache;
pub mod collector;
pub mod config;
pub mod eviction;
pub mod generator;
pub mod logging;
pub mod service;
pub mod storage;
pub mod timestamp;
pub mod types;

/// Version of the previewcache library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
