//! Cache service lifecycle management.
//!
//! [`ImageCacheService`] is the top-level owner: it constructs storage,
//! timestamp provider, generator, and the client facades once at startup,
//! wires them together with explicit shared ownership, and shuts the whole
//! pipeline down in order. Embedding applications hold one service for
//! their lifetime instead of scattering singletons.
//!
//! # Usage
//!
//! ```ignore
//! use previewcache::config::CacheConfig;
//! use previewcache::service::ImageCacheService;
//!
//! let config = CacheConfig::new("/var/cache/previews.db");
//! let service = ImageCacheService::start(config, collector).await?;
//!
//! let image = service.cache().image("scene.qml", "", Default::default()).await;
//!
//! service.shutdown().await;
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::{AsynchronousImageCache, ExplicitImageCache};
use crate::collector::ImageCollector;
use crate::config::CacheConfig;
use crate::eviction::run_eviction_daemon;
use crate::generator::ImageCacheGenerator;
use crate::storage::{ImageCacheStorage, StorageError};
use crate::timestamp::{FileTimeStampProvider, TimeStampProvider};

/// Errors that can occur while starting the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Opening or migrating the store failed
    #[error("failed to open cache store: {0}")]
    Storage(#[from] StorageError),
}

/// A running cache pipeline.
pub struct ImageCacheService {
    storage: Arc<ImageCacheStorage>,
    generator: Arc<ImageCacheGenerator>,
    cache: AsynchronousImageCache,
    explicit_cache: ExplicitImageCache,
    shutdown: CancellationToken,
    eviction: Option<JoinHandle<()>>,
}

impl ImageCacheService {
    /// Start the pipeline with a filesystem timestamp provider.
    pub async fn start(
        config: CacheConfig,
        collector: Arc<dyn ImageCollector>,
    ) -> Result<Self, ServiceError> {
        let provider = Arc::new(FileTimeStampProvider::new().with_pause(config.pause));
        Self::start_with_provider(config, collector, provider).await
    }

    /// Start the pipeline with a custom timestamp provider.
    pub async fn start_with_provider(
        config: CacheConfig,
        collector: Arc<dyn ImageCollector>,
        provider: Arc<dyn TimeStampProvider>,
    ) -> Result<Self, ServiceError> {
        let storage = Arc::new(ImageCacheStorage::open(
            &config.database_path,
            config.retry.clone(),
        )?);
        let generator = Arc::new(ImageCacheGenerator::with_idle_timeout(
            collector,
            Arc::clone(&storage),
            config.idle_timeout,
        ));
        let cache = AsynchronousImageCache::new(
            Arc::clone(&storage),
            Arc::clone(&generator),
            provider,
        );
        let explicit_cache = ExplicitImageCache::new(Arc::clone(&storage));

        let shutdown = CancellationToken::new();
        let eviction = config.eviction.map(|eviction_config| {
            tokio::spawn(run_eviction_daemon(
                Arc::clone(&storage),
                eviction_config,
                shutdown.child_token(),
            ))
        });

        info!(database = %config.database_path.display(), "Image cache service started");
        Ok(Self {
            storage,
            generator,
            cache,
            explicit_cache,
            shutdown,
            eviction,
        })
    }

    /// The generating cache facade.
    pub fn cache(&self) -> &AsynchronousImageCache {
        &self.cache
    }

    /// The pre-populated-only cache facade.
    pub fn explicit_cache(&self) -> &ExplicitImageCache {
        &self.explicit_cache
    }

    /// The backing store, e.g. for pre-populating icons.
    pub fn storage(&self) -> &Arc<ImageCacheStorage> {
        &self.storage
    }

    /// Shut the pipeline down gracefully.
    ///
    /// Stops the eviction daemon, aborts all pending requests with
    /// `Abort`, and joins the generator worker. No callback runs after
    /// this returns.
    pub async fn shutdown(self) {
        info!("Image cache service shutting down");
        self.shutdown.cancel();
        self.cache.clean();
        self.explicit_cache.clean();
        self.generator.wait_for_finished();
        if let Some(eviction) = self.eviction {
            let _ = eviction.await;
        }
    }
}
