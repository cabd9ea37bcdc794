//! Application state shared across all handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use redis::Client as RedisClient;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing::info;

use crate::aggregator::ReadAggregator;
use crate::code::RedisCodeRepository;
use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorConfig, Stores};
use crate::db;
use crate::image::{ImageService, ImageStorage, LocalImageStorage};
use crate::metrics::Metrics;
use crate::notify::{
    BroadcastEmitter, ContentEvent, FanoutEmitter, LogEmitter, NotificationEmitter,
    PgNotificationEmitter,
};
use crate::store::PgContentStore;

/// Capacity of the in-process event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// PostgreSQL connection pool.
    db: PgPool,

    /// Redis client for the code snippet store.
    redis: RedisClient,

    /// Write path across the three stores.
    coordinator: Coordinator,

    /// Read path.
    aggregator: ReadAggregator,

    /// Live event subscribers.
    events: BroadcastEmitter,

    /// Local upload directory, when images are stored on disk.
    uploads_dir: Option<PathBuf>,

    /// Prometheus metrics.
    metrics: Arc<Metrics>,
}

/// Content services held by the state.
pub struct StateServices {
    pub coordinator: Coordinator,
    pub aggregator: ReadAggregator,
    /// Should be one of the coordinator's emitters for subscribers to see events.
    pub events: BroadcastEmitter,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Create new application state with database connections.
    pub async fn new(config: &Config) -> Result<Self> {
        // Create PostgreSQL pool
        let db = db::create_pool(config)
            .await
            .context("failed to create database pool")?;

        // Run migrations
        db::run_migrations(&db)
            .await
            .context("failed to run migrations")?;

        // Create Redis client
        let redis = RedisClient::open(config.redis_url.as_str())
            .context("failed to create Redis client")?;

        // Test Redis connection
        let mut conn = redis
            .get_multiplexed_async_connection()
            .await
            .context("failed to connect to Redis")?;

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("Redis PING failed")?;

        let (storage, uploads_dir) = image_storage(config).await?;
        info!(backend = storage.scheme(), "image storage ready");

        let metrics = Arc::new(Metrics::new());
        let events = BroadcastEmitter::new(EVENT_CHANNEL_CAPACITY);
        let emitters: Vec<Arc<dyn NotificationEmitter>> = vec![
            Arc::new(LogEmitter),
            Arc::new(PgNotificationEmitter::new(db.clone())),
            Arc::new(events.clone()),
        ];

        let content = Arc::new(PgContentStore::new(db.clone()));
        let code = Arc::new(RedisCodeRepository::new(redis.clone()));
        let stores = Stores {
            content: content.clone(),
            code: code.clone(),
            images: Arc::new(ImageService::new(storage)),
        };

        let coordinator = Coordinator::new(
            stores,
            Arc::new(FanoutEmitter::new(emitters)),
            metrics.clone(),
            CoordinatorConfig {
                image_folder: config.image_folder.clone(),
                code_retry: config.code_retry(),
            },
        );
        let aggregator = ReadAggregator::new(content, code);

        Ok(Self::from_parts(
            db,
            redis,
            StateServices {
                coordinator,
                aggregator,
                events,
                metrics,
            },
            uploads_dir,
        ))
    }

    /// Assemble state from already-built services.
    ///
    /// Neither connection is touched here, so lazily connected clients work.
    pub fn from_parts(
        db: PgPool,
        redis: RedisClient,
        services: StateServices,
        uploads_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                db,
                redis,
                coordinator: services.coordinator,
                aggregator: services.aggregator,
                events: services.events,
                uploads_dir,
                metrics: services.metrics,
            }),
        }
    }

    /// Get the database pool.
    pub fn db(&self) -> &PgPool {
        &self.inner.db
    }

    /// Get the Redis client.
    pub fn redis(&self) -> &RedisClient {
        &self.inner.redis
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.inner.coordinator
    }

    pub fn aggregator(&self) -> &ReadAggregator {
        &self.inner.aggregator
    }

    /// Subscribe to content lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ContentEvent> {
        self.inner.events.subscribe()
    }

    /// Directory served under `/files`, if images are stored locally.
    pub fn uploads_dir(&self) -> Option<&Path> {
        self.inner.uploads_dir.as_deref()
    }

    /// Get the metrics registry.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Check if PostgreSQL is healthy.
    pub async fn postgres_healthy(&self) -> bool {
        db::check_health(&self.inner.db).await
    }

    /// Check if Redis is healthy.
    pub async fn redis_healthy(&self) -> bool {
        let Ok(mut conn) = self.inner.redis.get_multiplexed_async_connection().await else {
            return false;
        };

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

/// Pick the image backend: S3 when configured, local disk otherwise.
async fn image_storage(config: &Config) -> Result<(Arc<dyn ImageStorage>, Option<PathBuf>)> {
    #[cfg(feature = "s3")]
    if let Some(s3) = &config.s3 {
        use crate::image::S3ImageStorage;

        let storage = match &s3.endpoint {
            Some(endpoint) => {
                S3ImageStorage::with_endpoint(
                    endpoint,
                    s3.bucket.clone(),
                    s3.prefix.clone(),
                    config.files_url.clone(),
                )
                .await?
            }
            None => {
                S3ImageStorage::new(s3.bucket.clone(), s3.prefix.clone(), config.files_url.clone())
                    .await?
            }
        };
        return Ok((Arc::new(storage), None));
    }

    #[cfg(not(feature = "s3"))]
    if config.s3.is_some() {
        anyhow::bail!("S3_BUCKET is set but the kernel was built without the `s3` feature");
    }

    tokio::fs::create_dir_all(&config.uploads_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create uploads directory {}",
                config.uploads_dir.display()
            )
        })?;
    let storage = LocalImageStorage::new(config.uploads_dir.clone(), config.files_url.clone());
    Ok((Arc::new(storage), Some(config.uploads_dir.clone())))
}
