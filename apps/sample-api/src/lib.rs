//! Wiring for the sample integration: assembles concrete storage/lock/stock
//! backends from configuration, builds the axum `Router`, and exposes the
//! two demo handlers (`POST /orders`, `POST /checkout`) that the
//! idempotency middleware sits in front of.

pub mod config;
pub mod handlers;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use axum::Router;
use axum::routing::post;
use idemp_interceptor::{Interceptor, InterceptorConfig, LockBackendKind, StorageBackendKind, idempotency_middleware};
use idemp_lock::{FileSystemLock, Lock, LockMode, RedisLock};
use idemp_oversell::{InMemoryStockBackend, RedisStockBackend, StockBackend};
use idemp_storage::{InMemoryStorage, PostgresStorage, RedisStorage, Storage};

use crate::config::SampleApiConfig;
use crate::handlers::AppState;

/// Assembles the concrete storage backend named by `interceptor_config`.
pub async fn build_storage(
    interceptor_config: &InterceptorConfig,
    sample_config: &SampleApiConfig,
) -> Result<Arc<dyn Storage>> {
    match interceptor_config.storage_backend {
        StorageBackendKind::Memory => Ok(Arc::new(InMemoryStorage::new())),
        StorageBackendKind::Redis => {
            let url = sample_config
                .redis_url
                .clone()
                .context("IDEMPOTENCY_REDIS_URL is required for the redis storage backend")?;
            let storage = RedisStorage::connect(&url, "sample-api", false)
                .await
                .context("failed to connect to redis")?;
            Ok(Arc::new(storage))
        }
        StorageBackendKind::Postgres => {
            let url = sample_config
                .database_url
                .clone()
                .context("IDEMPOTENCY_DATABASE_URL is required for the postgres storage backend")?;
            let storage = PostgresStorage::connect(&url)
                .await
                .context("failed to connect to postgres")?;
            Ok(Arc::new(storage))
        }
        StorageBackendKind::Cache => {
            bail!(
                "storage_backend=cache has no concrete CacheService wired into this sample binary; \
                 pick memory, redis, or postgres, or supply your own CacheService and use idemp_storage::CacheStorage directly"
            )
        }
    }
}

/// Assembles the concrete lock backend named by `interceptor_config`.
pub async fn build_lock(
    interceptor_config: &InterceptorConfig,
    sample_config: &SampleApiConfig,
) -> Result<Arc<dyn Lock>> {
    match interceptor_config.lock_backend {
        LockBackendKind::FileSystem => {
            let dir = std::env::var("IDEMPOTENCY_LOCK_DIR")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("idemp-sample-api-locks"));
            std::fs::create_dir_all(&dir).context("failed to create lock directory")?;
            Ok(Arc::new(FileSystemLock::new(dir, LockMode::Rename)))
        }
        LockBackendKind::Redis => {
            let url = sample_config
                .redis_url
                .clone()
                .context("IDEMPOTENCY_REDIS_URL is required for the redis lock backend")?;
            let lock = RedisLock::connect(&url, "sample-api")
                .await
                .context("failed to connect to redis")?;
            Ok(Arc::new(lock))
        }
    }
}

/// Builds the stock backend used by `/checkout`'s oversell guard, seeded
/// with a handful of demo SKUs. Uses Redis when a URL is configured, an
/// in-memory counter otherwise.
pub async fn build_stock(
    interceptor_config: &InterceptorConfig,
    sample_config: &SampleApiConfig,
) -> Result<Option<Arc<dyn StockBackend>>> {
    if !interceptor_config.oversell_protection {
        return Ok(None);
    }
    match &sample_config.redis_url {
        Some(url) => {
            let backend = RedisStockBackend::connect(url, "sample-api")
                .await
                .context("failed to connect stock backend to redis")?;
            backend.restock("widget", 10).await?;
            Ok(Some(Arc::new(backend)))
        }
        None => {
            let backend = InMemoryStockBackend::new();
            backend.seed("widget", 10);
            Ok(Some(Arc::new(backend)))
        }
    }
}

/// Everything `main` needs after assembly: the router to serve, the
/// storage backend to sweep periodically, and the configured sweep cadence.
pub struct SampleApp {
    pub router: Router,
    pub storage: Arc<dyn Storage>,
    pub maintenance_interval: std::time::Duration,
}

/// Builds the full axum `Router`, with the idempotency middleware wrapping
/// both demo routes.
pub async fn build_app(sample_config: &SampleApiConfig) -> Result<SampleApp> {
    let interceptor_config = InterceptorConfig::from_env();
    let maintenance_interval = interceptor_config.maintenance_interval;
    let storage = build_storage(&interceptor_config, sample_config).await?;
    let lock = build_lock(&interceptor_config, sample_config).await?;
    let stock = build_stock(&interceptor_config, sample_config).await?;

    let mut interceptor = Interceptor::new(interceptor_config, storage.clone(), lock);
    if let Some(stock) = stock {
        interceptor = interceptor.with_stock_backend(stock);
    }
    let interceptor = Arc::new(interceptor);

    let state = Arc::new(AppState::new());

    let router = Router::new()
        .route("/orders", post(handlers::create_order))
        .route("/checkout", post(handlers::checkout))
        .layer(axum::middleware::from_fn_with_state(
            interceptor.clone(),
            idempotency_middleware,
        ))
        .with_state(state);

    Ok(SampleApp {
        router,
        storage,
        maintenance_interval,
    })
}

/// Spawns the periodic maintenance sweep described by the interceptor's
/// `maintenance_interval`, calling `cleanup` on the active storage backend.
pub fn spawn_maintenance(storage: Arc<dyn Storage>, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match storage.cleanup(1000).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "maintenance cleanup removed expired records");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(%err, "maintenance cleanup failed"),
            }
        }
    })
}
