pub mod cache;
pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    cache::AvailabilityCache,
    clock::SystemClock,
    config::Config,
    database::Database,
    redis_client::RedisClient,
    services::seat_lock::SeatLockManager,
    store::PgLockStore,
};

pub use error::{LockError, Result};
pub use models::{LockId, LockStatus, SeatLock};

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub locks: Arc<SeatLockManager>,
}

impl AppState {
    pub fn new(locks: Arc<SeatLockManager>) -> Arc<Self> {
        Arc::new(Self { locks })
    }

    /// Connects Postgres (and Redis when the availability cache is enabled),
    /// runs migrations and wires the lock manager.
    pub async fn connect(config: &Config) -> anyhow::Result<Arc<Self>> {
        let db = Database::new(&config.database).await?;
        info!("Database connected");
        db.run_migrations().await?;

        let mut manager = SeatLockManager::new(
            Arc::new(PgLockStore::new(&db)),
            Arc::new(SystemClock),
            config.locks.clone(),
        );

        if config.features.enable_availability_cache {
            match &config.redis.url {
                Some(url) => {
                    let redis = RedisClient::new(url).await?;
                    manager = manager.with_cache(AvailabilityCache::new(redis, config.redis.cache_ttl_seconds));
                    info!("Availability cache enabled");
                }
                None => warn!("ENABLE_AVAILABILITY_CACHE is set but REDIS_URL is missing, cache disabled"),
            }
        }

        Ok(Self::new(Arc::new(manager)))
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Seat Lock API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
