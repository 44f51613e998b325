use std::sync::Arc;

use crate::cache::SnapshotCache;
use crate::core::aliases::DbPool;
use crate::core::config::AppConfig;

/// Shared handles every handler receives through axum's `State`. Cloning is
/// cheap; the pool and cache are internally reference counted.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub cache: SnapshotCache,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(db_pool: DbPool, config: AppConfig) -> Self {
        let cache = SnapshotCache::new(config.cache.ttl, config.cache.capacity);
        Self {
            db_pool,
            cache,
            config: Arc::new(config),
        }
    }
}
