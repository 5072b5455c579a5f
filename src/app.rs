use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::{CacheBackendKind, Config, EngineSettings, RetryPolicy},
    db::{
        cache::{create_redis_client, CacheBackend, CacheWriterHandle, MemoryBackend, RedisBackend},
        create_pool, Cache, PgStore, Repositories,
    },
    services::{
        PersistenceWriter, RecommendationEngine, RecomputeWorker, SimilarityCalculator,
        WorkerHandle,
    },
};

/// A fully wired engine plus the background tasks it owns
pub struct App {
    pub engine: RecommendationEngine,
    cache_handle: CacheWriterHandle,
    worker_handle: WorkerHandle,
}

impl App {
    /// Wires the engine over already constructed store handles
    pub fn assemble(
        repos: Repositories,
        backend: Arc<dyn CacheBackend>,
        settings: EngineSettings,
        cache_timeout: Duration,
        retry_policy: RetryPolicy,
    ) -> Self {
        let (cache, cache_handle) = Cache::new(backend, cache_timeout);
        let calculator = SimilarityCalculator::new(
            repos.interactions.clone(),
            cache.clone(),
            settings.similarity_ttl,
        );

        let writer = PersistenceWriter::new(
            repos.clone(),
            calculator.clone(),
            cache.clone(),
            settings.min_activity,
        );
        let (worker, worker_handle) = RecomputeWorker::start(Arc::new(writer), retry_policy);

        let engine = RecommendationEngine::new(repos, cache, calculator, worker, settings);

        Self {
            engine,
            cache_handle,
            worker_handle,
        }
    }

    /// Connects to PostgreSQL and the configured cache backend
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = create_pool(&config.database_url, config.db_max_connections).await?;
        let repos = Repositories::from_store(Arc::new(PgStore::new(pool)));

        let backend: Arc<dyn CacheBackend> = match config.cache_backend {
            CacheBackendKind::Redis => {
                let client = create_redis_client(&config.redis_url)?;
                tracing::info!("Using Redis cache backend");
                Arc::new(RedisBackend::new(client))
            }
            CacheBackendKind::Memory => {
                tracing::info!("Using in-process cache backend");
                Arc::new(MemoryBackend::new())
            }
        };

        Ok(Self::assemble(
            repos,
            backend,
            config.engine_settings(),
            config.cache_timeout(),
            config.retry_policy(),
        ))
    }

    /// Finishes queued background jobs, then flushes pending cache writes.
    /// Jobs write to the cache, so the worker stops first.
    pub async fn shutdown(self) {
        self.worker_handle.shutdown().await;
        self.cache_handle.shutdown().await;
    }
}
