use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::backend::CacheBackend;
use crate::models::{CanonicalPair, ItemId, Strategy, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    UserSimilarity(CanonicalPair<UserId>),
    ItemSimilarity(CanonicalPair<ItemId>),
    Recommendations {
        user_id: UserId,
        strategy: Strategy,
        limit: usize,
    },
    SimilarItems {
        item_id: ItemId,
        limit: usize,
    },
}

impl CacheKey {
    /// Prefix shared by every cached recommendation list of a user
    pub fn user_recommendations_prefix(user_id: UserId) -> String {
        format!("recs:{}:", user_id)
    }

    /// Prefix shared by every cached similar-items list of an item
    pub fn similar_items_prefix(item_id: ItemId) -> String {
        format!("similar:{}:", item_id)
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::UserSimilarity(pair) => write!(f, "sim:user:{}:{}", pair.low, pair.high),
            CacheKey::ItemSimilarity(pair) => write!(f, "sim:item:{}:{}", pair.low, pair.high),
            CacheKey::Recommendations {
                user_id,
                strategy,
                limit,
            } => write!(
                f,
                "{}{}:{}",
                Self::user_recommendations_prefix(*user_id),
                strategy,
                limit
            ),
            CacheKey::SimilarItems { item_id, limit } => {
                write!(f, "{}{}", Self::similar_items_prefix(*item_id), limit)
            }
        }
    }
}

/// Work queued for the background cache writer
enum CacheCommand {
    Set {
        key: String,
        value: String,
        ttl: u64,
    },
    InvalidatePrefix {
        prefix: String,
        ack: oneshot::Sender<()>,
    },
}

/// Best-effort cache in front of a [`CacheBackend`]
///
/// Reads are bounded by a short timeout and fail open: any error, timeout or
/// undecodable value is reported as a miss. Writes and invalidations go
/// through one background task, so an invalidation is always applied after
/// the writes queued before it.
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    write_tx: mpsc::UnboundedSender<CacheCommand>,
    op_timeout: Duration,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl CacheWriterHandle {
    /// Initiates a graceful shutdown of the cache writer
    ///
    /// Sends a shutdown signal to the writer task and waits for it to flush
    /// all pending writes.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Cache writer task panicked");
        }
    }
}

impl Cache {
    /// Creates a new Cache instance with an async write background task
    pub fn new(backend: Arc<dyn CacheBackend>, op_timeout: Duration) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let writer_backend = backend.clone();
        let task = tokio::spawn(async move {
            Self::cache_writer_task(writer_backend, op_timeout, write_rx, shutdown_rx).await;
        });

        let cache = Self {
            backend,
            write_tx,
            op_timeout,
        };

        (cache, CacheWriterHandle { shutdown_tx, task })
    }

    /// Background task that applies queued cache commands in order
    ///
    /// On shutdown signal, stops accepting commands and flushes the ones
    /// already queued before exiting.
    async fn cache_writer_task(
        backend: Arc<dyn CacheBackend>,
        op_timeout: Duration,
        mut write_rx: mpsc::UnboundedReceiver<CacheCommand>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");

        loop {
            tokio::select! {
                Some(command) = write_rx.recv() => {
                    Self::apply(backend.as_ref(), op_timeout, command).await;
                }
                Some(()) = shutdown_rx.recv() => {
                    write_rx.close();
                    let mut flushed = 0usize;
                    while let Some(command) = write_rx.recv().await {
                        Self::apply(backend.as_ref(), op_timeout, command).await;
                        flushed += 1;
                    }
                    tracing::info!(flushed, "Cache writer task stopped");
                    break;
                }
                else => {
                    tracing::info!("Cache writer task stopped, all handles dropped");
                    break;
                }
            }
        }
    }

    /// Applies one command; a backend call slower than `op_timeout` is
    /// abandoned so later commands are not held up behind it.
    async fn apply(backend: &dyn CacheBackend, op_timeout: Duration, command: CacheCommand) {
        match command {
            CacheCommand::Set { key, value, ttl } => {
                match tokio::time::timeout(op_timeout, backend.set_ex(&key, &value, ttl)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, key = %key, "Failed to write cache entry")
                    }
                    Err(_) => tracing::error!(key = %key, "Cache write timed out, entry dropped"),
                }
            }
            CacheCommand::InvalidatePrefix { prefix, ack } => {
                match tokio::time::timeout(op_timeout, backend.delete_prefix(&prefix)).await {
                    Ok(Ok(removed)) => {
                        tracing::debug!(prefix = %prefix, removed, "Cache prefix invalidated")
                    }
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, prefix = %prefix, "Failed to invalidate cache prefix")
                    }
                    Err(_) => {
                        tracing::error!(prefix = %prefix, "Cache invalidation timed out")
                    }
                }
                let _ = ack.send(());
            }
        }
    }

    /// Retrieves a value from the cache by key
    ///
    /// Returns `None` on a miss and also when the cache is unreachable, slow,
    /// or holds a value that no longer deserializes.
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> Option<T> {
        let key = key.to_string();
        let raw = match tokio::time::timeout(self.op_timeout, self.backend.get(&key)).await {
            Ok(Ok(raw)) => raw?,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, key = %key, "Cache read failed, treating as miss");
                return None;
            }
            Err(_) => {
                tracing::warn!(key = %key, "Cache read timed out, treating as miss");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Cache deserialization error, treating as miss");
                None
            }
        }
    }

    /// Stores a value in the cache asynchronously without blocking
    ///
    /// This function serializes the value and sends it to the background
    /// writer, returning immediately without waiting for the write.
    pub fn set_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Cache serialization error");
                return;
            }
        };

        let command = CacheCommand::Set {
            key: key.to_string(),
            value: json,
            ttl,
        };

        if self.write_tx.send(command).is_err() {
            tracing::error!("Cache writer is gone, dropping cache write");
        }
    }

    /// Removes every entry under `prefix`
    ///
    /// Entries already stored are deleted right away, so a slow write queued
    /// ahead cannot keep them readable. The same deletion is also queued
    /// behind earlier writes, which removes anything those writes put back.
    /// Both steps are bounded by the cache timeout.
    pub async fn invalidate_prefix(&self, prefix: String) {
        match tokio::time::timeout(self.op_timeout, self.backend.delete_prefix(&prefix)).await {
            Ok(Ok(removed)) => {
                tracing::debug!(prefix = %prefix, removed, "Cache prefix invalidated")
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, prefix = %prefix, "Cache invalidation failed, retrying in order")
            }
            Err(_) => {
                tracing::warn!(prefix = %prefix, "Cache invalidation timed out, retrying in order")
            }
        }

        let (ack, done) = oneshot::channel();
        let command = CacheCommand::InvalidatePrefix {
            prefix: prefix.clone(),
            ack,
        };

        if self.write_tx.send(command).is_err() {
            tracing::error!(prefix = %prefix, "Cache writer is gone, invalidation dropped");
            return;
        }

        if tokio::time::timeout(self.op_timeout, done).await.is_err() {
            tracing::warn!(prefix = %prefix, "Queued cache invalidation still pending after timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::cache::backend::MemoryBackend;
    use crate::error::AppResult;
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        Backend {}
        #[async_trait]
        impl CacheBackend for Backend {
            async fn get(&self, key: &str) -> AppResult<Option<String>>;
            async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()>;
            async fn delete_prefix(&self, prefix: &str) -> AppResult<u64>;
        }
    }

    /// Memory backend that never answers in time for keys under `stall`
    struct StallingBackend {
        inner: MemoryBackend,
        stall: &'static str,
    }

    impl StallingBackend {
        fn new(stall: &'static str) -> Self {
            Self {
                inner: MemoryBackend::new(),
                stall,
            }
        }

        async fn maybe_stall(&self, key: &str) {
            if key.starts_with(self.stall) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    }

    #[async_trait]
    impl CacheBackend for StallingBackend {
        async fn get(&self, key: &str) -> AppResult<Option<String>> {
            self.maybe_stall(key).await;
            self.inner.get(key).await
        }

        async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()> {
            self.maybe_stall(key).await;
            self.inner.set_ex(key, value, ttl_secs).await
        }

        async fn delete_prefix(&self, prefix: &str) -> AppResult<u64> {
            self.inner.delete_prefix(prefix).await
        }
    }

    fn memory_cache() -> (Cache, CacheWriterHandle, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let (cache, handle) = Cache::new(backend.clone(), Duration::from_millis(500));
        (cache, handle, backend)
    }

    #[test]
    fn test_cache_key_display_user_similarity_is_canonical() {
        let key = CacheKey::UserSimilarity(CanonicalPair::new(UserId(8), UserId(3)));
        assert_eq!(format!("{}", key), "sim:user:3:8");
    }

    #[test]
    fn test_cache_key_display_item_similarity() {
        let key = CacheKey::ItemSimilarity(CanonicalPair::new(ItemId(1), ItemId(2)));
        assert_eq!(format!("{}", key), "sim:item:1:2");
    }

    #[test]
    fn test_cache_key_display_recommendations() {
        let key = CacheKey::Recommendations {
            user_id: UserId(5),
            strategy: Strategy::UserBased,
            limit: 10,
        };
        assert_eq!(format!("{}", key), "recs:5:user-based:10");
        assert!(key
            .to_string()
            .starts_with(&CacheKey::user_recommendations_prefix(UserId(5))));
    }

    #[test]
    fn test_cache_key_display_similar_items() {
        let key = CacheKey::SimilarItems {
            item_id: ItemId(9),
            limit: 4,
        };
        assert_eq!(format!("{}", key), "similar:9:4");
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let (cache, _handle, _backend) = memory_cache();
        let key = CacheKey::SimilarItems {
            item_id: ItemId(1),
            limit: 3,
        };
        let retrieved: Option<Vec<String>> = cache.get_from_cache(&key).await;
        assert_eq!(retrieved, None);
    }

    #[tokio::test]
    async fn test_set_then_invalidate_is_ordered() {
        let (cache, _handle, backend) = memory_cache();
        let key = CacheKey::Recommendations {
            user_id: UserId(1),
            strategy: Strategy::Hybrid,
            limit: 10,
        };

        cache.set_in_background(&key, &vec![1, 2, 3], 60);
        cache
            .invalidate_prefix(CacheKey::user_recommendations_prefix(UserId(1)))
            .await;

        assert!(!backend.contains_key(&key.to_string()).await);
        let retrieved: Option<Vec<i32>> = cache.get_from_cache(&key).await;
        assert_eq!(retrieved, None);
    }

    #[tokio::test]
    async fn test_cache_writer_graceful_shutdown_flushes() {
        let (cache, handle, backend) = memory_cache();
        let key = CacheKey::ItemSimilarity(CanonicalPair::new(ItemId(1), ItemId(2)));

        cache.set_in_background(&key, &0.25f64, 60);
        handle.shutdown().await;

        assert!(backend.contains_key("sim:item:1:2").await);
    }

    #[tokio::test]
    async fn test_backend_error_is_a_miss() {
        let mut backend = MockBackend::new();
        backend.expect_get().returning(|_| {
            Err(crate::error::AppError::Internal("connection refused".to_string()))
        });

        let (cache, _handle) = Cache::new(Arc::new(backend), Duration::from_millis(50));
        let key = CacheKey::UserSimilarity(CanonicalPair::new(UserId(1), UserId(2)));
        let retrieved: Option<f64> = cache.get_from_cache(&key).await;
        assert_eq!(retrieved, None);
    }

    #[tokio::test]
    async fn test_corrupt_value_is_a_miss() {
        let mut backend = MockBackend::new();
        backend
            .expect_get()
            .returning(|_| Ok(Some("not json".to_string())));

        let (cache, _handle) = Cache::new(Arc::new(backend), Duration::from_millis(50));
        let key = CacheKey::UserSimilarity(CanonicalPair::new(UserId(1), UserId(2)));
        let retrieved: Option<f64> = cache.get_from_cache(&key).await;
        assert_eq!(retrieved, None);
    }

    #[tokio::test]
    async fn test_slow_read_is_a_miss() {
        let backend = Arc::new(StallingBackend::new("similar:"));
        backend.inner.set_ex("similar:1:3", "[]", 60).await.unwrap();
        let (cache, _handle) = Cache::new(backend, Duration::from_millis(50));

        let key = CacheKey::SimilarItems {
            item_id: ItemId(1),
            limit: 3,
        };
        let retrieved: Option<Vec<i64>> =
            tokio::time::timeout(Duration::from_secs(2), cache.get_from_cache(&key))
                .await
                .expect("cache read should give up after its own timeout");
        assert_eq!(retrieved, None);
    }

    #[tokio::test]
    async fn test_stalled_write_does_not_block_invalidation() {
        let backend = Arc::new(StallingBackend::new("sim:user:"));
        backend
            .inner
            .set_ex("recs:1:hybrid:10", "[1]", 60)
            .await
            .unwrap();
        let (cache, _handle) = Cache::new(backend.clone(), Duration::from_millis(50));

        let stalled = CacheKey::UserSimilarity(CanonicalPair::new(UserId(1), UserId(2)));
        cache.set_in_background(&stalled, &0.5f64, 60);
        cache
            .invalidate_prefix(CacheKey::user_recommendations_prefix(UserId(1)))
            .await;
        assert!(!backend.inner.contains_key("recs:1:hybrid:10").await);

        // the writer gives up on the stalled entry and keeps going
        let next = CacheKey::ItemSimilarity(CanonicalPair::new(ItemId(1), ItemId(2)));
        cache.set_in_background(&next, &0.25f64, 60);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(backend.inner.contains_key("sim:item:1:2").await);
        assert!(!backend.inner.contains_key("sim:user:1:2").await);
        assert_eq!(backend.inner.len().await, 1);
    }
}
