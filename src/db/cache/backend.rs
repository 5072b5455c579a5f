use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::collections::HashMap;
use tokio::sync::{OnceCell, RwLock};
use tokio::time::{Duration, Instant};

use crate::error::AppResult;

/// Raw key-value operations a cache store must provide
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()>;

    /// Removes every key starting with `prefix`, returning how many went away
    async fn delete_prefix(&self, prefix: &str) -> AppResult<u64>;
}

/// Creates a Redis client for caching
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Cache store backed by Redis
///
/// One [`ConnectionManager`] is shared by every operation. It is opened on
/// first use, so an unreachable Redis only turns cache calls into misses.
pub struct RedisBackend {
    client: Client,
    manager: OnceCell<ConnectionManager>,
}

impl RedisBackend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            manager: OnceCell::new(),
        }
    }

    async fn connection(&self) -> AppResult<ConnectionManager> {
        let manager = self
            .manager
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.connection().await?;
        let cached: Option<String> = conn.get(key).await?;
        Ok(cached)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<u64> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", prefix);

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        if keys.is_empty() {
            return Ok(0);
        }

        let removed: u64 = conn.del(&keys).await?;
        Ok(removed)
    }
}

/// A cached value with its expiry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local cache store, used by tests and single-process runs
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        matches!(self.get(key).await, Ok(Some(_)))
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: drop it lazily
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()> {
        let entry = CacheEntry {
            key: key.to_string(),
            value: value.to_string(),
            expires_at: Instant::now() + Duration::from_secs(ttl_secs),
        };
        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_round_trip() {
        let backend = MemoryBackend::new();
        backend.set_ex("recs:1:hybrid:10", "[]", 60).await.unwrap();
        assert_eq!(
            backend.get("recs:1:hybrid:10").await.unwrap(),
            Some("[]".to_string())
        );
        assert_eq!(backend.get("recs:2:hybrid:10").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_backend_expires_entries() {
        let backend = MemoryBackend::new();
        backend.set_ex("sim:user:1:2", "0.5", 0).await.unwrap();
        assert_eq!(backend.get("sim:user:1:2").await.unwrap(), None);
        assert_eq!(backend.len().await, 0);
    }

    #[tokio::test]
    async fn test_memory_backend_prefix_delete_is_scoped() {
        let backend = MemoryBackend::new();
        backend.set_ex("recs:1:hybrid:10", "[]", 60).await.unwrap();
        backend.set_ex("recs:1:user-based:5", "[]", 60).await.unwrap();
        backend.set_ex("recs:12:hybrid:10", "[]", 60).await.unwrap();

        let removed = backend.delete_prefix("recs:1:").await.unwrap();
        assert_eq!(removed, 2);
        assert!(backend.contains_key("recs:12:hybrid:10").await);
    }

    #[tokio::test]
    async fn test_redis_backend_prefix_delete() {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let backend = RedisBackend::new(create_redis_client(&redis_url).unwrap());

        if backend.set_ex("test:prefix:a", "1", 60).await.is_err() {
            // No Redis reachable in this environment
            return;
        }
        // later calls share the connection opened by the first one
        assert!(backend.manager.initialized());
        backend.set_ex("test:prefix:b", "2", 60).await.unwrap();

        let removed = backend.delete_prefix("test:prefix:").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(backend.get("test:prefix:a").await.unwrap(), None);
    }
}
