pub mod backend;
pub mod layer;

mod macros;

pub use backend::{create_redis_client, CacheBackend, CacheEntry, MemoryBackend, RedisBackend};
pub use layer::{Cache, CacheKey, CacheWriterHandle};
