pub mod cache;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use cache::{Cache, CacheKey};
pub use memory::MemoryStore;
pub use postgres::{create_pool, PgStore};
pub use repository::{
    CatalogRepository, ImpressionRepository, InteractionRepository, Repositories,
    SimilarityRepository,
};
