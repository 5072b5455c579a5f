pub mod engine;
pub mod hybrid;
pub mod neighbors;
pub mod persistence;
pub mod scoring;
pub mod similarity;
pub mod worker;

pub use engine::RecommendationEngine;
pub use neighbors::{Neighbor, NeighborFinder};
pub use persistence::PersistenceWriter;
pub use similarity::SimilarityCalculator;
pub use worker::{Job, JobRunner, RecomputeWorker, WorkerHandle};
