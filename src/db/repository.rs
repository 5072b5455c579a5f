//! Repository interfaces over the durable tables.
//!
//! The engine only sees these traits; the PostgreSQL and in-memory
//! implementations are chosen when the process is composed.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{
    error::AppResult,
    models::{
        ImpressionOutcome, InteractionEvent, ItemId, ItemSimilarityRecord, NewInteraction,
        RecommendationImpression, RecommendationKind, UserId, UserSimilarityRecord,
    },
};

/// Append-only interaction history
#[async_trait]
pub trait InteractionRepository: Send + Sync {
    async fn append(&self, interaction: &NewInteraction) -> AppResult<InteractionEvent>;

    /// Every interaction of the user, oldest first
    async fn for_user(&self, user_id: UserId) -> AppResult<Vec<InteractionEvent>>;

    /// The user's `limit` most recent interactions, newest first
    async fn recent_for_user(&self, user_id: UserId, limit: usize)
        -> AppResult<Vec<InteractionEvent>>;

    async fn for_users(&self, user_ids: &[UserId]) -> AppResult<Vec<InteractionEvent>>;

    /// Distinct users who interacted with the item
    async fn users_for_item(&self, item_id: ItemId) -> AppResult<HashSet<UserId>>;

    /// Distinct item sets of users with more than `min_activity` interactions
    async fn active_user_items(
        &self,
        min_activity: usize,
    ) -> AppResult<HashMap<UserId, HashSet<ItemId>>>;

    /// Distinct user sets of items with more than `min_activity` interactions
    async fn active_item_users(
        &self,
        min_activity: usize,
    ) -> AppResult<HashMap<ItemId, HashSet<UserId>>>;
}

/// Durable similarity snapshots, upserted by canonical pair
#[async_trait]
pub trait SimilarityRepository: Send + Sync {
    async fn upsert_user_similarity(&self, record: &UserSimilarityRecord) -> AppResult<()>;

    async fn upsert_item_similarity(&self, record: &ItemSimilarityRecord) -> AppResult<()>;

    /// Rows with a score above `threshold` that touch any of `item_ids`
    async fn item_similarities_touching(
        &self,
        item_ids: &[ItemId],
        threshold: f64,
    ) -> AppResult<Vec<ItemSimilarityRecord>>;
}

/// Recommendation impressions, unique per (user, item, kind)
#[async_trait]
pub trait ImpressionRepository: Send + Sync {
    async fn upsert_impressions(&self, impressions: &[RecommendationImpression]) -> AppResult<()>;

    async fn record_outcome(
        &self,
        user_id: UserId,
        item_id: ItemId,
        kind: RecommendationKind,
        outcome: ImpressionOutcome,
    ) -> AppResult<()>;
}

/// Existence checks against the surrounding catalog and account tables
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn user_exists(&self, user_id: UserId) -> AppResult<bool>;

    async fn item_exists(&self, item_id: ItemId) -> AppResult<bool>;
}

/// Store handles resolved at composition time
#[derive(Clone)]
pub struct Repositories {
    pub interactions: Arc<dyn InteractionRepository>,
    pub similarities: Arc<dyn SimilarityRepository>,
    pub impressions: Arc<dyn ImpressionRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
}

impl Repositories {
    /// Uses one backing store for every table
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: InteractionRepository
            + SimilarityRepository
            + ImpressionRepository
            + CatalogRepository
            + 'static,
    {
        Self {
            interactions: store.clone(),
            similarities: store.clone(),
            impressions: store.clone(),
            catalog: store,
        }
    }
}
