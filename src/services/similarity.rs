//! Pairwise similarity between users and between items.
//!
//! User similarity is Jaccard over interacted item sets; item similarity
//! divides the shared-user count by the geometric mean of the user-set sizes.
//! Action kinds are ignored by both.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use tracing::instrument;

use crate::{
    cached,
    db::{Cache, CacheKey, InteractionRepository},
    error::AppResult,
    models::{CanonicalPair, EntityKind, ItemId, UserId},
};

/// |A ∩ B| / |A ∪ B|, or 0 when either set is empty
pub fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

/// |A ∩ B| / sqrt(|A| · |B|), or 0 when either set is empty
pub fn cosine_overlap<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let denominator = ((a.len() * b.len()) as f64).sqrt();
    (shared as f64 / denominator).min(1.0)
}

/// Computes similarity from stored interactions, memoized in the cache
#[derive(Clone)]
pub struct SimilarityCalculator {
    interactions: Arc<dyn InteractionRepository>,
    cache: Cache,
    ttl: u64,
}

impl SimilarityCalculator {
    pub fn new(interactions: Arc<dyn InteractionRepository>, cache: Cache, ttl: u64) -> Self {
        Self {
            interactions,
            cache,
            ttl,
        }
    }

    /// Similarity between two entities of the same kind
    pub async fn similarity(&self, a: i64, b: i64, kind: EntityKind) -> AppResult<f64> {
        match kind {
            EntityKind::User => self.user_similarity(UserId(a), UserId(b)).await,
            EntityKind::Item => self.item_similarity(ItemId(a), ItemId(b)).await,
        }
    }

    #[instrument(skip(self))]
    pub async fn user_similarity(&self, a: UserId, b: UserId) -> AppResult<f64> {
        let pair = CanonicalPair::new(a, b);
        let key = CacheKey::UserSimilarity(pair);

        cached!(self.cache, key, self.ttl, async {
            let items_a = self.items_of(pair.low).await?;
            let items_b = self.items_of(pair.high).await?;
            AppResult::Ok(jaccard(&items_a, &items_b))
        })
    }

    #[instrument(skip(self))]
    pub async fn item_similarity(&self, a: ItemId, b: ItemId) -> AppResult<f64> {
        let pair = CanonicalPair::new(a, b);
        let key = CacheKey::ItemSimilarity(pair);

        cached!(self.cache, key, self.ttl, async {
            let users_a = self.interactions.users_for_item(pair.low).await?;
            let users_b = self.interactions.users_for_item(pair.high).await?;
            AppResult::Ok(cosine_overlap(&users_a, &users_b))
        })
    }

    /// Writes a freshly recomputed user score through to the cache
    pub fn remember_user_score(&self, pair: CanonicalPair<UserId>, score: f64) {
        self.cache
            .set_in_background(&CacheKey::UserSimilarity(pair), &score, self.ttl);
    }

    /// Writes a freshly recomputed item score through to the cache
    pub fn remember_item_score(&self, pair: CanonicalPair<ItemId>, score: f64) {
        self.cache
            .set_in_background(&CacheKey::ItemSimilarity(pair), &score, self.ttl);
    }

    async fn items_of(&self, user_id: UserId) -> AppResult<HashSet<ItemId>> {
        let events = self.interactions.for_user(user_id).await?;
        Ok(events.into_iter().map(|e| e.item_id).collect())
    }
}
