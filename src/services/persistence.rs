use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use tracing::instrument;

use super::similarity::{cosine_overlap, jaccard, SimilarityCalculator};
use super::worker::{Job, JobRunner};
use crate::{
    db::{Cache, CacheKey, Repositories},
    error::AppResult,
    models::{
        similarity::JACCARD_ALGORITHM, CanonicalPair, ItemId, ItemSimilarityRecord,
        RecommendationImpression, SimilarityKind, UserId, UserSimilarityRecord,
    },
};

/// Upserts durable similarity snapshots and impression records
pub struct PersistenceWriter {
    repos: Repositories,
    calculator: SimilarityCalculator,
    cache: Cache,
    min_activity: usize,
}

impl PersistenceWriter {
    pub fn new(
        repos: Repositories,
        calculator: SimilarityCalculator,
        cache: Cache,
        min_activity: usize,
    ) -> Self {
        Self {
            repos,
            calculator,
            cache,
            min_activity,
        }
    }

    /// Recomputes the user's similarity to every active user and upserts
    /// the non-zero scores. Returns how many rows were written.
    #[instrument(skip(self))]
    pub async fn recompute_user(&self, user_id: UserId) -> AppResult<usize> {
        let items: HashSet<ItemId> = self
            .repos
            .interactions
            .for_user(user_id)
            .await?
            .into_iter()
            .map(|e| e.item_id)
            .collect();
        if items.is_empty() {
            return Ok(0);
        }

        let active = self
            .repos
            .interactions
            .active_user_items(self.min_activity)
            .await?;

        let mut written = 0;
        for (other, other_items) in &active {
            if *other == user_id {
                continue;
            }
            let score = jaccard(&items, other_items);
            if score <= 0.0 {
                continue;
            }

            let record = UserSimilarityRecord {
                pair: CanonicalPair::new(user_id, *other),
                score,
                algorithm: JACCARD_ALGORITHM.to_string(),
                computed_at: Utc::now(),
            };
            self.repos.similarities.upsert_user_similarity(&record).await?;
            self.calculator.remember_user_score(record.pair, score);
            written += 1;
        }

        tracing::info!(
            user_id = %user_id,
            compared = active.len(),
            written,
            "User similarity recomputed"
        );

        Ok(written)
    }

    /// Recomputes the item's similarity to every active item and upserts
    /// the non-zero scores. Returns how many rows were written.
    #[instrument(skip(self))]
    pub async fn recompute_item(&self, item_id: ItemId) -> AppResult<usize> {
        let users = self.repos.interactions.users_for_item(item_id).await?;
        if users.is_empty() {
            return Ok(0);
        }

        let active = self
            .repos
            .interactions
            .active_item_users(self.min_activity)
            .await?;

        let mut written = 0;
        for (other, other_users) in &active {
            if *other == item_id {
                continue;
            }
            let score = cosine_overlap(&users, other_users);
            if score <= 0.0 {
                continue;
            }

            let record = ItemSimilarityRecord {
                pair: CanonicalPair::new(item_id, *other),
                score,
                similarity_kind: SimilarityKind::Collaborative,
                computed_at: Utc::now(),
            };
            self.repos.similarities.upsert_item_similarity(&record).await?;
            self.calculator.remember_item_score(record.pair, score);
            written += 1;
        }

        self.cache
            .invalidate_prefix(CacheKey::similar_items_prefix(item_id))
            .await;

        tracing::info!(
            item_id = %item_id,
            compared = active.len(),
            written,
            "Item similarity recomputed"
        );

        Ok(written)
    }

    pub async fn record_impressions(
        &self,
        impressions: &[RecommendationImpression],
    ) -> AppResult<()> {
        self.repos.impressions.upsert_impressions(impressions).await?;
        tracing::debug!(count = impressions.len(), "Impressions recorded");
        Ok(())
    }
}

#[async_trait]
impl JobRunner for PersistenceWriter {
    async fn run(&self, job: &Job) -> AppResult<()> {
        match job {
            Job::RecomputeUser(user_id) => self.recompute_user(*user_id).await.map(|_| ()),
            Job::RecomputeItem(item_id) => self.recompute_item(*item_id).await.map(|_| ()),
            Job::RecordImpressions(impressions) => self.record_impressions(impressions).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::cache::MemoryBackend;
    use crate::db::MemoryStore;
    use crate::db::InteractionRepository;
    use crate::models::{ActionKind, NewInteraction};
    use std::sync::Arc;
    use std::time::Duration;

    async fn seed(store: &MemoryStore, entries: &[(i64, i64)]) {
        for &(user, item) in entries {
            store
                .append(&NewInteraction {
                    user_id: UserId(user),
                    item_id: ItemId(item),
                    action_kind: ActionKind::View,
                    occurred_at: Utc::now(),
                })
                .await
                .unwrap();
        }
    }

    fn writer(store: Arc<MemoryStore>) -> (PersistenceWriter, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let (cache, _handle) = Cache::new(backend.clone(), Duration::from_millis(200));
        let repos = Repositories::from_store(store);
        let calculator = SimilarityCalculator::new(repos.interactions.clone(), cache.clone(), 60);
        (PersistenceWriter::new(repos, calculator, cache, 2), backend)
    }

    #[tokio::test]
    async fn test_recompute_user_persists_canonical_rows() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            &[(2, 1), (2, 2), (2, 3), (1, 1), (1, 2), (1, 3), (3, 7), (3, 8), (3, 9)],
        )
        .await;

        let (writer, _backend) = writer(store.clone());
        let written = writer.recompute_user(UserId(2)).await.unwrap();

        // user 3 shares nothing with user 2 and gets no row
        assert_eq!(written, 1);
        let record = store.user_similarity(UserId(2), UserId(1)).await.unwrap();
        assert_eq!(record.pair.low, UserId(1));
        assert_eq!(record.pair.high, UserId(2));
        assert_eq!(record.score, 1.0);
        assert_eq!(record.algorithm, "jaccard");
        assert!(store.user_similarity(UserId(2), UserId(3)).await.is_none());
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, &[(1, 1), (1, 2), (1, 3), (2, 2), (2, 3), (2, 4)]).await;

        let (writer, _backend) = writer(store.clone());
        writer.recompute_user(UserId(1)).await.unwrap();
        let first = store.user_similarity(UserId(1), UserId(2)).await.unwrap();
        writer.recompute_user(UserId(1)).await.unwrap();
        let second = store.user_similarity(UserId(1), UserId(2)).await.unwrap();

        assert_eq!(first.score, 0.5);
        assert!((first.score - second.score).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_recompute_item_persists_collaborative_rows() {
        let store = Arc::new(MemoryStore::new());
        // item 10: users 1,2,3; item 11: users 1,2,3,4 -> 3 / sqrt(12)
        seed(
            &store,
            &[(1, 10), (2, 10), (3, 10), (1, 11), (2, 11), (3, 11), (4, 11)],
        )
        .await;

        let (writer, _backend) = writer(store.clone());
        let written = writer.recompute_item(ItemId(10)).await.unwrap();

        assert_eq!(written, 1);
        let record = store.item_similarity(ItemId(11), ItemId(10)).await.unwrap();
        assert_eq!(record.similarity_kind, SimilarityKind::Collaborative);
        assert!((record.score - 3.0 / 12f64.sqrt()).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_unknown_entity_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, &[(1, 1), (1, 2), (1, 3)]).await;

        let (writer, _backend) = writer(store.clone());
        assert_eq!(writer.recompute_user(UserId(99)).await.unwrap(), 0);
        assert_eq!(writer.recompute_item(ItemId(99)).await.unwrap(), 0);
    }
}
