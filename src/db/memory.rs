use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::{
    db::repository::{
        CatalogRepository, ImpressionRepository, InteractionRepository, SimilarityRepository,
    },
    error::AppResult,
    models::{
        CanonicalPair, ImpressionOutcome, InteractionEvent, ItemId, ItemSimilarityRecord,
        NewInteraction, RecommendationImpression, RecommendationKind, UserId,
        UserSimilarityRecord,
    },
};

type ImpressionKey = (UserId, ItemId, RecommendationKind);

/// In-process tables with the same semantics as the PostgreSQL store
#[derive(Default)]
struct Tables {
    interactions: Vec<InteractionEvent>,
    user_similarities: HashMap<CanonicalPair<UserId>, UserSimilarityRecord>,
    item_similarities: HashMap<CanonicalPair<ItemId>, ItemSimilarityRecord>,
    impressions: HashMap<ImpressionKey, RecommendationImpression>,
    users: HashSet<UserId>,
    items: HashSet<ItemId>,
}

/// Repository implementation held entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose catalog already knows the given users and items
    pub fn with_catalog(
        users: impl IntoIterator<Item = UserId>,
        items: impl IntoIterator<Item = ItemId>,
    ) -> Self {
        let tables = Tables {
            users: users.into_iter().collect(),
            items: items.into_iter().collect(),
            ..Default::default()
        };
        Self {
            tables: RwLock::new(tables),
        }
    }

    pub async fn register_user(&self, user_id: UserId) {
        self.tables.write().await.users.insert(user_id);
    }

    pub async fn register_item(&self, item_id: ItemId) {
        self.tables.write().await.items.insert(item_id);
    }

    pub async fn interaction_count(&self) -> usize {
        self.tables.read().await.interactions.len()
    }

    pub async fn user_similarity(
        &self,
        a: UserId,
        b: UserId,
    ) -> Option<UserSimilarityRecord> {
        let tables = self.tables.read().await;
        tables
            .user_similarities
            .get(&CanonicalPair::new(a, b))
            .cloned()
    }

    pub async fn item_similarity(
        &self,
        a: ItemId,
        b: ItemId,
    ) -> Option<ItemSimilarityRecord> {
        let tables = self.tables.read().await;
        tables
            .item_similarities
            .get(&CanonicalPair::new(a, b))
            .cloned()
    }

    pub async fn impression(
        &self,
        user_id: UserId,
        item_id: ItemId,
        kind: RecommendationKind,
    ) -> Option<RecommendationImpression> {
        let tables = self.tables.read().await;
        tables.impressions.get(&(user_id, item_id, kind)).cloned()
    }

    pub async fn impression_count(&self) -> usize {
        self.tables.read().await.impressions.len()
    }
}

fn activity_counts<K, F>(interactions: &[InteractionEvent], key: F) -> HashMap<K, usize>
where
    K: std::hash::Hash + Eq,
    F: Fn(&InteractionEvent) -> K,
{
    let mut counts = HashMap::new();
    for interaction in interactions {
        *counts.entry(key(interaction)).or_insert(0) += 1;
    }
    counts
}

#[async_trait]
impl InteractionRepository for MemoryStore {
    async fn append(&self, interaction: &NewInteraction) -> AppResult<InteractionEvent> {
        let mut tables = self.tables.write().await;
        let event = InteractionEvent {
            id: tables.interactions.len() as i64 + 1,
            user_id: interaction.user_id,
            item_id: interaction.item_id,
            action_kind: interaction.action_kind,
            occurred_at: interaction.occurred_at,
        };
        tables.interactions.push(event.clone());
        Ok(event)
    }

    async fn for_user(&self, user_id: UserId) -> AppResult<Vec<InteractionEvent>> {
        let tables = self.tables.read().await;
        let mut events: Vec<InteractionEvent> = tables
            .interactions
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.occurred_at, e.id));
        Ok(events)
    }

    async fn recent_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> AppResult<Vec<InteractionEvent>> {
        let mut events = self.for_user(user_id).await?;
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }

    async fn for_users(&self, user_ids: &[UserId]) -> AppResult<Vec<InteractionEvent>> {
        let wanted: HashSet<UserId> = user_ids.iter().copied().collect();
        let tables = self.tables.read().await;
        let mut events: Vec<InteractionEvent> = tables
            .interactions
            .iter()
            .filter(|e| wanted.contains(&e.user_id))
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.occurred_at, e.id));
        Ok(events)
    }

    async fn users_for_item(&self, item_id: ItemId) -> AppResult<HashSet<UserId>> {
        let tables = self.tables.read().await;
        Ok(tables
            .interactions
            .iter()
            .filter(|e| e.item_id == item_id)
            .map(|e| e.user_id)
            .collect())
    }

    async fn active_user_items(
        &self,
        min_activity: usize,
    ) -> AppResult<HashMap<UserId, HashSet<ItemId>>> {
        let tables = self.tables.read().await;
        let counts = activity_counts(&tables.interactions, |e| e.user_id);

        let mut sets: HashMap<UserId, HashSet<ItemId>> = HashMap::new();
        for event in &tables.interactions {
            if counts.get(&event.user_id).copied().unwrap_or(0) > min_activity {
                sets.entry(event.user_id).or_default().insert(event.item_id);
            }
        }
        Ok(sets)
    }

    async fn active_item_users(
        &self,
        min_activity: usize,
    ) -> AppResult<HashMap<ItemId, HashSet<UserId>>> {
        let tables = self.tables.read().await;
        let counts = activity_counts(&tables.interactions, |e| e.item_id);

        let mut sets: HashMap<ItemId, HashSet<UserId>> = HashMap::new();
        for event in &tables.interactions {
            if counts.get(&event.item_id).copied().unwrap_or(0) > min_activity {
                sets.entry(event.item_id).or_default().insert(event.user_id);
            }
        }
        Ok(sets)
    }
}

#[async_trait]
impl SimilarityRepository for MemoryStore {
    async fn upsert_user_similarity(&self, record: &UserSimilarityRecord) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        tables.user_similarities.insert(record.pair, record.clone());
        Ok(())
    }

    async fn upsert_item_similarity(&self, record: &ItemSimilarityRecord) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        tables.item_similarities.insert(record.pair, record.clone());
        Ok(())
    }

    async fn item_similarities_touching(
        &self,
        item_ids: &[ItemId],
        threshold: f64,
    ) -> AppResult<Vec<ItemSimilarityRecord>> {
        let wanted: HashSet<ItemId> = item_ids.iter().copied().collect();
        let tables = self.tables.read().await;
        let mut rows: Vec<ItemSimilarityRecord> = tables
            .item_similarities
            .values()
            .filter(|r| wanted.contains(&r.pair.low) || wanted.contains(&r.pair.high))
            .filter(|r| r.score > threshold)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.pair.low.cmp(&b.pair.low))
                .then(a.pair.high.cmp(&b.pair.high))
        });
        Ok(rows)
    }
}

#[async_trait]
impl ImpressionRepository for MemoryStore {
    async fn upsert_impressions(&self, impressions: &[RecommendationImpression]) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        for impression in impressions {
            let key = (impression.user_id, impression.item_id, impression.kind);
            match tables.impressions.get_mut(&key) {
                Some(existing) => {
                    existing.score = impression.score;
                    existing.shown |= impression.shown;
                }
                None => {
                    tables.impressions.insert(key, impression.clone());
                }
            }
        }
        Ok(())
    }

    async fn record_outcome(
        &self,
        user_id: UserId,
        item_id: ItemId,
        kind: RecommendationKind,
        outcome: ImpressionOutcome,
    ) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let impression = tables
            .impressions
            .entry((user_id, item_id, kind))
            .or_insert_with(|| RecommendationImpression {
                user_id,
                item_id,
                score: 0.0,
                kind,
                shown: false,
                clicked: None,
                purchased: None,
                created_at: Utc::now(),
            });
        impression.apply_outcome(outcome);
        Ok(())
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn user_exists(&self, user_id: UserId) -> AppResult<bool> {
        Ok(self.tables.read().await.users.contains(&user_id))
    }

    async fn item_exists(&self, item_id: ItemId) -> AppResult<bool> {
        Ok(self.tables.read().await.items.contains(&item_id))
    }
}
