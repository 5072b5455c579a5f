//! Request-path operations of the recommendation engine.
//!
//! Every read degrades instead of failing: when a store is unreachable the
//! failure is logged and an empty list is served. Only rejected input
//! (bad limit, unknown or non-positive id) surfaces as an error.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::instrument;

use super::hybrid;
use super::neighbors::NeighborFinder;
use super::scoring;
use super::similarity::{cosine_overlap, SimilarityCalculator};
use super::worker::{Job, RecomputeWorker};
use crate::{
    cached,
    config::EngineSettings,
    db::{Cache, CacheKey, Repositories},
    error::{AppError, AppResult},
    models::{
        ActionKind, EntityKind, ImpressionOutcome, InteractionEvent, ItemId, NewInteraction,
        Recommendation, RecommendationImpression, RecommendationKind, Strategy, UserId,
    },
};

const SIMILAR_ITEM_REASON: &str = "Shoppers who engaged with this item also engaged with it";

/// Serves recommendations and records the signals that feed them
#[derive(Clone)]
pub struct RecommendationEngine {
    repos: Repositories,
    cache: Cache,
    calculator: SimilarityCalculator,
    neighbors: NeighborFinder,
    worker: RecomputeWorker,
    settings: EngineSettings,
}

impl RecommendationEngine {
    pub fn new(
        repos: Repositories,
        cache: Cache,
        calculator: SimilarityCalculator,
        worker: RecomputeWorker,
        settings: EngineSettings,
    ) -> Self {
        let neighbors = NeighborFinder::new(settings.similarity_threshold, settings.neighbor_limit);
        Self {
            repos,
            cache,
            calculator,
            neighbors,
            worker,
            settings,
        }
    }

    /// Stores an interaction. Views, cart adds and purchases also drop the
    /// user's cached lists before returning and queue similarity
    /// recomputation for the user and the item.
    #[instrument(skip(self, occurred_at))]
    pub async fn record_interaction(
        &self,
        user_id: UserId,
        item_id: ItemId,
        action_kind: ActionKind,
        occurred_at: DateTime<Utc>,
    ) -> AppResult<InteractionEvent> {
        self.require_user(user_id).await?;
        self.require_item(item_id).await?;

        let event = self
            .repos
            .interactions
            .append(&NewInteraction {
                user_id,
                item_id,
                action_kind,
                occurred_at,
            })
            .await?;

        if action_kind.triggers_refresh() {
            self.cache
                .invalidate_prefix(CacheKey::user_recommendations_prefix(user_id))
                .await;
            self.worker.submit(Job::RecomputeUser(user_id));
            self.worker.submit(Job::RecomputeItem(item_id));
        }

        tracing::info!(
            user_id = %user_id,
            item_id = %item_id,
            action = %action_kind,
            interaction_id = event.id,
            "Interaction recorded"
        );

        Ok(event)
    }

    /// Ranked recommendations for the user, at most `limit` long
    /// (the configured default when `None`).
    #[instrument(skip(self))]
    pub async fn get_recommendations(
        &self,
        user_id: UserId,
        strategy: Strategy,
        limit: Option<usize>,
    ) -> AppResult<Vec<Recommendation>> {
        let limit = self.resolve_limit(limit)?;
        let served = self.serve_recommendations(user_id, strategy, limit).await;
        degrade(served, "get_recommendations")
    }

    /// Items most similar to the given one, at most `limit` long
    #[instrument(skip(self))]
    pub async fn get_similar_items(
        &self,
        item_id: ItemId,
        limit: Option<usize>,
    ) -> AppResult<Vec<Recommendation>> {
        let limit = self.resolve_limit(limit)?;
        let served = self.serve_similar_items(item_id, limit).await;
        degrade(served, "get_similar_items")
    }

    /// Marks a served recommendation as clicked or purchased
    #[instrument(skip(self))]
    pub async fn record_impression_outcome(
        &self,
        user_id: UserId,
        item_id: ItemId,
        kind: RecommendationKind,
        outcome: ImpressionOutcome,
    ) -> AppResult<()> {
        self.require_user(user_id).await?;
        self.require_item(item_id).await?;

        self.repos
            .impressions
            .record_outcome(user_id, item_id, kind, outcome)
            .await?;

        tracing::info!(
            user_id = %user_id,
            item_id = %item_id,
            kind = %kind,
            ?outcome,
            "Impression outcome recorded"
        );
        Ok(())
    }

    /// Similarity score in [0, 1] between two users or two items
    #[instrument(skip(self))]
    pub async fn pairwise_similarity(&self, a: i64, b: i64, kind: EntityKind) -> AppResult<f64> {
        match kind {
            EntityKind::User => {
                self.require_user(UserId(a)).await?;
                self.require_user(UserId(b)).await?;
            }
            EntityKind::Item => {
                self.require_item(ItemId(a)).await?;
                self.require_item(ItemId(b)).await?;
            }
        }

        self.calculator.similarity(a, b, kind).await
    }

    /// Cached lists are served before the catalog is consulted, so a stored
    /// list survives an outage of the account tables.
    async fn serve_recommendations(
        &self,
        user_id: UserId,
        strategy: Strategy,
        limit: usize,
    ) -> AppResult<Vec<Recommendation>> {
        check_positive(user_id.0, "user")?;

        let key = CacheKey::Recommendations {
            user_id,
            strategy,
            limit,
        };
        if let Some(cached) = self.cache.get_from_cache::<Vec<Recommendation>>(&key).await {
            tracing::debug!(user_id = %user_id, %strategy, "Serving cached recommendations");
            return Ok(cached);
        }

        self.require_user(user_id).await?;
        let computed = self.compute_recommendations(user_id, strategy, limit).await?;
        if computed.complete {
            self.cache.set_in_background(
                &key,
                &computed.recommendations,
                self.settings.recommendation_ttl,
            );
        }
        let recommendations = computed.recommendations;

        if !recommendations.is_empty() {
            let kind = strategy.recommendation_kind();
            let impressions = recommendations
                .iter()
                .map(|rec| RecommendationImpression::shown(user_id, kind, rec))
                .collect();
            self.worker.submit(Job::RecordImpressions(impressions));
        }

        tracing::info!(
            user_id = %user_id,
            %strategy,
            count = recommendations.len(),
            complete = computed.complete,
            "Recommendations computed"
        );

        Ok(recommendations)
    }

    async fn compute_recommendations(
        &self,
        user_id: UserId,
        strategy: Strategy,
        limit: usize,
    ) -> AppResult<Computed> {
        let history = self.repos.interactions.for_user(user_id).await?;
        if history.is_empty() {
            return Ok(Computed::complete(Vec::new()));
        }

        let mut computed = match strategy {
            Strategy::UserBased => Computed::complete(self.user_based(user_id, &history).await?),
            Strategy::ItemBased => Computed::complete(self.item_based(user_id, &history).await?),
            Strategy::Hybrid => {
                let (user_based, item_based) = tokio::join!(
                    self.user_based(user_id, &history),
                    self.item_based(user_id, &history)
                );
                match (user_based, item_based) {
                    (Ok(user_based), Ok(item_based)) => {
                        Computed::complete(hybrid::merge(&user_based, &item_based, limit))
                    }
                    (Ok(user_based), Err(e)) if e.is_recoverable() => {
                        tracing::warn!(
                            error = %e,
                            user_id = %user_id,
                            "Item-based scores unavailable, serving user-based scores only"
                        );
                        Computed::partial(hybrid::merge(&user_based, &[], limit))
                    }
                    (Err(e), Ok(item_based)) if e.is_recoverable() => {
                        tracing::warn!(
                            error = %e,
                            user_id = %user_id,
                            "User-based scores unavailable, serving item-based scores only"
                        );
                        Computed::partial(hybrid::merge(&[], &item_based, limit))
                    }
                    (Err(e), _) | (_, Err(e)) => return Err(e),
                }
            }
        };
        computed.recommendations.truncate(limit);
        Ok(computed)
    }

    async fn user_based(
        &self,
        user_id: UserId,
        history: &[InteractionEvent],
    ) -> AppResult<Vec<Recommendation>> {
        let target_items: HashSet<ItemId> = history.iter().map(|e| e.item_id).collect();

        let candidates = self
            .repos
            .interactions
            .active_user_items(self.settings.min_activity)
            .await?;
        let neighbors = self.neighbors.find(user_id, &target_items, &candidates);
        if neighbors.is_empty() {
            return Ok(Vec::new());
        }

        let neighbor_ids: Vec<UserId> = neighbors.iter().map(|n| n.user_id).collect();
        let neighbor_history = self.repos.interactions.for_users(&neighbor_ids).await?;

        Ok(scoring::user_based_scores(
            history,
            &neighbors,
            &neighbor_history,
        ))
    }

    async fn item_based(
        &self,
        user_id: UserId,
        history: &[InteractionEvent],
    ) -> AppResult<Vec<Recommendation>> {
        let interacted: HashSet<ItemId> = history.iter().map(|e| e.item_id).collect();

        let recent: HashSet<ItemId> = self
            .repos
            .interactions
            .recent_for_user(user_id, self.settings.recent_interactions)
            .await?
            .into_iter()
            .map(|e| e.item_id)
            .collect();
        let anchors: Vec<ItemId> = recent.iter().copied().collect();

        let rows = self
            .repos
            .similarities
            .item_similarities_touching(&anchors, self.settings.similarity_threshold)
            .await?;

        Ok(scoring::item_based_scores(&interacted, &recent, &rows))
    }

    async fn serve_similar_items(
        &self,
        item_id: ItemId,
        limit: usize,
    ) -> AppResult<Vec<Recommendation>> {
        check_positive(item_id.0, "item")?;

        let key = CacheKey::SimilarItems { item_id, limit };
        cached!(self.cache, key, self.settings.similarity_ttl, async {
            self.require_item(item_id).await?;
            self.compute_similar_items(item_id, limit).await
        })
    }

    /// Durable rows first; when the item has none yet, scores it against the
    /// active items directly and queues a recompute to persist the result.
    async fn compute_similar_items(
        &self,
        item_id: ItemId,
        limit: usize,
    ) -> AppResult<Vec<Recommendation>> {
        let rows = self
            .repos
            .similarities
            .item_similarities_touching(&[item_id], self.settings.similarity_threshold)
            .await?;

        let mut similar: Vec<Recommendation> = rows
            .iter()
            .filter_map(|row| {
                let other = row.pair.other(item_id).filter(|other| *other != item_id)?;
                Some(similar_item(other, row.score))
            })
            .collect();

        if similar.is_empty() {
            similar = self.similar_items_from_interactions(item_id).await?;
            if !similar.is_empty() {
                self.worker.submit(Job::RecomputeItem(item_id));
            }
        }

        similar.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.item_id.cmp(&b.item_id)));
        similar.truncate(limit);
        Ok(similar)
    }

    async fn similar_items_from_interactions(
        &self,
        item_id: ItemId,
    ) -> AppResult<Vec<Recommendation>> {
        let users = self.repos.interactions.users_for_item(item_id).await?;
        if users.is_empty() {
            return Ok(Vec::new());
        }

        let active = self
            .repos
            .interactions
            .active_item_users(self.settings.min_activity)
            .await?;

        Ok(active
            .iter()
            .filter(|(other, _)| **other != item_id)
            .map(|(other, other_users)| (*other, cosine_overlap(&users, other_users)))
            .filter(|(_, score)| *score > self.settings.similarity_threshold)
            .map(|(other, score)| similar_item(other, score))
            .collect())
    }

    fn resolve_limit(&self, limit: Option<usize>) -> AppResult<usize> {
        let limit = limit.unwrap_or(self.settings.default_limit);
        if limit == 0 || limit > self.settings.max_limit {
            return Err(AppError::InvalidInput(format!(
                "limit must be within 1..={}, got {}",
                self.settings.max_limit, limit
            )));
        }
        Ok(limit)
    }

    async fn require_user(&self, user_id: UserId) -> AppResult<()> {
        check_positive(user_id.0, "user")?;
        if !self.repos.catalog.user_exists(user_id).await? {
            return Err(AppError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }

    async fn require_item(&self, item_id: ItemId) -> AppResult<()> {
        check_positive(item_id.0, "item")?;
        if !self.repos.catalog.item_exists(item_id).await? {
            return Err(AppError::NotFound(format!("item {}", item_id)));
        }
        Ok(())
    }
}

/// A computed list and whether every source contributed to it.
/// Partial lists are served but never cached.
struct Computed {
    recommendations: Vec<Recommendation>,
    complete: bool,
}

impl Computed {
    fn complete(recommendations: Vec<Recommendation>) -> Self {
        Self {
            recommendations,
            complete: true,
        }
    }

    fn partial(recommendations: Vec<Recommendation>) -> Self {
        Self {
            recommendations,
            complete: false,
        }
    }
}

fn check_positive(id: i64, entity: &str) -> AppResult<()> {
    if id <= 0 {
        return Err(AppError::InvalidInput(format!(
            "{} id must be positive, got {}",
            entity, id
        )));
    }
    Ok(())
}

fn similar_item(item_id: ItemId, score: f64) -> Recommendation {
    Recommendation {
        item_id,
        score,
        reason: SIMILAR_ITEM_REASON.to_string(),
    }
}

/// Turns an unreachable store into an empty list; rejections pass through
fn degrade(
    served: AppResult<Vec<Recommendation>>,
    operation: &'static str,
) -> AppResult<Vec<Recommendation>> {
    match served {
        Err(e) if e.is_recoverable() => {
            tracing::error!(error = %e, operation, "Store unavailable, serving an empty list");
            Ok(Vec::new())
        }
        other => other,
    }
}
