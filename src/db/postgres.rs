use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Row,
};
use std::collections::{HashMap, HashSet};

use crate::{
    db::repository::{
        CatalogRepository, ImpressionRepository, InteractionRepository, SimilarityRepository,
    },
    error::{AppError, AppResult},
    models::{
        CanonicalPair, ImpressionOutcome, InteractionEvent, ItemId, ItemSimilarityRecord,
        NewInteraction, RecommendationImpression, RecommendationKind, UserId,
        UserSimilarityRecord,
    },
};

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Repository implementation backed by PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn interaction_from_row(row: &PgRow) -> AppResult<InteractionEvent> {
    let action_kind: String = row.try_get("action_kind")?;
    let action_kind = action_kind
        .parse()
        .map_err(|e| AppError::Internal(format!("Corrupt interaction row: {}", e)))?;

    Ok(InteractionEvent {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        item_id: row.try_get("item_id")?,
        action_kind,
        occurred_at: row.try_get("occurred_at")?,
    })
}

fn item_similarity_from_row(row: &PgRow) -> AppResult<ItemSimilarityRecord> {
    let kind: String = row.try_get("similarity_kind")?;
    Ok(ItemSimilarityRecord {
        pair: CanonicalPair::new(row.try_get("item_id_a")?, row.try_get("item_id_b")?),
        score: row.try_get("score")?,
        similarity_kind: kind.parse()?,
        computed_at: row.try_get("computed_at")?,
    })
}

fn user_keys(user_ids: &[UserId]) -> Vec<i64> {
    user_ids.iter().map(|u| u.0).collect()
}

fn item_keys(item_ids: &[ItemId]) -> Vec<i64> {
    item_ids.iter().map(|i| i.0).collect()
}

#[async_trait]
impl InteractionRepository for PgStore {
    async fn append(&self, interaction: &NewInteraction) -> AppResult<InteractionEvent> {
        let row = sqlx::query(
            r#"
            INSERT INTO interactions (user_id, item_id, action_kind, occurred_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, item_id, action_kind, occurred_at
            "#,
        )
        .bind(interaction.user_id)
        .bind(interaction.item_id)
        .bind(interaction.action_kind.as_str())
        .bind(interaction.occurred_at)
        .fetch_one(&self.pool)
        .await?;

        interaction_from_row(&row)
    }

    async fn for_user(&self, user_id: UserId) -> AppResult<Vec<InteractionEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, item_id, action_kind, occurred_at
            FROM interactions
            WHERE user_id = $1
            ORDER BY occurred_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(interaction_from_row).collect()
    }

    async fn recent_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> AppResult<Vec<InteractionEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, item_id, action_kind, occurred_at
            FROM interactions
            WHERE user_id = $1
            ORDER BY occurred_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(interaction_from_row).collect()
    }

    async fn for_users(&self, user_ids: &[UserId]) -> AppResult<Vec<InteractionEvent>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, user_id, item_id, action_kind, occurred_at
            FROM interactions
            WHERE user_id = ANY($1)
            ORDER BY occurred_at ASC, id ASC
            "#,
        )
        .bind(user_keys(user_ids))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(interaction_from_row).collect()
    }

    async fn users_for_item(&self, item_id: ItemId) -> AppResult<HashSet<UserId>> {
        let users: Vec<UserId> =
            sqlx::query_scalar("SELECT DISTINCT user_id FROM interactions WHERE item_id = $1")
                .bind(item_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(users.into_iter().collect())
    }

    async fn active_user_items(
        &self,
        min_activity: usize,
    ) -> AppResult<HashMap<UserId, HashSet<ItemId>>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT i.user_id, i.item_id
            FROM interactions i
            JOIN (
                SELECT user_id
                FROM interactions
                GROUP BY user_id
                HAVING COUNT(*) > $1
            ) active ON active.user_id = i.user_id
            "#,
        )
        .bind(min_activity as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut sets: HashMap<UserId, HashSet<ItemId>> = HashMap::new();
        for row in rows {
            let user_id: UserId = row.try_get("user_id")?;
            let item_id: ItemId = row.try_get("item_id")?;
            sets.entry(user_id).or_default().insert(item_id);
        }

        Ok(sets)
    }

    async fn active_item_users(
        &self,
        min_activity: usize,
    ) -> AppResult<HashMap<ItemId, HashSet<UserId>>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT i.item_id, i.user_id
            FROM interactions i
            JOIN (
                SELECT item_id
                FROM interactions
                GROUP BY item_id
                HAVING COUNT(*) > $1
            ) active ON active.item_id = i.item_id
            "#,
        )
        .bind(min_activity as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut sets: HashMap<ItemId, HashSet<UserId>> = HashMap::new();
        for row in rows {
            let item_id: ItemId = row.try_get("item_id")?;
            let user_id: UserId = row.try_get("user_id")?;
            sets.entry(item_id).or_default().insert(user_id);
        }

        Ok(sets)
    }
}

#[async_trait]
impl SimilarityRepository for PgStore {
    async fn upsert_user_similarity(&self, record: &UserSimilarityRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_similarities (user_id_a, user_id_b, score, algorithm, computed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id_a, user_id_b)
            DO UPDATE SET
                score = EXCLUDED.score,
                algorithm = EXCLUDED.algorithm,
                computed_at = EXCLUDED.computed_at
            "#,
        )
        .bind(record.pair.low)
        .bind(record.pair.high)
        .bind(record.score)
        .bind(&record.algorithm)
        .bind(record.computed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_item_similarity(&self, record: &ItemSimilarityRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO item_similarities (item_id_a, item_id_b, score, similarity_kind, computed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (item_id_a, item_id_b)
            DO UPDATE SET
                score = EXCLUDED.score,
                similarity_kind = EXCLUDED.similarity_kind,
                computed_at = EXCLUDED.computed_at
            "#,
        )
        .bind(record.pair.low)
        .bind(record.pair.high)
        .bind(record.score)
        .bind(record.similarity_kind.as_str())
        .bind(record.computed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn item_similarities_touching(
        &self,
        item_ids: &[ItemId],
        threshold: f64,
    ) -> AppResult<Vec<ItemSimilarityRecord>> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT item_id_a, item_id_b, score, similarity_kind, computed_at
            FROM item_similarities
            WHERE (item_id_a = ANY($1) OR item_id_b = ANY($1))
              AND score > $2
            ORDER BY score DESC, item_id_a ASC, item_id_b ASC
            "#,
        )
        .bind(item_keys(item_ids))
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_similarity_from_row).collect()
    }
}

#[async_trait]
impl ImpressionRepository for PgStore {
    async fn upsert_impressions(&self, impressions: &[RecommendationImpression]) -> AppResult<()> {
        if impressions.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for impression in impressions {
            sqlx::query(
                r#"
                INSERT INTO recommendation_impressions (
                    user_id,
                    item_id,
                    recommendation_kind,
                    score,
                    shown,
                    clicked,
                    purchased,
                    created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (user_id, item_id, recommendation_kind)
                DO UPDATE SET
                    score = EXCLUDED.score,
                    shown = recommendation_impressions.shown OR EXCLUDED.shown
                "#,
            )
            .bind(impression.user_id)
            .bind(impression.item_id)
            .bind(impression.kind.as_str())
            .bind(impression.score)
            .bind(impression.shown)
            .bind(impression.clicked)
            .bind(impression.purchased)
            .bind(impression.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn record_outcome(
        &self,
        user_id: UserId,
        item_id: ItemId,
        kind: RecommendationKind,
        outcome: ImpressionOutcome,
    ) -> AppResult<()> {
        let (clicked, purchased) = match outcome {
            ImpressionOutcome::Clicked => (Some(true), None),
            ImpressionOutcome::Purchased => (None, Some(true)),
        };

        sqlx::query(
            r#"
            INSERT INTO recommendation_impressions (
                user_id,
                item_id,
                recommendation_kind,
                score,
                shown,
                clicked,
                purchased,
                created_at
            )
            VALUES ($1, $2, $3, 0, FALSE, $4, $5, NOW())
            ON CONFLICT (user_id, item_id, recommendation_kind)
            DO UPDATE SET
                clicked = COALESCE(EXCLUDED.clicked, recommendation_impressions.clicked),
                purchased = COALESCE(EXCLUDED.purchased, recommendation_impressions.purchased)
            "#,
        )
        .bind(user_id)
        .bind(item_id)
        .bind(kind.as_str())
        .bind(clicked)
        .bind(purchased)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn user_exists(&self, user_id: UserId) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn item_exists(&self, item_id: ItemId) -> AppResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM products WHERE id = $1)")
                .bind(item_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}
