use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

use super::{ItemId, UserId};
use crate::error::AppError;

/// A ranked recommendation returned to the business layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub item_id: ItemId,
    pub score: f64,
    pub reason: String,
}

/// How a recommendation list is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    UserBased,
    ItemBased,
    Hybrid,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::UserBased => "user-based",
            Strategy::ItemBased => "item-based",
            Strategy::Hybrid => "hybrid",
        }
    }

    /// Impression kind recorded for lists served with this strategy
    pub fn recommendation_kind(self) -> RecommendationKind {
        match self {
            Strategy::UserBased => RecommendationKind::UserBased,
            Strategy::ItemBased => RecommendationKind::ItemBased,
            Strategy::Hybrid => RecommendationKind::Hybrid,
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user-based" => Ok(Strategy::UserBased),
            "item-based" => Ok(Strategy::ItemBased),
            "hybrid" => Ok(Strategy::Hybrid),
            other => Err(AppError::InvalidInput(format!(
                "Unknown strategy: {}",
                other
            ))),
        }
    }
}

/// Surface an impression was produced for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    UserBased,
    ItemBased,
    Hybrid,
    SimilarItems,
}

impl RecommendationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecommendationKind::UserBased => "user_based",
            RecommendationKind::ItemBased => "item_based",
            RecommendationKind::Hybrid => "hybrid",
            RecommendationKind::SimilarItems => "similar_items",
        }
    }
}

impl Display for RecommendationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecommendationKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_based" => Ok(RecommendationKind::UserBased),
            "item_based" => Ok(RecommendationKind::ItemBased),
            "hybrid" => Ok(RecommendationKind::Hybrid),
            "similar_items" => Ok(RecommendationKind::SimilarItems),
            other => Err(AppError::InvalidInput(format!(
                "Unknown recommendation kind: {}",
                other
            ))),
        }
    }
}

/// What the shopper did after seeing a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpressionOutcome {
    Clicked,
    Purchased,
}

impl FromStr for ImpressionOutcome {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clicked" => Ok(ImpressionOutcome::Clicked),
            "purchased" => Ok(ImpressionOutcome::Purchased),
            other => Err(AppError::InvalidInput(format!(
                "Unknown impression outcome: {}",
                other
            ))),
        }
    }
}

/// A recommendation shown to a shopper, unique per (user, item, kind)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationImpression {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub score: f64,
    pub kind: RecommendationKind,
    pub shown: bool,
    pub clicked: Option<bool>,
    pub purchased: Option<bool>,
    pub created_at: DateTime<Utc>,
}

impl RecommendationImpression {
    /// Impression for a recommendation that was just served
    pub fn shown(user_id: UserId, kind: RecommendationKind, rec: &Recommendation) -> Self {
        Self {
            user_id,
            item_id: rec.item_id,
            score: rec.score,
            kind,
            shown: true,
            clicked: None,
            purchased: None,
            created_at: Utc::now(),
        }
    }

    pub fn apply_outcome(&mut self, outcome: ImpressionOutcome) {
        match outcome {
            ImpressionOutcome::Clicked => self.clicked = Some(true),
            ImpressionOutcome::Purchased => self.purchased = Some(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse_and_kind() {
        let strategy: Strategy = "item-based".parse().unwrap();
        assert_eq!(strategy, Strategy::ItemBased);
        assert_eq!(
            strategy.recommendation_kind(),
            RecommendationKind::ItemBased
        );
        assert!("popular".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_apply_outcome_sets_only_its_flag() {
        let rec = Recommendation {
            item_id: ItemId(3),
            score: 0.7,
            reason: "test".to_string(),
        };
        let mut impression =
            RecommendationImpression::shown(UserId(1), RecommendationKind::Hybrid, &rec);
        impression.apply_outcome(ImpressionOutcome::Clicked);
        assert_eq!(impression.clicked, Some(true));
        assert_eq!(impression.purchased, None);
        assert!(impression.shown);
    }
}
