use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

use super::{ItemId, UserId};
use crate::error::AppError;

/// Unordered pair stored with its smaller member first, so (a, b) and (b, a)
/// share one row and one cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalPair<T> {
    pub low: T,
    pub high: T,
}

impl<T: Ord + Copy> CanonicalPair<T> {
    pub fn new(a: T, b: T) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// The member of the pair that is not `id`, if `id` belongs to it
    pub fn other(&self, id: T) -> Option<T> {
        if self.low == id {
            Some(self.high)
        } else if self.high == id {
            Some(self.low)
        } else {
            None
        }
    }
}

/// Which kind of entity a similarity query is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Item,
}

impl FromStr for EntityKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(EntityKind::User),
            "item" => Ok(EntityKind::Item),
            other => Err(AppError::InvalidInput(format!(
                "Unknown entity kind: {}",
                other
            ))),
        }
    }
}

/// Provenance of an item-item similarity row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityKind {
    Content,
    Collaborative,
    Hybrid,
}

impl SimilarityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SimilarityKind::Content => "content",
            SimilarityKind::Collaborative => "collaborative",
            SimilarityKind::Hybrid => "hybrid",
        }
    }
}

impl Display for SimilarityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(SimilarityKind::Content),
            "collaborative" => Ok(SimilarityKind::Collaborative),
            "hybrid" => Ok(SimilarityKind::Hybrid),
            other => Err(AppError::Internal(format!(
                "Unknown similarity kind in store: {}",
                other
            ))),
        }
    }
}

/// Algorithm tag written alongside user-user similarity rows
pub const JACCARD_ALGORITHM: &str = "jaccard";

/// Durable user-user similarity snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSimilarityRecord {
    pub pair: CanonicalPair<UserId>,
    pub score: f64,
    pub algorithm: String,
    pub computed_at: DateTime<Utc>,
}

/// Durable item-item similarity snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSimilarityRecord {
    pub pair: CanonicalPair<ItemId>,
    pub score: f64,
    pub similarity_kind: SimilarityKind,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_order_independent() {
        let ab = CanonicalPair::new(UserId(9), UserId(2));
        let ba = CanonicalPair::new(UserId(2), UserId(9));
        assert_eq!(ab, ba);
        assert_eq!(ab.low, UserId(2));
        assert_eq!(ab.high, UserId(9));
    }

    #[test]
    fn test_pair_other() {
        let pair = CanonicalPair::new(ItemId(5), ItemId(1));
        assert_eq!(pair.other(ItemId(1)), Some(ItemId(5)));
        assert_eq!(pair.other(ItemId(5)), Some(ItemId(1)));
        assert_eq!(pair.other(ItemId(3)), None);
    }

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!("user".parse::<EntityKind>().unwrap(), EntityKind::User);
        assert_eq!("item".parse::<EntityKind>().unwrap(), EntityKind::Item);
        assert!("order".parse::<EntityKind>().is_err());
    }
}
