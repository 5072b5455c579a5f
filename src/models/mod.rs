use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub mod interaction;
pub mod recommendation;
pub mod similarity;

pub use interaction::{ActionKind, InteractionEvent, NewInteraction};
pub use recommendation::{
    ImpressionOutcome, Recommendation, RecommendationImpression, RecommendationKind, Strategy,
};
pub use similarity::{
    CanonicalPair, EntityKind, ItemSimilarityRecord, SimilarityKind, UserSimilarityRecord,
};

/// Identifier of a shopper, as assigned by the account store
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub i64);

/// Identifier of a catalog product
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ItemId(pub i64);

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_plain_numbers() {
        assert_eq!(serde_json::to_string(&UserId(42)).unwrap(), "42");
        let item: ItemId = serde_json::from_str("7").unwrap();
        assert_eq!(item, ItemId(7));
    }

    #[test]
    fn test_id_display() {
        assert_eq!(format!("{}", UserId(3)), "3");
        assert_eq!(format!("{}", ItemId(1001)), "1001");
    }
}
