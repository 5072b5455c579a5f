use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

use super::{ItemId, UserId};
use crate::error::AppError;

/// What a shopper did with a product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    View,
    AddToCart,
    Purchase,
    Favorite,
    Search,
}

impl ActionKind {
    /// Strength of the signal when a neighbor performed this action
    pub fn behavior_weight(self) -> f64 {
        match self {
            ActionKind::Purchase => 1.0,
            ActionKind::AddToCart => 0.8,
            ActionKind::View => 0.5,
            ActionKind::Favorite | ActionKind::Search => 0.3,
        }
    }

    /// Whether recording this action must invalidate cached lists and
    /// schedule similarity recomputation
    pub fn triggers_refresh(self) -> bool {
        matches!(
            self,
            ActionKind::View | ActionKind::AddToCart | ActionKind::Purchase
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::View => "view",
            ActionKind::AddToCart => "add_to_cart",
            ActionKind::Purchase => "purchase",
            ActionKind::Favorite => "favorite",
            ActionKind::Search => "search",
        }
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(ActionKind::View),
            "add_to_cart" => Ok(ActionKind::AddToCart),
            "purchase" => Ok(ActionKind::Purchase),
            "favorite" => Ok(ActionKind::Favorite),
            "search" => Ok(ActionKind::Search),
            other => Err(AppError::InvalidInput(format!(
                "Unknown action kind: {}",
                other
            ))),
        }
    }
}

/// A stored, immutable user-item interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub id: i64,
    pub user_id: UserId,
    pub item_id: ItemId,
    pub action_kind: ActionKind,
    pub occurred_at: DateTime<Utc>,
}

/// An interaction as submitted by the business layer, before it is stored
#[derive(Debug, Clone, PartialEq)]
pub struct NewInteraction {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub action_kind: ActionKind,
    pub occurred_at: DateTime<Utc>,
}
