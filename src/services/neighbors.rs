use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::similarity::jaccard;
use crate::models::{ItemId, UserId};

/// Another user whose taste overlaps the target's
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub user_id: UserId,
    pub similarity: f64,
}

/// Selects the most similar users to a target
#[derive(Debug, Clone)]
pub struct NeighborFinder {
    threshold: f64,
    limit: usize,
}

impl NeighborFinder {
    pub fn new(threshold: f64, limit: usize) -> Self {
        Self { threshold, limit }
    }

    /// Compares the target against every candidate and keeps those strictly
    /// above the threshold, most similar first, ties by ascending user id.
    ///
    /// `candidates` is expected to hold only users above the activity floor;
    /// the target itself is skipped if present.
    pub fn find(
        &self,
        target: UserId,
        target_items: &HashSet<ItemId>,
        candidates: &HashMap<UserId, HashSet<ItemId>>,
    ) -> Vec<Neighbor> {
        if target_items.is_empty() {
            return Vec::new();
        }

        let mut neighbors: Vec<Neighbor> = candidates
            .iter()
            .filter(|(user_id, _)| **user_id != target)
            .map(|(user_id, items)| Neighbor {
                user_id: *user_id,
                similarity: jaccard(target_items, items),
            })
            .filter(|n| n.similarity > self.threshold)
            .collect();

        neighbors.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.user_id.cmp(&b.user_id))
        });
        neighbors.truncate(self.limit);

        tracing::debug!(
            target_user = %target,
            candidates = candidates.len(),
            neighbors = neighbors.len(),
            "Neighbor search completed"
        );

        neighbors
    }
}
