//! Turns neighbor behavior or item-item similarity into ranked item scores.

use std::collections::{HashMap, HashSet};

use super::neighbors::Neighbor;
use crate::models::{InteractionEvent, ItemId, ItemSimilarityRecord, Recommendation, UserId};

/// Running total for one candidate item
#[derive(Default)]
struct Tally {
    score: f64,
    sources: usize,
}

fn ranked(tallies: HashMap<ItemId, Tally>, reason: impl Fn(usize) -> String) -> Vec<Recommendation> {
    let mut recommendations: Vec<Recommendation> = tallies
        .into_iter()
        .map(|(item_id, tally)| Recommendation {
            item_id,
            score: tally.score,
            reason: reason(tally.sources),
        })
        .collect();

    recommendations.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.item_id.cmp(&b.item_id)));
    recommendations
}

/// Scores items from what the neighbors engaged with.
///
/// Each (neighbor, item) pair contributes the neighbor's similarity times the
/// weight of the strongest action that neighbor took on the item;
/// contributions from different neighbors add up. Anything the target already
/// interacted with, purchases included, is left out.
pub fn user_based_scores(
    target_interactions: &[InteractionEvent],
    neighbors: &[Neighbor],
    neighbor_interactions: &[InteractionEvent],
) -> Vec<Recommendation> {
    let seen: HashSet<ItemId> = target_interactions.iter().map(|e| e.item_id).collect();
    let similarity: HashMap<UserId, f64> = neighbors
        .iter()
        .map(|n| (n.user_id, n.similarity))
        .collect();

    let mut strongest: HashMap<(UserId, ItemId), f64> = HashMap::new();
    for event in neighbor_interactions {
        if seen.contains(&event.item_id) || !similarity.contains_key(&event.user_id) {
            continue;
        }
        let weight = event.action_kind.behavior_weight();
        strongest
            .entry((event.user_id, event.item_id))
            .and_modify(|w| *w = w.max(weight))
            .or_insert(weight);
    }

    let mut tallies: HashMap<ItemId, Tally> = HashMap::new();
    for ((user_id, item_id), weight) in strongest {
        let tally = tallies.entry(item_id).or_default();
        tally.score += similarity[&user_id] * weight;
        tally.sources += 1;
    }

    ranked(tallies, |shoppers| {
        if shoppers == 1 {
            "Liked by a shopper with similar taste".to_string()
        } else {
            format!("Liked by {} shoppers with similar taste", shoppers)
        }
    })
}

/// Scores items by their similarity to what the user recently engaged with.
///
/// For each similarity row touching a recent item, the other item of the row
/// accumulates the row's score. Items in `interacted` are excluded.
pub fn item_based_scores(
    interacted: &HashSet<ItemId>,
    recent: &HashSet<ItemId>,
    rows: &[ItemSimilarityRecord],
) -> Vec<Recommendation> {
    let mut tallies: HashMap<ItemId, Tally> = HashMap::new();

    for row in rows {
        if row.pair.low == row.pair.high {
            continue;
        }
        for anchor in [row.pair.low, row.pair.high] {
            if !recent.contains(&anchor) {
                continue;
            }
            let Some(other) = row.pair.other(anchor) else {
                continue;
            };
            if interacted.contains(&other) {
                continue;
            }
            let tally = tallies.entry(other).or_default();
            tally.score += row.score;
            tally.sources += 1;
        }
    }

    ranked(tallies, |anchors| {
        if anchors == 1 {
            "Similar to an item you engaged with".to_string()
        } else {
            format!("Similar to {} items you engaged with", anchors)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionKind, CanonicalPair, SimilarityKind};
    use chrono::Utc;

    fn event(user: i64, item: i64, kind: ActionKind) -> InteractionEvent {
        InteractionEvent {
            id: 0,
            user_id: UserId(user),
            item_id: ItemId(item),
            action_kind: kind,
            occurred_at: Utc::now(),
        }
    }

    fn neighbor(user: i64, similarity: f64) -> Neighbor {
        Neighbor {
            user_id: UserId(user),
            similarity,
        }
    }

    fn row(a: i64, b: i64, score: f64) -> ItemSimilarityRecord {
        ItemSimilarityRecord {
            pair: CanonicalPair::new(ItemId(a), ItemId(b)),
            score,
            similarity_kind: SimilarityKind::Collaborative,
            computed_at: Utc::now(),
        }
    }

    fn items(ids: &[i64]) -> HashSet<ItemId> {
        ids.iter().map(|&i| ItemId(i)).collect()
    }

    #[test]
    fn test_neighbor_purchase_scores_similarity() {
        let target = vec![
            event(1, 1, ActionKind::Purchase),
            event(1, 2, ActionKind::View),
        ];
        let neighbors = vec![neighbor(2, 0.5)];
        let theirs = vec![
            event(2, 1, ActionKind::Purchase),
            event(2, 3, ActionKind::Purchase),
        ];

        let recs = user_based_scores(&target, &neighbors, &theirs);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].item_id, ItemId(3));
        assert_eq!(recs[0].score, 0.5);
    }

    #[test]
    fn test_contributions_from_neighbors_sum() {
        let target = vec![event(1, 1, ActionKind::View)];
        let neighbors = vec![neighbor(2, 0.5), neighbor(3, 0.25)];
        let theirs = vec![
            event(2, 9, ActionKind::AddToCart),
            event(3, 9, ActionKind::View),
            event(3, 8, ActionKind::Search),
        ];

        let recs = user_based_scores(&target, &neighbors, &theirs);
        assert_eq!(recs[0].item_id, ItemId(9));
        assert!((recs[0].score - (0.5 * 0.8 + 0.25 * 0.5)).abs() < 1e-12);
        assert_eq!(recs[0].reason, "Liked by 2 shoppers with similar taste");
        assert_eq!(recs[1].item_id, ItemId(8));
        assert!((recs[1].score - 0.25 * 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_repeat_actions_use_strongest_weight() {
        let target = vec![event(1, 1, ActionKind::View)];
        let neighbors = vec![neighbor(2, 1.0)];
        let theirs = vec![
            event(2, 5, ActionKind::View),
            event(2, 5, ActionKind::Purchase),
            event(2, 5, ActionKind::View),
        ];

        let recs = user_based_scores(&target, &neighbors, &theirs);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].score, 1.0);
    }

    #[test]
    fn test_non_neighbor_interactions_ignored() {
        let target = vec![event(1, 1, ActionKind::View)];
        let neighbors = vec![neighbor(2, 0.4)];
        let theirs = vec![event(7, 5, ActionKind::Purchase)];
        assert!(user_based_scores(&target, &neighbors, &theirs).is_empty());
    }

    #[test]
    fn test_item_based_accumulates_other_side() {
        let rows = vec![row(1, 10, 0.6), row(10, 2, 0.3), row(2, 11, 0.2)];
        let recs = item_based_scores(&items(&[1, 2]), &items(&[1, 2]), &rows);

        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].item_id, ItemId(10));
        assert!((recs[0].score - 0.9).abs() < 1e-12);
        assert_eq!(recs[0].reason, "Similar to 2 items you engaged with");
        assert_eq!(recs[1].item_id, ItemId(11));
        assert_eq!(recs[1].score, 0.2);
    }

    #[test]
    fn test_item_based_excludes_interacted_items() {
        // item 3 was purchased long ago, outside the recent window
        let rows = vec![row(1, 3, 0.9), row(1, 4, 0.5)];
        let recs = item_based_scores(&items(&[1, 3]), &items(&[1]), &rows);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].item_id, ItemId(4));
    }

    #[test]
    fn test_equal_scores_break_ties_by_item_id() {
        let rows = vec![row(1, 30, 0.5), row(1, 20, 0.5)];
        let recs = item_based_scores(&items(&[1]), &items(&[1]), &rows);
        let order: Vec<i64> = recs.iter().map(|r| r.item_id.0).collect();
        assert_eq!(order, vec![20, 30]);
    }
}
