use std::collections::HashMap;

use crate::models::{ItemId, Recommendation};

pub const USER_BASED_WEIGHT: f64 = 0.6;
pub const ITEM_BASED_WEIGHT: f64 = 0.4;

/// Weighted union of the user-based and item-based lists, top `limit` first.
///
/// An item present in both lists scores `0.6 * user + 0.4 * item`. Equal
/// scores keep first-appearance order, with the user-based list read first.
pub fn merge(
    user_based: &[Recommendation],
    item_based: &[Recommendation],
    limit: usize,
) -> Vec<Recommendation> {
    let mut merged: Vec<Recommendation> = Vec::with_capacity(user_based.len() + item_based.len());
    let mut position: HashMap<ItemId, usize> = HashMap::new();

    let weighted = user_based
        .iter()
        .map(|r| (r, USER_BASED_WEIGHT))
        .chain(item_based.iter().map(|r| (r, ITEM_BASED_WEIGHT)));

    for (rec, weight) in weighted {
        match position.get(&rec.item_id) {
            Some(&index) => {
                let entry = &mut merged[index];
                entry.score += weight * rec.score;
                if entry.reason != rec.reason {
                    entry.reason = format!("{}; {}", entry.reason, rec.reason);
                }
            }
            None => {
                position.insert(rec.item_id, merged.len());
                merged.push(Recommendation {
                    item_id: rec.item_id,
                    score: weight * rec.score,
                    reason: rec.reason.clone(),
                });
            }
        }
    }

    // sort_by is stable, so ties stay in first-appearance order
    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged.truncate(limit);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(item: i64, score: f64, reason: &str) -> Recommendation {
        Recommendation {
            item_id: ItemId(item),
            score,
            reason: reason.to_string(),
        }
    }

    #[test]
    fn test_overlapping_item_is_weighted_sum() {
        let user = vec![rec(1, 0.5, "u")];
        let item = vec![rec(1, 0.75, "i")];
        let merged = merge(&user, &item, 10);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].score, 0.6 * 0.5 + 0.4 * 0.75);
        assert_eq!(merged[0].reason, "u; i");
    }

    #[test]
    fn test_never_exceeds_limit() {
        let user: Vec<_> = (1..=8).map(|i| rec(i, 1.0 / i as f64, "u")).collect();
        let item: Vec<_> = (5..=15).map(|i| rec(i, 0.5, "i")).collect();
        assert_eq!(merge(&user, &item, 4).len(), 4);
        assert!(merge(&user, &item, 100).len() <= 15);
    }

    #[test]
    fn test_ties_prefer_user_based_first_appearance() {
        let user = vec![rec(7, 0.5, "u"), rec(4, 0.5, "u"), rec(5, 0.0, "u")];
        let item = vec![rec(9, 0.5, "i"), rec(2, 0.5, "i"), rec(1, 0.0, "i")];
        let merged = merge(&user, &item, 10);
        let order: Vec<i64> = merged.iter().map(|r| r.item_id.0).collect();
        assert_eq!(order, vec![7, 4, 9, 2, 5, 1]);
    }

    #[test]
    fn test_orders_by_combined_score() {
        let user = vec![rec(1, 0.2, "u"), rec(2, 0.1, "u")];
        let item = vec![rec(2, 1.0, "i"), rec(3, 0.1, "i")];
        let merged = merge(&user, &item, 10);
        let order: Vec<i64> = merged.iter().map(|r| r.item_id.0).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(merge(&[], &[], 10).is_empty());
        assert_eq!(merge(&[rec(1, 0.5, "u")], &[], 10)[0].score, 0.3);
    }
}
