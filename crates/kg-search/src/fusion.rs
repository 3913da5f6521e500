//! Hybrid search fusion (§4.13): combine ranked lists from multiple
//! searchers (full text, vector, geo, ...) into one deduplicated,
//! score-sorted list.

use std::cmp::Ordering;
use std::collections::HashMap;

use kg_model::EntityId;

use crate::types::{RankedList, SearchHit};

pub const DEFAULT_RRF_K: f64 = 60.0;

/// Deduplicates by `entityId`, averaging each source's normalized score
/// weighted by that source's weight, renormalized over the weights of
/// sources that actually ranked the entity (a source missing an entity
/// does not drag its average toward zero).
pub fn weighted_average(lists: &[RankedList], limit: usize) -> Vec<SearchHit> {
    let mut weighted_sum: HashMap<EntityId, f64> = HashMap::new();
    let mut weight_seen: HashMap<EntityId, f64> = HashMap::new();

    for list in lists {
        for (entity_id, raw_score) in &list.hits {
            let normalized = list.kind.normalize(*raw_score);
            *weighted_sum.entry(entity_id.clone()).or_insert(0.0) += normalized * list.weight;
            *weight_seen.entry(entity_id.clone()).or_insert(0.0) += list.weight;
        }
    }

    let mut hits: Vec<SearchHit> = weighted_sum
        .into_iter()
        .map(|(entity_id, sum)| {
            let weight = weight_seen.get(&entity_id).copied().unwrap_or(1.0).max(f64::EPSILON);
            SearchHit { entity_id, score: sum / weight }
        })
        .collect();

    sort_and_truncate(&mut hits, limit);
    hits
}

/// Reciprocal Rank Fusion: `sum(1 / (k + rank_i))` across sources, `rank_i`
/// 1-indexed within each source's list. A source's own score values are
/// irrelevant to RRF, only the rank position within its list.
pub fn reciprocal_rank_fusion(lists: &[RankedList], k: f64, limit: usize) -> Vec<SearchHit> {
    let mut scores: HashMap<EntityId, f64> = HashMap::new();
    for list in lists {
        for (rank, (entity_id, _)) in list.hits.iter().enumerate() {
            let contribution = 1.0 / (k + (rank + 1) as f64);
            *scores.entry(entity_id.clone()).or_insert(0.0) += contribution;
        }
    }

    let mut hits: Vec<SearchHit> = scores.into_iter().map(|(entity_id, score)| SearchHit { entity_id, score }).collect();
    sort_and_truncate(&mut hits, limit);
    hits
}

fn sort_and_truncate(hits: &mut Vec<SearchHit>, limit: usize) {
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    hits.truncate(limit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScoreKind;

    fn list(source: &str, weight: f64, kind: ScoreKind, ids: &[&str], scores: &[f64]) -> RankedList {
        let hits = ids.iter().zip(scores).map(|(id, s)| (EntityId::from_raw(*id), *s)).collect();
        RankedList::new(source, weight, kind, hits).unwrap()
    }

    #[test]
    fn rrf_ranks_entities_present_across_all_sources_highest() {
        // The literal S5 scenario: FTS=[a,b,c], Vector=[a,d,c], Geo=[a,d,c].
        let fts = list("fts", 1.0, ScoreKind::Bm25, &["a", "b", "c"], &[9.0, 5.0, 1.0]);
        let vector = list("vector", 1.0, ScoreKind::Cosine, &["a", "d", "c"], &[0.9, 0.5, 0.1]);
        let geo = list("geo", 1.0, ScoreKind::GeoDistance, &["a", "d", "c"], &[10.0, 500.0, 2000.0]);

        let fused = reciprocal_rank_fusion(&[fts, vector, geo], DEFAULT_RRF_K, 10);
        let rank_of = |id: &str| fused.iter().position(|h| h.entity_id == EntityId::from_raw(id)).unwrap();

        assert!(rank_of("a") < rank_of("d"));
        assert!(rank_of("a") < rank_of("b"));
        assert!(rank_of("c") < rank_of("b"));
        assert!(rank_of("c") < rank_of("d"));
    }

    #[test]
    fn weighted_average_renormalizes_over_sources_that_ranked_the_entity() {
        let only_fts = list("fts", 2.0, ScoreKind::Bm25, &["a"], &[9.0]); // normalized 0.9
        let both = list("vector", 1.0, ScoreKind::Cosine, &["a", "b"], &[0.5, 0.5]);
        let fused = weighted_average(&[only_fts, both], 10);
        let a = fused.iter().find(|h| h.entity_id == EntityId::from_raw("a")).unwrap();
        // (0.9*2 + 0.5*1) / (2+1) = 0.7667, not dragged down by vector's absence elsewhere.
        assert!((a.score - 0.7667).abs() < 1e-3);
    }

    #[test]
    fn results_are_sorted_descending_and_truncated_to_limit() {
        let list_a = list("fts", 1.0, ScoreKind::Bm25, &["a", "b", "c"], &[1.0, 9.0, 5.0]);
        let fused = weighted_average(&[list_a], 2);
        assert_eq!(fused.len(), 2);
        assert!(fused[0].score >= fused[1].score);
    }

    #[test]
    fn negative_weight_is_rejected() {
        use crate::error::SearchError;
        let result = RankedList::new("fts", -1.0, ScoreKind::Bm25, vec![]);
        assert!(matches!(result, Err(SearchError::InvalidWeight(_))));
    }

    #[test]
    fn score_kind_normalization_matches_spec_formulas() {
        assert!((ScoreKind::Bm25.normalize(1.0) - 0.5).abs() < 1e-9);
        assert_eq!(ScoreKind::Cosine.normalize(0.42), 0.42);
        assert!((ScoreKind::GeoDistance.normalize(0.0) - 1.0).abs() < 1e-9);
        assert!((ScoreKind::GeoDistance.normalize(9.0) - 0.1).abs() < 1e-9);
    }
}
