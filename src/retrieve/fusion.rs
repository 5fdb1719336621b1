//! Rank fusion for hybrid retrieval.

use crate::types::SymbolId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fusion strategies. Reciprocal rank fusion is the default: it needs no
/// score calibration between BM25 and cosine distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    #[default]
    ReciprocalRank,
    Weighted,
}

/// `score(s) = Σ_rankings 1 / (k + rank(s))`, rank 1-based. A symbol
/// missing from a ranking contributes nothing for it.
pub fn reciprocal_rank(rankings: &[&[SymbolId]], k: f32) -> HashMap<SymbolId, f32> {
    let mut scores = HashMap::new();
    for ranking in rankings {
        for (index, symbol_id) in ranking.iter().enumerate() {
            let contribution = 1.0 / (k + (index as f32 + 1.0));
            *scores.entry(*symbol_id).or_insert(0.0) += contribution;
        }
    }
    scores
}

/// `score = α · bm25_norm + (1 − α) · (1 − dist_norm)` with min-max
/// normalization inside each component. Symbols present in only one
/// component keep that component's term alone.
pub fn weighted(
    bm25: &[(SymbolId, f32)],
    vector: &[(SymbolId, f32)],
    alpha: f32,
) -> HashMap<SymbolId, f32> {
    let bm25_norm = min_max_normalize(bm25);
    let dist_norm = min_max_normalize(vector);

    let mut scores = HashMap::new();
    for (symbol_id, normalized) in &bm25_norm {
        *scores.entry(*symbol_id).or_insert(0.0) += alpha * normalized;
    }
    for (symbol_id, normalized) in &dist_norm {
        *scores.entry(*symbol_id).or_insert(0.0) += (1.0 - alpha) * (1.0 - normalized);
    }
    scores
}

fn min_max_normalize(scores: &[(SymbolId, f32)]) -> Vec<(SymbolId, f32)> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().map(|(_, s)| *s).fold(f32::INFINITY, f32::min);
    let max = scores
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::NEG_INFINITY, f32::max);
    let span = max - min;
    scores
        .iter()
        .map(|(id, score)| {
            // All-equal scores normalize to the neutral midpoint.
            let normalized = if span > 0.0 { (score - min) / span } else { 0.5 };
            (*id, normalized)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(id: u32) -> SymbolId {
        SymbolId::new(id).unwrap()
    }

    #[test]
    fn test_rrf_rewards_presence_in_both() {
        let bm25 = [sid(1), sid(2), sid(3)];
        let vector = [sid(2), sid(4)];
        let scores = reciprocal_rank(&[&bm25, &vector], 60.0);

        // Symbol 2 appears in both rankings, so it outranks 1 (rank 1 in
        // one list only).
        assert!(scores[&sid(2)] > scores[&sid(1)]);
        assert!(scores[&sid(1)] > scores[&sid(3)]);
        // RRF with k=60: rank 1 + rank 1 would be 2/61; here 1/62 + 1/61.
        let expected = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((scores[&sid(2)] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_rrf_missing_contributes_zero() {
        let only = [sid(7)];
        let scores = reciprocal_rank(&[&only, &[]], 60.0);
        assert_eq!(scores.len(), 1);
        assert!((scores[&sid(7)] - 1.0 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn test_weighted_fusion_blends() {
        let bm25 = [(sid(1), 10.0), (sid(2), 5.0)];
        let vector = [(sid(2), 0.1), (sid(3), 0.9)];
        let scores = weighted(&bm25, &vector, 0.5);

        // Symbol 2: bm25_norm 0.0, distance_norm 0.0 → 0.5 * 0 + 0.5 * 1.
        assert!((scores[&sid(2)] - 0.5).abs() < 1e-6);
        // Symbol 1: best bm25 only → 0.5.
        assert!((scores[&sid(1)] - 0.5).abs() < 1e-6);
        // Symbol 3: worst distance only → 0.0.
        assert!(scores[&sid(3)].abs() < 1e-6);
    }

    #[test]
    fn test_weighted_alpha_shifts_balance() {
        let bm25 = [(sid(1), 1.0)];
        let vector = [(sid(2), 0.0)];
        let keyword_heavy = weighted(&bm25, &vector, 0.7);
        let semantic_heavy = weighted(&bm25, &vector, 0.3);
        assert!(keyword_heavy[&sid(1)] > keyword_heavy[&sid(2)]);
        assert!(semantic_heavy[&sid(2)] > semantic_heavy[&sid(1)]);
    }
}
