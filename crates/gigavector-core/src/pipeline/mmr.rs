//! Maximal Marginal Relevance reranking.

use crate::simd;
use crate::store::{RowId, VectorStore};

/// Greedy MMR selection: repeatedly pick the candidate maximizing
/// `λ·sim(q, d) − (1 − λ)·max_{d' ∈ S} sim(d, d')` with cosine similarity
/// on stored vectors, until `output_k` rows are selected.
///
/// Returns `(row, mmr_score)` pairs in selection order.
pub(super) fn rerank(
    store: &VectorStore,
    query: &[f32],
    candidates: &[RowId],
    lambda: f32,
    output_k: usize,
) -> Vec<(RowId, f32)> {
    let cosine = |a: &[f32], b: &[f32]| 1.0 - simd::cosine_distance(a, b);

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|&row| cosine(query, store.row_unchecked(row)))
        .collect();

    let mut selected: Vec<(RowId, f32)> = Vec::with_capacity(output_k.min(candidates.len()));
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < output_k && !remaining.is_empty() {
        let mut best_at = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (at, &idx) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&(picked, _)| {
                    cosine(
                        store.row_unchecked(candidates[idx]),
                        store.row_unchecked(picked),
                    )
                })
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if redundancy == f32::NEG_INFINITY {
                0.0
            } else {
                redundancy
            };
            let score = lambda * relevance[idx] - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_at = at;
            }
        }
        let idx = remaining.swap_remove(best_at);
        selected.push((candidates[idx], best_score));
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VectorStore;

    #[test]
    fn test_first_pick_is_most_relevant() {
        let mut store = VectorStore::new(2).unwrap();
        store.add(&[1.0, 0.0]).unwrap();
        store.add(&[0.0, 1.0]).unwrap();
        store.add(&[0.9, 0.1]).unwrap();

        let picks = rerank(&store, &[1.0, 0.0], &[0, 1, 2], 0.7, 3);
        assert_eq!(picks[0].0, 0);
    }

    #[test]
    fn test_diversity_beats_redundancy() {
        let mut store = VectorStore::new(2).unwrap();
        store.add(&[1.0, 0.0]).unwrap(); // most relevant
        store.add(&[0.999, 0.01]).unwrap(); // near-duplicate of row 0
        store.add(&[0.5, 0.5]).unwrap(); // diverse

        // With strong diversity weighting the near-duplicate loses.
        let picks = rerank(&store, &[1.0, 0.0], &[0, 1, 2], 0.3, 2);
        assert_eq!(picks[0].0, 0);
        assert_eq!(picks[1].0, 2);
    }

    #[test]
    fn test_truncates_to_output_k() {
        let mut store = VectorStore::new(2).unwrap();
        for i in 0..5 {
            store.add(&[i as f32, 1.0]).unwrap();
        }
        let picks = rerank(&store, &[1.0, 1.0], &[0, 1, 2, 3, 4], 0.7, 2);
        assert_eq!(picks.len(), 2);
    }
}
