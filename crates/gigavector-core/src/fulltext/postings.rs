//! Position-aware posting lists with block-max precomputation.

use serde::{Deserialize, Serialize};

/// BM25 tuning parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term frequency saturation parameter.
    pub k1: f32,
    /// Document length normalization parameter.
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

impl Bm25Params {
    /// BM25 contribution of one term occurrence set:
    /// `idf · tf(k1+1) / (tf + k1(1 − b + b·dl/avgdl))`.
    #[inline]
    #[must_use]
    pub fn term_score(&self, idf: f32, tf: u32, doc_len: u32, avgdl: f32) -> f32 {
        let tf = tf as f32;
        let len_norm = 1.0 - self.b + self.b * doc_len as f32 / avgdl;
        idf * tf * (self.k1 + 1.0) / (tf + self.k1 * len_norm)
    }

    /// `idf = ln((N − df + 0.5)/(df + 0.5) + 1)`.
    #[inline]
    #[must_use]
    pub fn idf(&self, doc_count: usize, df: usize) -> f32 {
        if df == 0 {
            return 0.0;
        }
        let n = doc_count as f32;
        let df = df as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }
}

/// One `(doc, tf, positions)` entry of a posting list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct Posting {
    pub doc_id: u64,
    pub tf: u32,
    /// Strictly increasing token positions; empty when phrase matching
    /// is disabled.
    pub positions: Vec<u32>,
}

/// A per-term posting list, sorted ascending by `doc_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct TermPostings {
    pub postings: Vec<Posting>,
}

impl TermPostings {
    /// Document frequency of the term.
    #[must_use]
    pub fn df(&self) -> usize {
        self.postings.len()
    }

    /// Adds (or replaces) the posting for `doc_id`, keeping doc order.
    pub fn upsert(&mut self, doc_id: u64, tf: u32, positions: Vec<u32>) {
        let posting = Posting {
            doc_id,
            tf,
            positions,
        };
        match self.postings.binary_search_by_key(&doc_id, |p| p.doc_id) {
            Ok(i) => self.postings[i] = posting,
            Err(i) => self.postings.insert(i, posting),
        }
    }

    /// Removes the posting for `doc_id`. Returns true if one existed.
    pub fn remove(&mut self, doc_id: u64) -> bool {
        match self.postings.binary_search_by_key(&doc_id, |p| p.doc_id) {
            Ok(i) => {
                self.postings.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// Looks up the posting for `doc_id`.
    #[must_use]
    pub fn get(&self, doc_id: u64) -> Option<&Posting> {
        self.postings
            .binary_search_by_key(&doc_id, |p| p.doc_id)
            .ok()
            .map(|i| &self.postings[i])
    }

    /// Computes the block-max array: for each block of `block_size`
    /// postings, the maximum BM25 contribution any document in that block
    /// could attain under the current corpus statistics.
    #[must_use]
    pub fn compute_block_maxes(
        &self,
        block_size: usize,
        params: Bm25Params,
        idf: f32,
        avgdl: f32,
        doc_len: impl Fn(u64) -> u32,
    ) -> Vec<f32> {
        self.postings
            .chunks(block_size)
            .map(|block| {
                block
                    .iter()
                    .map(|p| params.term_score(idf, p.tf, doc_len(p.doc_id), avgdl))
                    .fold(0.0f32, f32::max)
            })
            .collect()
    }

    /// Validates the load-time invariants: doc ids strictly ascending and
    /// positions strictly increasing within each posting.
    pub fn check_sorted(&self) -> bool {
        let docs_ok = self
            .postings
            .windows(2)
            .all(|w| w[0].doc_id < w[1].doc_id);
        let positions_ok = self
            .postings
            .iter()
            .all(|p| p.positions.windows(2).all(|w| w[0] < w[1]));
        docs_ok && positions_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_keeps_doc_order() {
        let mut list = TermPostings::default();
        list.upsert(5, 1, vec![0]);
        list.upsert(1, 2, vec![3, 9]);
        list.upsert(3, 1, vec![2]);
        let docs: Vec<u64> = list.postings.iter().map(|p| p.doc_id).collect();
        assert_eq!(docs, vec![1, 3, 5]);
        assert!(list.check_sorted());
    }

    #[test]
    fn test_upsert_replaces_existing_doc() {
        let mut list = TermPostings::default();
        list.upsert(1, 1, vec![0]);
        list.upsert(1, 3, vec![0, 4, 7]);
        assert_eq!(list.df(), 1);
        assert_eq!(list.get(1).unwrap().tf, 3);
    }

    #[test]
    fn test_remove() {
        let mut list = TermPostings::default();
        list.upsert(1, 1, vec![0]);
        list.upsert(2, 1, vec![1]);
        assert!(list.remove(1));
        assert!(!list.remove(1));
        assert_eq!(list.df(), 1);
    }

    #[test]
    fn test_block_maxes_are_upper_bounds() {
        let params = Bm25Params::default();
        let mut list = TermPostings::default();
        for doc in 0..10u64 {
            list.upsert(doc, (doc % 3 + 1) as u32, vec![]);
        }
        let idf = params.idf(100, list.df());
        let maxes = list.compute_block_maxes(4, params, idf, 10.0, |_| 10);
        assert_eq!(maxes.len(), 3);
        for (i, block) in list.postings.chunks(4).enumerate() {
            for p in block {
                let score = params.term_score(idf, p.tf, 10, 10.0);
                assert!(score <= maxes[i] + 1e-6);
            }
        }
    }

    #[test]
    fn test_idf_formula() {
        let params = Bm25Params::default();
        // N=3, df=1: ln((3-1+0.5)/(1+0.5)+1) = ln(8/3)
        let idf = params.idf(3, 1);
        assert!((idf - (8.0f32 / 3.0).ln()).abs() < 1e-6);
        assert_eq!(params.idf(3, 0), 0.0);
    }
}
