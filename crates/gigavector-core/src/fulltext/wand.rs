//! BlockMax-WAND top-k retrieval over posting-list cursors.
//!
//! One cursor per query term walks its posting list in doc order. The loop
//! keeps a min-heap of the k best scores seen; a pivot term is selected by
//! accumulating per-cursor score upper bounds, documents before the pivot
//! are skipped wholesale, and whole blocks are skipped when their
//! precomputed maxima cannot reach the heap threshold. Bounds are true
//! maxima, so the returned top-k is identical to naive scoring.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use super::postings::{Bm25Params, Posting};

/// A `(doc, score)` pair ordered worst-first: lower score first, larger
/// doc first among equal scores. Ties therefore resolve toward keeping
/// the smaller doc id.
#[derive(Debug, Clone, Copy)]
struct ScoredDoc {
    score: f32,
    doc: u64,
}

impl PartialEq for ScoredDoc {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredDoc {}

impl PartialOrd for ScoredDoc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredDoc {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then(other.doc.cmp(&self.doc))
    }
}

/// Bounded min-heap of the k best `(doc, score)` results.
///
/// Shared by the naive scorer and BlockMax-WAND so both apply the same
/// deterministic tie-break (score descending, then doc ascending).
pub(super) struct TopK {
    k: usize,
    heap: BinaryHeap<Reverse<ScoredDoc>>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    /// Current k-th best score, or `-inf` while the heap is not full.
    pub fn threshold(&self) -> f32 {
        if self.heap.len() == self.k {
            self.heap.peek().map_or(f32::NEG_INFINITY, |r| r.0.score)
        } else {
            f32::NEG_INFINITY
        }
    }

    pub fn push(&mut self, doc: u64, score: f32) {
        if self.k == 0 {
            return;
        }
        let entry = ScoredDoc { score, doc };
        if self.heap.len() < self.k {
            self.heap.push(Reverse(entry));
        } else if self
            .heap
            .peek()
            .is_some_and(|worst| entry > worst.0)
        {
            self.heap.pop();
            self.heap.push(Reverse(entry));
        }
    }

    /// Drains into `(doc, score)` pairs, best first.
    pub fn into_sorted(self) -> Vec<(u64, f32)> {
        let mut results: Vec<ScoredDoc> = self.heap.into_iter().map(|r| r.0).collect();
        results.sort_by(|a, b| b.cmp(a));
        results.into_iter().map(|s| (s.doc, s.score)).collect()
    }
}

/// A posting-list cursor with block-max metadata.
pub(super) struct Cursor<'a> {
    postings: &'a [Posting],
    /// Per-block BM25 upper bounds under the current corpus statistics.
    /// Shared with the index's lazily-recomputed cache.
    block_maxes: Arc<Vec<f32>>,
    /// `suffix_maxes[b]` = max of `block_maxes[b..]`; bounds every
    /// remaining document once the cursor has entered block `b`.
    suffix_maxes: Vec<f32>,
    block_size: usize,
    idf: f32,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(
        postings: &'a [Posting],
        block_maxes: Arc<Vec<f32>>,
        block_size: usize,
        idf: f32,
    ) -> Self {
        let mut suffix_maxes: Vec<f32> = block_maxes.as_ref().clone();
        for i in (0..suffix_maxes.len().saturating_sub(1)).rev() {
            suffix_maxes[i] = suffix_maxes[i].max(suffix_maxes[i + 1]);
        }
        Self {
            postings,
            block_maxes,
            suffix_maxes,
            block_size,
            idf,
            pos: 0,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.pos >= self.postings.len()
    }

    pub fn current_doc(&self) -> u64 {
        self.postings[self.pos].doc_id
    }

    fn current_posting(&self) -> &Posting {
        &self.postings[self.pos]
    }

    /// Upper bound on the contribution of any remaining document.
    fn remaining_bound(&self) -> f32 {
        self.suffix_maxes
            .get(self.pos / self.block_size)
            .copied()
            .unwrap_or(0.0)
    }

    /// Index of the first remaining posting with `doc_id >= doc`.
    fn seek_index(&self, doc: u64) -> usize {
        let rest = &self.postings[self.pos..];
        self.pos + rest.partition_point(|p| p.doc_id < doc)
    }

    /// Block max of the block holding the first posting `>= doc`, or 0.0
    /// if the list is exhausted before `doc`.
    fn block_max_for(&self, doc: u64) -> f32 {
        let idx = self.seek_index(doc);
        self.block_maxes
            .get(idx / self.block_size)
            .copied()
            .unwrap_or(0.0)
    }

    /// Last doc id of the block holding the first posting `>= doc`, or
    /// `u64::MAX` when exhausted.
    fn block_last_doc_for(&self, doc: u64) -> u64 {
        let idx = self.seek_index(doc);
        if idx >= self.postings.len() {
            return u64::MAX;
        }
        let block_end = ((idx / self.block_size) + 1) * self.block_size;
        self.postings[block_end.min(self.postings.len()) - 1].doc_id
    }

    pub fn advance(&mut self) {
        self.pos += 1;
    }

    /// Moves to the first posting with `doc_id >= doc`.
    pub fn advance_to(&mut self, doc: u64) {
        self.pos = self.seek_index(doc);
    }

    /// BM25 contribution of the current posting.
    fn score(&self, params: Bm25Params, avgdl: f32, doc_len: u32) -> f32 {
        let p = self.current_posting();
        params.term_score(self.idf, p.tf, doc_len, avgdl)
    }
}

/// Runs BlockMax-WAND over the given cursors.
///
/// `doc_len` resolves a doc id to its token length under the current
/// corpus. Returns the top-k `(doc, score)` pairs, best first.
pub(super) fn blockmax_wand(
    mut cursors: Vec<Cursor<'_>>,
    k: usize,
    params: Bm25Params,
    avgdl: f32,
    doc_len: impl Fn(u64) -> u32,
) -> Vec<(u64, f32)> {
    let mut top = TopK::new(k);
    if k == 0 {
        return Vec::new();
    }

    loop {
        cursors.retain(|c| !c.exhausted());
        if cursors.is_empty() {
            break;
        }
        cursors.sort_by_key(Cursor::current_doc);
        let threshold = top.threshold();

        // Pivot: smallest prefix whose cumulative bound can still reach
        // the threshold. No pivot means nothing remaining can win.
        let mut acc = 0.0f32;
        let mut pivot = None;
        for (i, cursor) in cursors.iter().enumerate() {
            acc += cursor.remaining_bound();
            if acc >= threshold {
                pivot = Some(i);
                break;
            }
        }
        let Some(mut pivot) = pivot else {
            break;
        };
        let pivot_doc = cursors[pivot].current_doc();
        // Cursors already sitting on the pivot doc join the prefix.
        while pivot + 1 < cursors.len() && cursors[pivot + 1].current_doc() == pivot_doc {
            pivot += 1;
        }

        // Block-level check: the pivot doc (and everything up to the
        // nearest block boundary) is bounded by the current block maxima.
        let block_bound: f32 = cursors[..=pivot]
            .iter()
            .map(|c| c.block_max_for(pivot_doc))
            .sum();
        if block_bound < threshold {
            // Block skip: jump past the shortest current block, but not
            // past the next cursor's doc (terms beyond the pivot prefix
            // may start contributing there).
            let mut target = cursors[..=pivot]
                .iter()
                .map(|c| c.block_last_doc_for(pivot_doc))
                .min()
                .unwrap_or(u64::MAX)
                .saturating_add(1);
            if let Some(next) = cursors.get(pivot + 1) {
                target = target.min(next.current_doc());
            }
            for cursor in &mut cursors[..=pivot] {
                cursor.advance_to(target);
            }
            continue;
        }

        if cursors[0].current_doc() == pivot_doc {
            // Fully aligned: score the pivot doc across matching cursors.
            let len = doc_len(pivot_doc);
            let score: f32 = cursors[..=pivot]
                .iter()
                .map(|c| c.score(params, avgdl, len))
                .sum();
            top.push(pivot_doc, score);
            for cursor in &mut cursors[..=pivot] {
                cursor.advance();
            }
        } else {
            // Align earlier cursors onto the pivot doc.
            for cursor in &mut cursors[..pivot] {
                if cursor.current_doc() < pivot_doc {
                    cursor.advance_to(pivot_doc);
                }
            }
        }
    }

    top.into_sorted()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posting(doc_id: u64, tf: u32) -> Posting {
        Posting {
            doc_id,
            tf,
            positions: Vec::new(),
        }
    }

    fn cursor(postings: &[Posting], block_size: usize, idf: f32) -> Cursor<'_> {
        let params = Bm25Params::default();
        let block_maxes: Vec<f32> = postings
            .chunks(block_size)
            .map(|block| {
                block
                    .iter()
                    .map(|p| params.term_score(idf, p.tf, 10, 10.0))
                    .fold(0.0f32, f32::max)
            })
            .collect();
        Cursor::new(postings, Arc::new(block_maxes), block_size, idf)
    }

    #[test]
    fn test_topk_orders_best_first_with_doc_tiebreak() {
        let mut top = TopK::new(2);
        top.push(3, 1.0);
        top.push(1, 2.0);
        top.push(2, 1.0);
        let results = top.into_sorted();
        // Equal scores keep the smaller doc id.
        assert_eq!(results, vec![(1, 2.0), (2, 1.0)]);
    }

    #[test]
    fn test_topk_threshold() {
        let mut top = TopK::new(2);
        assert_eq!(top.threshold(), f32::NEG_INFINITY);
        top.push(1, 5.0);
        top.push(2, 3.0);
        assert_eq!(top.threshold(), 3.0);
        top.push(3, 4.0);
        assert_eq!(top.threshold(), 4.0);
    }

    #[test]
    fn test_cursor_advance_to() {
        let postings: Vec<Posting> = [1u64, 4, 9, 12, 30].iter().map(|&d| posting(d, 1)).collect();
        let mut c = cursor(&postings, 2, 1.0);
        c.advance_to(5);
        assert_eq!(c.current_doc(), 9);
        c.advance_to(31);
        assert!(c.exhausted());
    }

    #[test]
    fn test_single_term_wand_matches_postings() {
        let postings: Vec<Posting> = (0..20u64).map(|d| posting(d, (d % 4 + 1) as u32)).collect();
        let params = Bm25Params::default();
        let idf = params.idf(100, postings.len());
        let results = blockmax_wand(
            vec![cursor(&postings, 4, idf)],
            5,
            params,
            10.0,
            |_| 10,
        );
        assert_eq!(results.len(), 5);
        // Highest tf (4 occurrences, docs 3, 7, 11, ...) rank first.
        assert_eq!(results[0].1, params.term_score(idf, 4, 10, 10.0));
        for pair in results.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }
}
