//! Query operations on the `Database` facade.

use rustc_hash::FxHashMap;

use super::Database;
use crate::config::FlatConfig;
use crate::distance::DistanceKind;
use crate::error::{Error, Result};
use crate::index::{check_metric, FlatIndex, PrimaryIndex, VectorIndex};
use crate::pipeline::{Candidate, PhaseConfig, PhaseStats, RankingPipeline};
use crate::sparse::SparseVector;
use crate::store::RowId;

impl Database {
    /// Top-k nearest neighbor search through the primary index.
    ///
    /// Results are `(row, distance)` pairs ordered most-similar-first;
    /// the list is at most `min(k, live_count)` long and never contains
    /// tombstoned rows.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for `k = 0` or a metric the index was not built
    /// with (the flat index accepts any metric per call);
    /// `DimensionMismatch` for a wrong-sized query.
    pub fn search(&self, query: &[f32], k: usize, dist: DistanceKind) -> Result<Vec<(RowId, f32)>> {
        let index = self.index.read();
        check_metric(&index, dist)?;
        match &*index {
            PrimaryIndex::Flat(flat) => flat.search_with(query, k, dist, None),
            other => other.search(query, k),
        }
    }

    /// Top-k search restricted to rows whose metadata `key` equals
    /// `value`. The flat index evaluates the filter during its scan;
    /// approximate indexes oversample and post-filter.
    ///
    /// # Errors
    ///
    /// See [`Self::search`].
    pub fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        dist: DistanceKind,
        key: &str,
        value: &str,
    ) -> Result<Vec<(RowId, f32)>> {
        let index = self.index.read();
        check_metric(&index, dist)?;
        match &*index {
            PrimaryIndex::Flat(flat) => flat.search_with(query, k, dist, Some((key, value))),
            other => {
                // Oversample, then drop non-matching rows.
                let candidates_k = k.saturating_mul(4).max(k + 10);
                let hits = other.search(query, candidates_k)?;
                let store = self.store.read();
                Ok(hits
                    .into_iter()
                    .filter(|&(row, _)| {
                        store
                            .metadata(row)
                            .ok()
                            .flatten()
                            .and_then(|meta| meta.get(key))
                            .is_some_and(|v| v == value)
                    })
                    .take(k)
                    .collect())
            }
        }
    }

    /// Exact radius search over the store (a linear scan regardless of
    /// the primary index kind), capped at `max_results` rows.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a negative radius; `DimensionMismatch` for a
    /// wrong-sized query.
    pub fn range_search(
        &self,
        query: &[f32],
        radius: f32,
        dist: DistanceKind,
        max_results: usize,
    ) -> Result<Vec<(RowId, f32)>> {
        let scan = FlatIndex::new(self.shared_store(), dist, FlatConfig::default());
        scan.range_search_with(query, radius, dist, max_results, None)
    }

    /// BM25 full-text search over indexed documents.
    #[must_use]
    pub fn text_search(&self, query: &str, k: usize) -> Vec<(RowId, f32)> {
        self.fulltext.search(query, k)
    }

    /// Exact phrase search over indexed documents.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when phrase matching is disabled.
    pub fn phrase_search(&self, phrase: &str, k: usize) -> Result<Vec<(RowId, f32)>> {
        self.fulltext.phrase_search(phrase, k)
    }

    /// Hybrid search: linear combination of dense similarity and BM25.
    ///
    /// `vector_weight` weighs the dense side; `1 - vector_weight` weighs
    /// the text side. The two index reads are not atomic with respect to
    /// concurrent writes.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for `k = 0` or a weight outside `[0, 1]`.
    pub fn hybrid_search(
        &self,
        query: &[f32],
        text_query: &str,
        k: usize,
        vector_weight: f32,
    ) -> Result<Vec<(RowId, f32)>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&vector_weight) {
            return Err(Error::InvalidArgument(format!(
                "vector weight {vector_weight} is outside [0, 1]"
            )));
        }

        // Over-fetch both sides so the fusion has candidates to trade.
        let fetch_k = k.saturating_mul(2).max(k + 10);
        let dense = self.search(query, fetch_k, self.metric())?;
        let text = self.fulltext.search(text_query, fetch_k);

        let mut combined: FxHashMap<RowId, f32> = FxHashMap::default();
        for (row, distance) in dense {
            let sim = self.metric().similarity(distance);
            *combined.entry(row).or_insert(0.0) += vector_weight * sim;
        }
        for (row, score) in text {
            *combined.entry(row).or_insert(0.0) += (1.0 - vector_weight) * score;
        }

        let mut results: Vec<(RowId, f32)> = combined.into_iter().collect();
        results.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        results.truncate(k);
        Ok(results)
    }

    /// Sparse top-k search. Requires a sparse primary index.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the primary index is not sparse.
    pub fn search_sparse(&self, query: &SparseVector, k: usize) -> Result<Vec<(RowId, f32)>> {
        let index = self.index.read();
        match &*index {
            PrimaryIndex::Sparse(sparse) => sparse.search_sparse(query, k),
            other => Err(Error::InvalidArgument(format!(
                "sparse search requires a sparse primary index, found {:?}",
                other.kind()
            ))),
        }
    }

    /// Builds and executes a phased ranking pipeline, returning the
    /// surviving candidates and the per-phase statistics.
    ///
    /// # Errors
    ///
    /// `InvalidArgument`/`Expr` for an invalid phase list; any error of
    /// the underlying ANN call.
    pub fn pipeline_search(
        &self,
        query: &[f32],
        phases: Vec<PhaseConfig>,
    ) -> Result<(Vec<Candidate>, Vec<PhaseStats>)> {
        let pipeline = RankingPipeline::new(phases)?;
        let candidates = pipeline.execute(&self.index, &self.store, query)?;
        Ok((candidates, pipeline.last_stats()))
    }
}
