//! Brute-force (flat) index: exact k-NN and radius search over the store.

use std::collections::BinaryHeap;

use crate::config::FlatConfig;
use crate::distance::DistanceKind;
use crate::error::{Error, Result};
use crate::index::ordered_float::OrderedFloat;
use crate::index::{IndexKind, VectorIndex};
use crate::store::{RowId, SharedStore, VectorStore};

/// Exact k-NN over every live row of the store.
///
/// A bounded max-heap of size `k` is maintained during the scan, so memory
/// stays `O(k)` regardless of store size. The metric is chosen per call;
/// the index itself only carries a default.
#[derive(Debug)]
pub struct FlatIndex {
    store: SharedStore,
    metric: DistanceKind,
    config: FlatConfig,
}

impl FlatIndex {
    /// Creates a flat index over the given store.
    #[must_use]
    pub fn new(store: SharedStore, metric: DistanceKind, config: FlatConfig) -> Self {
        Self {
            store,
            metric,
            config,
        }
    }

    #[inline]
    fn compute(&self, metric: DistanceKind, a: &[f32], b: &[f32]) -> f32 {
        if self.config.use_simd {
            metric.distance_accel(a, b)
        } else {
            metric.distance(a, b)
        }
    }

    /// Exact top-k search with a per-call metric and optional metadata
    /// equality filter, ascending by similarity order.
    pub fn search_with(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceKind,
        filter: Option<(&str, &str)>,
    ) -> Result<Vec<(RowId, f32)>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be non-zero".into()));
        }
        let store = self.store.read();
        Error::check_dimension(store.dimension(), query.len())?;

        // Max-heap of the k best: the root is the worst kept candidate.
        let mut heap: BinaryHeap<(OrderedFloat, RowId)> = BinaryHeap::with_capacity(k + 1);
        for (row, data) in store.iter_live() {
            if !Self::matches_filter(&store, row, filter) {
                continue;
            }
            let key = metric.order_key(self.compute(metric, query, data));
            if heap.len() < k {
                heap.push((OrderedFloat(key), row));
            } else if let Some(&(worst, _)) = heap.peek() {
                if key < worst.0 {
                    heap.pop();
                    heap.push((OrderedFloat(key), row));
                }
            }
        }

        let mut results: Vec<(RowId, f32)> = heap
            .into_iter()
            .map(|(key, row)| {
                let raw = if metric.higher_is_better() {
                    -key.0
                } else {
                    key.0
                };
                (row, raw)
            })
            .collect();
        metric.sort_results(&mut results);
        Ok(results)
    }

    /// Linear radius scan: every live row within `radius`, stopping once
    /// `max_results` rows matched. Results are in ascending distance order.
    pub fn range_search_with(
        &self,
        query: &[f32],
        radius: f32,
        metric: DistanceKind,
        max_results: usize,
        filter: Option<(&str, &str)>,
    ) -> Result<Vec<(RowId, f32)>> {
        if radius < 0.0 {
            return Err(Error::InvalidArgument("radius must be non-negative".into()));
        }
        let store = self.store.read();
        Error::check_dimension(store.dimension(), query.len())?;

        let mut results = Vec::new();
        for (row, data) in store.iter_live() {
            if results.len() >= max_results {
                break;
            }
            if !Self::matches_filter(&store, row, filter) {
                continue;
            }
            let raw = self.compute(metric, query, data);
            if metric.order_key(raw) <= metric.order_key(radius) {
                results.push((row, raw));
            }
        }
        metric.sort_results(&mut results);
        Ok(results)
    }

    fn matches_filter(store: &VectorStore, row: RowId, filter: Option<(&str, &str)>) -> bool {
        let Some((key, value)) = filter else {
            return true;
        };
        store
            .metadata(row)
            .ok()
            .flatten()
            .and_then(|meta| meta.get(key))
            .is_some_and(|v| v == value)
    }
}

impl VectorIndex for FlatIndex {
    fn insert(&self, row: RowId, vector: &[f32]) -> Result<()> {
        // The store is the only structure; nothing to maintain.
        let store = self.store.read();
        Error::check_dimension(store.dimension(), vector.len())?;
        let _ = row;
        Ok(())
    }

    fn remove(&self, _row: RowId) -> bool {
        true
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(RowId, f32)>> {
        self.search_with(query, k, self.metric, None)
    }

    fn len(&self) -> usize {
        self.store.read().live_count()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Flat
    }

    fn metric(&self) -> DistanceKind {
        self.metric
    }

    fn apply_permutation(&self, _perm: &crate::store::Permutation) -> Result<()> {
        Ok(())
    }
}
