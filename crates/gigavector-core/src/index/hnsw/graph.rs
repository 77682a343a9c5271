//! HNSW graph structure.
//!
//! Implements the hierarchical navigable small world graph described by
//! Malkov & Yashunin. Nodes are store row ids; vector data always comes
//! from the shared store, so the graph holds topology only.

use rustc_hash::FxHashSet;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::config::HnswConfig;
use crate::distance::DistanceKind;
use crate::index::ordered_float::OrderedFloat;
use crate::store::{RowId, VectorStore};

/// Hard cap on layer count; the geometric level distribution makes higher
/// levels vanishingly unlikely.
pub(super) const MAX_LEVEL: usize = 15;

/// A single layer: adjacency lists indexed by row id.
#[derive(Debug, Default, Clone)]
pub(super) struct Layer {
    pub neighbors: Vec<Vec<RowId>>,
}

impl Layer {
    fn ensure_capacity(&mut self, row: usize) {
        if self.neighbors.len() <= row {
            self.neighbors.resize(row + 1, Vec::new());
        }
    }

    pub(super) fn get(&self, row: RowId) -> &[RowId] {
        self.neighbors
            .get(row as usize)
            .map_or(&[], Vec::as_slice)
    }

    fn set(&mut self, row: RowId, neighbors: Vec<RowId>) {
        self.ensure_capacity(row as usize);
        self.neighbors[row as usize] = neighbors;
    }

    /// Load-path setter that pre-sizes the adjacency table to the final
    /// row count.
    pub(super) fn set_for_load(&mut self, row: RowId, neighbors: Vec<RowId>, capacity: usize) {
        if self.neighbors.len() < capacity {
            self.neighbors.resize(capacity, Vec::new());
        }
        self.neighbors[row as usize] = neighbors;
    }
}

/// The mutable graph state guarded by the index's rwlock.
#[derive(Debug)]
pub(super) struct HnswGraph {
    pub metric: DistanceKind,
    pub config: HnswConfig,
    /// `layers[0]` is the dense base layer.
    pub layers: Vec<Layer>,
    /// Assigned level per inserted row.
    pub levels: Vec<u8>,
    /// Global entry point at the maximum observed level.
    pub entry: Option<RowId>,
    pub max_level: usize,
    /// xorshift64 state for level assignment.
    rng_state: u64,
    /// Level multiplier `mL = 1 / ln(M)`.
    level_mult: f64,
}

impl HnswGraph {
    pub fn new(metric: DistanceKind, config: HnswConfig) -> Self {
        Self {
            metric,
            config,
            layers: vec![Layer::default()],
            levels: Vec::new(),
            entry: None,
            max_level: 0,
            rng_state: 0x5DEE_CE66_D1A4_B5B5,
            level_mult: 1.0 / (config.m as f64).ln(),
        }
    }

    /// Number of inserted rows (tombstoned ones included).
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m * 2
        } else {
            self.config.m
        }
    }

    // All graph-internal comparisons run in order-key space, where
    // smaller always means closer (the dot product negates).
    #[inline]
    fn distance(&self, store: &VectorStore, a: &[f32], row: RowId) -> f32 {
        self.metric
            .order_key(self.metric.distance(a, store.row_unchecked(row)))
    }

    /// Draws a level from the geometric distribution
    /// `L = ⌊−ln(U)·mL⌋` using an xorshift64 PRNG.
    fn random_level(&mut self) -> usize {
        let mut state = self.rng_state;
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        self.rng_state = state;

        let uniform = (state as f64) / (u64::MAX as f64);
        // Guard against ln(0).
        let uniform = uniform.max(f64::MIN_POSITIVE);
        ((-uniform.ln() * self.level_mult).floor() as usize).min(MAX_LEVEL)
    }

    /// Inserts `row` (whose data is already in the store) into the graph.
    pub fn insert(&mut self, store: &VectorStore, row: RowId) {
        let vector = store.row_unchecked(row).to_vec();
        let node_level = self.random_level();

        while self.layers.len() <= node_level {
            self.layers.push(Layer::default());
        }
        for layer in &mut self.layers {
            layer.ensure_capacity(row as usize);
        }
        if self.levels.len() <= row as usize {
            self.levels.resize(row as usize + 1, 0);
        }
        self.levels[row as usize] = node_level as u8;

        let Some(entry) = self.entry else {
            self.entry = Some(row);
            self.max_level = node_level;
            return;
        };

        // Greedy descent with ef=1 through the layers above the node's.
        let mut current = entry;
        for layer in (node_level + 1..=self.max_level).rev() {
            current = self.greedy_closest(store, &vector, current, layer);
        }

        // Beam search and neighbor selection from node_level down to 0.
        for layer in (0..=node_level.min(self.max_level)).rev() {
            let candidates =
                self.search_layer(store, &vector, &[current], self.config.ef_construction, layer);
            let max_conn = self.max_connections(layer);
            let selected = self.select_neighbors(store, &candidates, max_conn);

            self.layers[layer].set(row, selected.clone());
            for &neighbor in &selected {
                self.connect(store, row, neighbor, layer, max_conn);
            }
            if let Some(&(best, _)) = candidates.first() {
                current = best;
            }
        }

        if node_level > self.max_level {
            self.max_level = node_level;
            self.entry = Some(row);
        }
    }

    /// Top-k search: greedy descent above the base layer, then a beam of
    /// width `ef` at layer 0. Tombstoned rows are traversed but filtered
    /// from the returned results.
    pub fn search(
        &self,
        store: &VectorStore,
        query: &[f32],
        k: usize,
        ef: usize,
    ) -> Vec<(RowId, f32)> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        let mut current = entry;
        for layer in (1..=self.max_level).rev() {
            current = self.greedy_closest(store, query, current, layer);
        }
        let candidates = self.search_layer(store, query, &[current], ef.max(k), 0);
        candidates
            .into_iter()
            .filter(|&(row, _)| !store.is_tombstoned(row))
            .take(k)
            .collect()
    }

    /// Greedy ef=1 walk within one layer.
    fn greedy_closest(
        &self,
        store: &VectorStore,
        query: &[f32],
        entry: RowId,
        layer: usize,
    ) -> RowId {
        let mut best = entry;
        let mut best_dist = self.distance(store, query, entry);
        loop {
            let mut improved = false;
            for &neighbor in self.layers[layer].get(best) {
                let dist = self.distance(store, query, neighbor);
                if dist < best_dist {
                    best = neighbor;
                    best_dist = dist;
                    improved = true;
                }
            }
            if !improved {
                return best;
            }
        }
    }

    /// Beam search of width `ef` within one layer, returning candidates
    /// in ascending distance order.
    fn search_layer(
        &self,
        store: &VectorStore,
        query: &[f32],
        entry_points: &[RowId],
        ef: usize,
        layer: usize,
    ) -> Vec<(RowId, f32)> {
        let mut visited: FxHashSet<RowId> = FxHashSet::default();
        let mut candidates: BinaryHeap<Reverse<(OrderedFloat, RowId)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(OrderedFloat, RowId)> = BinaryHeap::new();

        for &ep in entry_points {
            let dist = self.distance(store, query, ep);
            candidates.push(Reverse((OrderedFloat(dist), ep)));
            results.push((OrderedFloat(dist), ep));
            visited.insert(ep);
        }

        while let Some(Reverse((OrderedFloat(dist), node))) = candidates.pop() {
            let furthest = results.peek().map_or(f32::MAX, |r| r.0 .0);
            if dist > furthest && results.len() >= ef {
                break;
            }
            for &neighbor in self.layers[layer].get(node) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let dist = self.distance(store, query, neighbor);
                let furthest = results.peek().map_or(f32::MAX, |r| r.0 .0);
                if dist < furthest || results.len() < ef {
                    candidates.push(Reverse((OrderedFloat(dist), neighbor)));
                    results.push((OrderedFloat(dist), neighbor));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut sorted: Vec<(RowId, f32)> = results
            .into_iter()
            .map(|(d, row)| (row, d.0))
            .collect();
        sorted.sort_by(|a, b| a.1.total_cmp(&b.1));
        sorted
    }

    /// Heuristic neighbor selection: walk candidates in ascending distance
    /// and keep those not dominated by a closer already-selected neighbor
    /// (`d(c, q) <= d(c, s)` for every selected `s`). The quota is filled
    /// with the closest remaining candidates so sparse regions stay
    /// connected.
    fn select_neighbors(
        &self,
        store: &VectorStore,
        candidates: &[(RowId, f32)],
        max_neighbors: usize,
    ) -> Vec<RowId> {
        if candidates.len() <= max_neighbors {
            return candidates.iter().map(|&(row, _)| row).collect();
        }

        let mut selected: Vec<RowId> = Vec::with_capacity(max_neighbors);
        for &(candidate, dist_to_query) in candidates {
            if selected.len() >= max_neighbors {
                break;
            }
            let candidate_vec = store.row_unchecked(candidate);
            let dominated = selected
                .iter()
                .any(|&s| self.distance(store, candidate_vec, s) < dist_to_query);
            if !dominated {
                selected.push(candidate);
            }
        }
        if selected.len() < max_neighbors {
            for &(candidate, _) in candidates {
                if selected.len() >= max_neighbors {
                    break;
                }
                if !selected.contains(&candidate) {
                    selected.push(candidate);
                }
            }
        }
        selected
    }

    /// Adds the reverse edge `neighbor -> row`, pruning with the selection
    /// heuristic when the neighbor's list overflows its cap.
    fn connect(
        &mut self,
        store: &VectorStore,
        row: RowId,
        neighbor: RowId,
        layer: usize,
        max_conn: usize,
    ) {
        let mut neighbors = self.layers[layer].get(neighbor).to_vec();
        if neighbors.contains(&row) {
            return;
        }
        neighbors.push(row);
        if neighbors.len() > max_conn {
            let anchor = store.row_unchecked(neighbor).to_vec();
            let mut with_dist: Vec<(RowId, f32)> = neighbors
                .iter()
                .map(|&n| (n, self.distance(store, &anchor, n)))
                .collect();
            with_dist.sort_by(|a, b| a.1.total_cmp(&b.1));
            neighbors = self.select_neighbors(store, &with_dist, max_conn);
        }
        self.layers[layer].set(neighbor, neighbors);
    }

    /// Rewrites every row reference through the compaction permutation.
    /// Rows the permutation drops disappear from the graph; if the entry
    /// point was dropped, the surviving row with the highest level takes
    /// over.
    pub fn apply_permutation(&mut self, perm: &crate::store::Permutation) {
        let old_levels = std::mem::take(&mut self.levels);
        let mut new_levels = Vec::new();
        for (old_row, &level) in old_levels.iter().enumerate() {
            if let Some(new_row) = perm.remap(old_row as RowId) {
                let new_row = new_row as usize;
                new_levels.resize(new_levels.len().max(new_row + 1), 0);
                new_levels[new_row] = level;
            }
        }

        for layer in &mut self.layers {
            let old = std::mem::take(&mut layer.neighbors);
            let mut rebuilt = vec![Vec::new(); new_levels.len()];
            for (old_row, neighbors) in old.into_iter().enumerate() {
                let Some(new_row) = perm.remap(old_row as RowId) else {
                    continue;
                };
                rebuilt[new_row as usize] = neighbors
                    .into_iter()
                    .filter_map(|n| perm.remap(n))
                    .collect();
            }
            layer.neighbors = rebuilt;
        }
        self.levels = new_levels;

        self.entry = self.entry.and_then(|e| perm.remap(e));
        if self.entry.is_none() {
            // Entry point was compacted away: promote the highest survivor.
            let best = self
                .levels
                .iter()
                .enumerate()
                .max_by_key(|(_, &level)| level)
                .map(|(row, &level)| (row as RowId, level));
            if let Some((row, level)) = best {
                self.entry = Some(row);
                self.max_level = level as usize;
            } else {
                self.max_level = 0;
            }
        }
    }
}
