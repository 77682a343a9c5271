//! HNSW (Hierarchical Navigable Small World) index.
//!
//! # Module Organization
//!
//! - `graph`: the layered proximity graph and its construction/search
//! - this module: the locked index wrapper, trait impl and persistence

mod graph;

#[cfg(test)]
mod hnsw_tests;

use parking_lot::RwLock;
use std::io::Write;

use crate::config::HnswConfig;
use crate::distance::DistanceKind;
use crate::error::{Error, Result};
use crate::index::{IndexKind, VectorIndex};
use crate::persistence::codec::{self, SectionReader};
use crate::store::{Permutation, RowId, SharedStore};
use graph::{HnswGraph, MAX_LEVEL};

/// Sentinel written for the entry point of an empty graph.
const NO_ENTRY: u64 = u64::MAX;

/// Approximate nearest neighbor index over a layered proximity graph.
///
/// All reads take the shared lock, all writes the exclusive lock, for the
/// duration of the call. Vector data is borrowed from the shared store by
/// row id, so [`Self::apply_permutation`] must run after every store
/// compaction.
#[derive(Debug)]
pub struct HnswIndex {
    store: SharedStore,
    metric: DistanceKind,
    config: HnswConfig,
    inner: RwLock<HnswGraph>,
}

impl HnswIndex {
    /// Creates an empty index over the given store.
    #[must_use]
    pub fn new(store: SharedStore, metric: DistanceKind, config: HnswConfig) -> Self {
        Self {
            store,
            metric,
            config,
            inner: RwLock::new(HnswGraph::new(metric, config)),
        }
    }

    /// The configured construction/search parameters.
    #[must_use]
    pub fn config(&self) -> HnswConfig {
        self.config
    }

    /// Search with an explicit beam width instead of the configured
    /// `ef_search`.
    pub fn search_with_ef(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<(RowId, f32)>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be non-zero".into()));
        }
        let graph = self.inner.read();
        let store = self.store.read();
        Error::check_dimension(store.dimension(), query.len())?;
        // The graph compares in order-key space; report raw distances.
        Ok(graph
            .search(&store, query, k, ef)
            .into_iter()
            .map(|(row, key)| {
                let raw = if self.metric.higher_is_better() {
                    -key
                } else {
                    key
                };
                (row, raw)
            })
            .collect())
    }

    /// Serializes the graph payload: parameters, entry point, then per-row
    /// level and per-layer adjacency.
    pub(crate) fn save_payload<W: Write>(&self, w: &mut W) -> Result<()> {
        let graph = self.inner.read();
        codec::write_u32(w, self.config.m as u32)?;
        codec::write_u32(w, self.config.ef_construction as u32)?;
        codec::write_u32(w, self.config.ef_search as u32)?;
        codec::write_u64(w, graph.entry.unwrap_or(NO_ENTRY))?;
        codec::write_u64(w, graph.len() as u64)?;
        for row in 0..graph.len() as RowId {
            let level = graph.levels[row as usize];
            codec::write_u8(w, level)?;
            for layer in 0..=level as usize {
                let neighbors = graph.layers[layer].get(row);
                codec::write_u32(w, neighbors.len() as u32)?;
                for &n in neighbors {
                    codec::write_u64(w, n)?;
                }
            }
        }
        Ok(())
    }

    /// Restores a graph payload written by [`Self::save_payload`],
    /// validating the level cap and per-level degree caps.
    pub(crate) fn load_payload(
        store: SharedStore,
        metric: DistanceKind,
        reader: &mut SectionReader<'_>,
    ) -> Result<Self> {
        let m = reader.read_u32()? as usize;
        let ef_construction = reader.read_u32()? as usize;
        let ef_search = reader.read_u32()? as usize;
        if m < 2 {
            return Err(Error::Corrupted(format!("hnsw M of {m} is invalid")));
        }
        let config = HnswConfig {
            m,
            ef_construction,
            ef_search,
        };
        let entry = reader.read_u64()?;
        let count = reader.read_u64()? as usize;

        let index = Self::new(store, metric, config);
        {
            let mut graph = index.inner.write();
            let mut max_level = 0usize;
            for row in 0..count {
                let level = reader.read_u8()? as usize;
                if level > MAX_LEVEL {
                    return Err(Error::Corrupted(format!(
                        "row {row} has level {level}, exceeding the cap of {MAX_LEVEL}"
                    )));
                }
                max_level = max_level.max(level);
                graph.levels.push(level as u8);
                while graph.layers.len() <= level {
                    graph.layers.push(graph::Layer::default());
                }
                for layer in 0..=level {
                    let cap = if layer == 0 { m * 2 } else { m };
                    let degree = reader.read_u32()? as usize;
                    if degree > cap {
                        return Err(Error::Corrupted(format!(
                            "row {row} layer {layer} has degree {degree}, cap is {cap}"
                        )));
                    }
                    let mut neighbors = Vec::with_capacity(degree);
                    for _ in 0..degree {
                        let neighbor = reader.read_u64()?;
                        if neighbor as usize >= count {
                            return Err(Error::Corrupted(format!(
                                "row {row} references out-of-range neighbor {neighbor}"
                            )));
                        }
                        neighbors.push(neighbor);
                    }
                    graph.layers[layer].set_for_load(row as RowId, neighbors, count);
                }
            }
            graph.entry = (entry != NO_ENTRY).then_some(entry);
            if let Some(e) = graph.entry {
                if e as usize >= count {
                    return Err(Error::Corrupted(format!(
                        "entry point {e} is out of range"
                    )));
                }
            }
            graph.max_level = max_level;
        }
        Ok(index)
    }
}

impl VectorIndex for HnswIndex {
    fn insert(&self, row: RowId, vector: &[f32]) -> Result<()> {
        let mut graph = self.inner.write();
        let store = self.store.read();
        Error::check_dimension(store.dimension(), vector.len())?;
        graph.insert(&store, row);
        Ok(())
    }

    /// Soft delete: the row stays in the graph (it may still be traversed)
    /// but the store tombstone keeps it out of every result set.
    fn remove(&self, _row: RowId) -> bool {
        true
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(RowId, f32)>> {
        self.search_with_ef(query, k, self.config.ef_search)
    }

    fn len(&self) -> usize {
        self.inner.read().len()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Hnsw
    }

    fn metric(&self) -> DistanceKind {
        self.metric
    }

    fn apply_permutation(&self, perm: &Permutation) -> Result<()> {
        self.inner.write().apply_permutation(perm);
        Ok(())
    }
}
