//! The ANN index family behind the `Database` facade.
//!
//! # Module Organization
//!
//! - `flat`: exact brute-force k-NN and radius search
//! - `hnsw`: hierarchical navigable small world graph
//! - `ivf`: IVF-Flat and IVF-PQ (k-means partitioning, product codes)
//! - `lsh`: signed random hyperplane hashing
//! - `sparse`: inverted index over sparse term-weight vectors

pub mod flat;
pub mod hnsw;
pub mod ivf;
pub mod lsh;
pub mod sparse;

pub(crate) mod ordered_float;

#[cfg(test)]
mod sparse_lsh_tests;

pub use flat::FlatIndex;
pub use hnsw::HnswIndex;
pub use ivf::{IvfFlatIndex, IvfPqIndex, ProductQuantizer};
pub use lsh::LshIndex;
pub use sparse::SparseIndex;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::distance::DistanceKind;
use crate::error::{Error, Result};
use crate::store::{Permutation, RowId, SharedStore};

/// The available primary index kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Brute-force scan (exact).
    Flat,
    /// Hierarchical navigable small world graph.
    Hnsw,
    /// Inverted file with exact in-list distances.
    IvfFlat,
    /// Inverted file with product-quantized residuals.
    IvfPq,
    /// Locality-sensitive hashing.
    Lsh,
    /// Sparse term-weight inverted index.
    Sparse,
}

impl IndexKind {
    /// Stable numeric tag used by the on-disk format.
    #[must_use]
    pub const fn tag(&self) -> u32 {
        match self {
            Self::Flat => 0,
            Self::Hnsw => 1,
            Self::IvfFlat => 2,
            Self::IvfPq => 3,
            Self::Lsh => 4,
            Self::Sparse => 5,
        }
    }

    /// Inverse of [`Self::tag`].
    pub(crate) fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Flat),
            1 => Some(Self::Hnsw),
            2 => Some(Self::IvfFlat),
            3 => Some(Self::IvfPq),
            4 => Some(Self::Lsh),
            5 => Some(Self::Sparse),
            _ => None,
        }
    }

    /// Whether this kind requires [`PrimaryIndex::train`] before inserts.
    #[must_use]
    pub const fn needs_training(&self) -> bool {
        matches!(self, Self::IvfFlat | Self::IvfPq)
    }
}

/// Common interface implemented by every index kind.
///
/// Reads take the index's shared lock for the whole call; writes take the
/// exclusive lock. Vector data is referenced by store row id, never by
/// pointer, so [`Self::apply_permutation`] keeps an index valid across
/// store compactions.
pub trait VectorIndex: Send + Sync {
    /// Registers a row (already present in the store) with the index.
    fn insert(&self, row: RowId, vector: &[f32]) -> Result<()>;

    /// Drops per-index bookkeeping for a row. The store tombstone is what
    /// hides the row from searches; graph-based indexes may keep the node
    /// for traversal.
    fn remove(&self, row: RowId) -> bool;

    /// Top-k search under the index's configured metric. Results are
    /// ordered most-similar-first and never contain tombstoned rows.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(RowId, f32)>>;

    /// Number of rows the index tracks.
    fn len(&self) -> usize;

    /// Returns true if no rows are tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// This index's kind tag.
    fn kind(&self) -> IndexKind;

    /// The metric the index was built with.
    fn metric(&self) -> DistanceKind;

    /// Rewrites row references after a store compaction.
    fn apply_permutation(&self, perm: &Permutation) -> Result<()>;
}

/// Tagged dispatch over the index family, one variant per kind.
#[derive(Debug)]
pub enum PrimaryIndex {
    /// Brute-force index.
    Flat(FlatIndex),
    /// HNSW graph index.
    Hnsw(HnswIndex),
    /// IVF with exact list scoring.
    IvfFlat(IvfFlatIndex),
    /// IVF with PQ codes.
    IvfPq(IvfPqIndex),
    /// Random hyperplane LSH.
    Lsh(LshIndex),
    /// Sparse inverted index.
    Sparse(SparseIndex),
}

impl PrimaryIndex {
    /// Builds an empty index of the requested kind over a store.
    pub fn build(
        kind: IndexKind,
        store: SharedStore,
        metric: DistanceKind,
        config: &EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(match kind {
            IndexKind::Flat => Self::Flat(FlatIndex::new(store, metric, config.flat)),
            IndexKind::Hnsw => Self::Hnsw(HnswIndex::new(store, metric, config.hnsw)),
            IndexKind::IvfFlat => Self::IvfFlat(IvfFlatIndex::new(store, metric, config.ivf)),
            IndexKind::IvfPq => Self::IvfPq(IvfPqIndex::new(store, metric, config.ivf_pq)),
            IndexKind::Lsh => Self::Lsh(LshIndex::new(store, metric, config.lsh)),
            IndexKind::Sparse => Self::Sparse(SparseIndex::new(store)),
        })
    }

    fn as_dyn(&self) -> &dyn VectorIndex {
        match self {
            Self::Flat(i) => i,
            Self::Hnsw(i) => i,
            Self::IvfFlat(i) => i,
            Self::IvfPq(i) => i,
            Self::Lsh(i) => i,
            Self::Sparse(i) => i,
        }
    }

    /// Trains the index on the store's live rows when its kind requires
    /// training; a no-op otherwise.
    pub fn train(&self) -> Result<()> {
        match self {
            Self::IvfFlat(i) => i.train(),
            Self::IvfPq(i) => i.train(),
            _ => Ok(()),
        }
    }

    /// Trains the index on an explicit row-major sample; a no-op for
    /// kinds that need no training.
    pub fn train_with(&self, sample: &[f32], count: usize) -> Result<()> {
        match self {
            Self::IvfFlat(i) => i.train_with(sample, count),
            Self::IvfPq(i) => i.train_with(sample, count),
            _ => Ok(()),
        }
    }

    /// Whether the index is ready for inserts.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        match self {
            Self::IvfFlat(i) => i.is_trained(),
            Self::IvfPq(i) => i.is_trained(),
            _ => true,
        }
    }
}

impl VectorIndex for PrimaryIndex {
    fn insert(&self, row: RowId, vector: &[f32]) -> Result<()> {
        self.as_dyn().insert(row, vector)
    }

    fn remove(&self, row: RowId) -> bool {
        self.as_dyn().remove(row)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(RowId, f32)>> {
        self.as_dyn().search(query, k)
    }

    fn len(&self) -> usize {
        self.as_dyn().len()
    }

    fn kind(&self) -> IndexKind {
        self.as_dyn().kind()
    }

    fn metric(&self) -> DistanceKind {
        self.as_dyn().metric()
    }

    fn apply_permutation(&self, perm: &Permutation) -> Result<()> {
        self.as_dyn().apply_permutation(perm)
    }
}

/// Validates that a per-call metric is usable with the given index.
/// The flat index evaluates any metric per call; every other kind is
/// bound to its construction metric.
pub(crate) fn check_metric(index: &PrimaryIndex, requested: DistanceKind) -> Result<()> {
    match index {
        PrimaryIndex::Flat(_) => Ok(()),
        other => {
            if other.metric() == requested {
                Ok(())
            } else {
                Err(Error::InvalidArgument(format!(
                    "index was built with {:?}, queried with {:?}",
                    other.metric(),
                    requested
                )))
            }
        }
    }
}
