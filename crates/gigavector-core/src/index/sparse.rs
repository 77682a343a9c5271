//! Inverted index over sparse term-weight vectors.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::distance::DistanceKind;
use crate::error::{Error, Result};
use crate::index::{IndexKind, VectorIndex};
use crate::persistence::codec::{self, SectionReader};
use crate::sparse::SparseVector;
use crate::store::{Permutation, RowId, SharedStore};

/// Serialized sparse-index state; rides as a bincode payload because the
/// database format leaves this member's layout open.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SparseState {
    /// term index -> `(row, weight)` postings sorted by row.
    postings: FxHashMap<u32, Vec<(RowId, f32)>>,
    /// Per-row sparse vector, kept for removal and re-permutation.
    vectors: FxHashMap<RowId, SparseVector>,
}

/// Sparse dot-product retrieval: each non-zero query term walks its
/// posting list, accumulating partial products per row; the top-k rows by
/// score descending win. Cosine use requires caller-normalized inputs.
#[derive(Debug)]
pub struct SparseIndex {
    store: SharedStore,
    inner: RwLock<SparseState>,
}

impl SparseIndex {
    /// Creates an empty sparse index over the store.
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            inner: RwLock::new(SparseState::default()),
        }
    }

    /// Indexes a sparse vector under `row`.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` when the vector's nominal dimension differs
    /// from the store's.
    pub fn insert_sparse(&self, row: RowId, vector: &SparseVector) -> Result<()> {
        let store = self.store.read();
        Error::check_dimension(store.dimension(), vector.dim())?;
        drop(store);

        let mut state = self.inner.write();
        if state.vectors.contains_key(&row) {
            Self::remove_locked(&mut state, row);
        }
        for (term, weight) in vector.iter() {
            let list = state.postings.entry(term).or_default();
            let at = list.partition_point(|&(r, _)| r < row);
            list.insert(at, (row, weight));
        }
        state.vectors.insert(row, vector.clone());
        Ok(())
    }

    /// Top-k by accumulated dot product against a sparse query.
    pub fn search_sparse(&self, query: &SparseVector, k: usize) -> Result<Vec<(RowId, f32)>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be non-zero".into()));
        }
        let state = self.inner.read();
        let store = self.store.read();

        let mut scores: FxHashMap<RowId, f32> = FxHashMap::default();
        for (term, weight) in query.iter() {
            let Some(list) = state.postings.get(&term) else {
                continue;
            };
            for &(row, posting_weight) in list {
                *scores.entry(row).or_insert(0.0) += weight * posting_weight;
            }
        }

        let mut results: Vec<(RowId, f32)> = scores
            .into_iter()
            .filter(|&(row, _)| !store.is_tombstoned(row))
            .collect();
        // Score descending, row ascending on ties.
        results.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        results.truncate(k);
        Ok(results)
    }

    fn remove_locked(state: &mut SparseState, row: RowId) -> bool {
        let Some(vector) = state.vectors.remove(&row) else {
            return false;
        };
        for index in vector.indices() {
            if let Some(list) = state.postings.get_mut(index) {
                list.retain(|&(r, _)| r != row);
                if list.is_empty() {
                    state.postings.remove(index);
                }
            }
        }
        true
    }

    pub(crate) fn save_payload<W: Write>(&self, w: &mut W) -> Result<()> {
        let state = self.inner.read();
        let bytes = bincode::serialize(&*state)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        codec::write_u64(w, bytes.len() as u64)?;
        w.write_all(&bytes)?;
        Ok(())
    }

    pub(crate) fn load_payload(
        store: SharedStore,
        reader: &mut SectionReader<'_>,
    ) -> Result<Self> {
        let len = reader.read_u64()? as usize;
        let state: SparseState = bincode::deserialize(reader.take(len)?)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        for list in state.postings.values() {
            if !list.windows(2).all(|w| w[0].0 < w[1].0) {
                return Err(Error::Corrupted(
                    "sparse posting list is not sorted by row".into(),
                ));
            }
        }
        let index = Self::new(store);
        *index.inner.write() = state;
        Ok(index)
    }
}

impl VectorIndex for SparseIndex {
    /// Dense rows are sparsified (non-zero components) on insertion.
    fn insert(&self, row: RowId, vector: &[f32]) -> Result<()> {
        let store = self.store.read();
        Error::check_dimension(store.dimension(), vector.len())?;
        drop(store);
        self.insert_sparse(row, &SparseVector::from_dense(vector))
    }

    fn remove(&self, row: RowId) -> bool {
        Self::remove_locked(&mut self.inner.write(), row)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(RowId, f32)>> {
        let store = self.store.read();
        Error::check_dimension(store.dimension(), query.len())?;
        drop(store);
        self.search_sparse(&SparseVector::from_dense(query), k)
    }

    fn len(&self) -> usize {
        self.inner.read().vectors.len()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Sparse
    }

    /// Scores are raw dot products: higher is better.
    fn metric(&self) -> DistanceKind {
        DistanceKind::Dot
    }

    fn apply_permutation(&self, perm: &Permutation) -> Result<()> {
        let mut state = self.inner.write();
        let old_vectors: Vec<(RowId, SparseVector)> = state.vectors.drain().collect();
        state.postings.clear();
        drop(state);
        for (row, vector) in old_vectors {
            if let Some(new_row) = perm.remap(row) {
                self.insert_sparse(new_row, &vector)?;
            }
        }
        Ok(())
    }
}
