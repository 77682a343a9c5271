//! Row lifecycle operations on the `Database` facade.

use super::Database;
use crate::error::{Error, Result};
use crate::index::{IndexKind, PrimaryIndex, VectorIndex};
use crate::sparse::SparseVector;
use crate::store::{Metadata, RowId};

impl Database {
    /// Adds a vector, returning its row id.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch`, or `Untrained` for IVF kinds before
    /// [`Self::train`].
    pub fn add(&self, data: &[f32]) -> Result<RowId> {
        self.add_with_metadata(data, None)
    }

    /// Adds a vector with optional metadata, returning its row id.
    ///
    /// # Errors
    ///
    /// See [`Self::add`].
    pub fn add_with_metadata(&self, data: &[f32], metadata: Option<Metadata>) -> Result<RowId> {
        let index = self.index.read();
        if !index.is_trained() {
            return Err(Error::Untrained("primary index"));
        }
        let row = {
            let mut store = self.store.write();
            match metadata {
                Some(meta) => store.add_with_metadata(data, meta)?,
                None => store.add(data)?,
            }
        };
        index.insert(row, data)?;
        Ok(row)
    }

    /// Adds a vector with parallel metadata key/value arrays.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the arrays differ in length; otherwise see
    /// [`Self::add`].
    pub fn add_with_rich_metadata(
        &self,
        data: &[f32],
        keys: &[&str],
        values: &[&str],
    ) -> Result<RowId> {
        if keys.len() != values.len() {
            return Err(Error::InvalidArgument(format!(
                "{} metadata keys but {} values",
                keys.len(),
                values.len()
            )));
        }
        let metadata: Metadata = keys
            .iter()
            .zip(values)
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        self.add_with_metadata(data, Some(metadata))
    }

    /// Adds a sparse vector. The dense projection is stored in the vector
    /// store; a sparse primary index receives the sparse form directly.
    ///
    /// # Errors
    ///
    /// See [`Self::add`].
    pub fn add_sparse(&self, vector: &SparseVector) -> Result<RowId> {
        let mut dense = vec![0.0f32; vector.dim()];
        for (i, v) in vector.iter() {
            dense[i as usize] = v;
        }
        let index = self.index.read();
        if !index.is_trained() {
            return Err(Error::Untrained("primary index"));
        }
        let row = self.store.write().add(&dense)?;
        match &*index {
            PrimaryIndex::Sparse(sparse) => sparse.insert_sparse(row, vector)?,
            other => other.insert(row, &dense)?,
        }
        Ok(row)
    }

    /// Returns a copy of a live row's data.
    ///
    /// # Errors
    ///
    /// `RowNotFound` for out-of-range or tombstoned rows.
    pub fn get(&self, row: RowId) -> Result<Vec<f32>> {
        Ok(self.store.read().row(row)?.to_vec())
    }

    /// Returns a copy of a live row's metadata, if any.
    ///
    /// # Errors
    ///
    /// `RowNotFound` for out-of-range or tombstoned rows.
    pub fn get_metadata(&self, row: RowId) -> Result<Option<Metadata>> {
        Ok(self.store.read().metadata(row)?.cloned())
    }

    /// Sets one metadata key on a live row.
    ///
    /// # Errors
    ///
    /// `RowNotFound` for out-of-range or tombstoned rows.
    pub fn set_metadata(&self, row: RowId, key: &str, value: &str) -> Result<()> {
        self.store.write().set_metadata(row, key, value)
    }

    /// Overwrites a row's vector data in place.
    ///
    /// IVF list membership is fixed at insertion, so partition-based
    /// indexes keep their assignment; bucket- and posting-based indexes
    /// (LSH, sparse) are re-registered under the new data.
    ///
    /// # Errors
    ///
    /// `RowNotFound` or `DimensionMismatch`.
    pub fn update(&self, row: RowId, data: &[f32]) -> Result<()> {
        self.store.write().update_data(row, data)?;
        let index = self.index.read();
        if matches!(index.kind(), IndexKind::Lsh | IndexKind::Sparse) {
            index.remove(row);
            index.insert(row, data)?;
        }
        Ok(())
    }

    /// Tombstones a row. O(1); the row keeps its index until
    /// [`Self::compact`].
    ///
    /// # Errors
    ///
    /// `RowNotFound` for out-of-range or already-deleted rows.
    pub fn delete(&self, row: RowId) -> Result<()> {
        self.store.write().delete(row)?;
        self.index.read().remove(row);
        self.fulltext.remove_document(row);
        Ok(())
    }

    /// Whether a row is tombstoned.
    ///
    /// # Errors
    ///
    /// `RowNotFound` if `row` is out of range.
    pub fn is_deleted(&self, row: RowId) -> Result<bool> {
        self.store.read().is_deleted(row)
    }

    /// Physically removes tombstoned rows, renumbering the survivors and
    /// rewriting every index reference through the permutation.
    ///
    /// # Errors
    ///
    /// Propagates index permutation failures.
    pub fn compact(&self) -> Result<()> {
        let index = self.index.read();
        let perm = self.store.write().compact();
        index.apply_permutation(&perm)?;
        self.fulltext.apply_permutation(&perm);
        Ok(())
    }

    /// Trains the primary index on the current live rows. A no-op for
    /// kinds that need no training.
    ///
    /// # Errors
    ///
    /// `TrainingFailed` when clustering cannot produce centroids.
    pub fn train(&self) -> Result<()> {
        self.index.read().train()
    }

    /// Trains the primary index on an explicit sample, for IVF kinds that
    /// must be trained before the first insertion.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` on a wrong-sized sample row; `TrainingFailed`
    /// when clustering cannot produce centroids.
    pub fn train_with(&self, samples: &[Vec<f32>]) -> Result<()> {
        let dimension = self.dimension();
        let mut flat = Vec::with_capacity(samples.len() * dimension);
        for sample in samples {
            Error::check_dimension(dimension, sample.len())?;
            flat.extend_from_slice(sample);
        }
        self.index.read().train_with(&flat, samples.len())
    }

    /// Indexes a document for full-text search, keyed by row id.
    pub fn index_document(&self, row: RowId, text: &str) {
        self.fulltext.index_document(row, text);
    }

    /// Removes a document from the full-text index.
    pub fn remove_document(&self, row: RowId) -> bool {
        self.fulltext.remove_document(row)
    }
}
