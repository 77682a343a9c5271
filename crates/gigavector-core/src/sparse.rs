//! Sparse term-weight vectors.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A sparse vector: parallel `(indices, values)` arrays sorted ascending by
/// index, with a nominal dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    indices: Vec<u32>,
    values: Vec<f32>,
    dim: usize,
}

impl SparseVector {
    /// Builds a sparse vector from parallel arrays.
    ///
    /// Entries are sorted by index; duplicate indices are rejected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the arrays differ in length, an index
    /// is out of range, or an index repeats.
    pub fn new(indices: Vec<u32>, values: Vec<f32>, dim: usize) -> Result<Self> {
        if indices.len() != values.len() {
            return Err(Error::InvalidArgument(format!(
                "sparse vector has {} indices but {} values",
                indices.len(),
                values.len()
            )));
        }
        let mut entries: Vec<(u32, f32)> = indices.into_iter().zip(values).collect();
        entries.sort_unstable_by_key(|(i, _)| *i);
        for pair in entries.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(Error::InvalidArgument(format!(
                    "duplicate sparse index {}",
                    pair[0].0
                )));
            }
        }
        if let Some(&(last, _)) = entries.last() {
            if last as usize >= dim {
                return Err(Error::InvalidArgument(format!(
                    "sparse index {last} out of range for dimension {dim}"
                )));
            }
        }
        let (indices, values) = entries.into_iter().unzip();
        Ok(Self {
            indices,
            values,
            dim,
        })
    }

    /// Extracts the non-zero components of a dense vector.
    #[must_use]
    pub fn from_dense(dense: &[f32]) -> Self {
        let mut indices = Vec::new();
        let mut values = Vec::new();
        for (i, &v) in dense.iter().enumerate() {
            if v != 0.0 {
                indices.push(i as u32);
                values.push(v);
            }
        }
        Self {
            indices,
            values,
            dim: dense.len(),
        }
    }

    /// Ascending component indices.
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Component values, parallel to [`Self::indices`].
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Nominal dimension.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of stored (non-zero) components.
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Returns true if no component is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Iterates `(index, value)` pairs in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    /// Sparse dot product via a merge walk over both index arrays.
    #[must_use]
    pub fn dot(&self, other: &Self) -> f32 {
        let mut acc = 0.0f32;
        let (mut i, mut j) = (0, 0);
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    acc += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        acc
    }

    /// Euclidean norm over stored components.
    #[must_use]
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}
