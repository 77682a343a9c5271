//! Structure-of-arrays vector storage with metadata and tombstones.
//!
//! The store keeps all vectors in one contiguous row-major `Vec<f32>` of
//! shape `count × dimension`, with a parallel metadata slot per row and a
//! tombstone set for logical deletion. Rows keep their index across
//! deletions; physical removal only happens through [`VectorStore::compact`],
//! which returns the old-to-new row permutation so index structures can
//! rewrite their references.

use indexmap::IndexMap;
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Row identifier handed out by [`VectorStore::add`].
pub type RowId = u64;

/// Insertion-ordered string metadata attached to a row.
pub type Metadata = IndexMap<String, String>;

/// Shared handle to a store, borrowed by every index.
pub type SharedStore = Arc<RwLock<VectorStore>>;

/// Old-to-new row mapping produced by [`VectorStore::compact`].
///
/// `remap(old)` returns `None` for rows that were tombstoned and physically
/// removed by the compaction.
#[derive(Debug, Clone)]
pub struct Permutation {
    map: Vec<Option<RowId>>,
}

impl Permutation {
    /// Maps an old row id to its post-compaction id.
    #[must_use]
    pub fn remap(&self, old: RowId) -> Option<RowId> {
        self.map.get(old as usize).copied().flatten()
    }

    /// Number of pre-compaction rows covered by this permutation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the permutation covers no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Row-major float storage with per-row metadata and tombstones.
#[derive(Debug)]
pub struct VectorStore {
    dimension: usize,
    data: Vec<f32>,
    metadata: Vec<Option<Metadata>>,
    tombstones: RoaringBitmap,
}

impl VectorStore {
    /// Creates an empty store for vectors of the given dimension.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `dimension` is zero.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidArgument("dimension must be non-zero".into()));
        }
        Ok(Self {
            dimension,
            data: Vec::new(),
            metadata: Vec::new(),
            tombstones: RoaringBitmap::new(),
        })
    }

    /// Rebuilds a store from persisted parts. Used by the load path.
    pub(crate) fn from_parts(
        dimension: usize,
        data: Vec<f32>,
        metadata: Vec<Option<Metadata>>,
        tombstones: RoaringBitmap,
    ) -> Result<Self> {
        if dimension == 0 || data.len() % dimension != 0 {
            return Err(Error::Corrupted(format!(
                "vector payload of {} floats is not a multiple of dimension {}",
                data.len(),
                dimension
            )));
        }
        let count = data.len() / dimension;
        if metadata.len() != count {
            return Err(Error::Corrupted(format!(
                "metadata section covers {} rows, store has {count}",
                metadata.len()
            )));
        }
        Ok(Self {
            dimension,
            data,
            metadata,
            tombstones,
        })
    }

    /// The fixed vector dimension of this store.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Total number of rows, tombstoned ones included.
    #[must_use]
    pub fn count(&self) -> usize {
        self.metadata.len()
    }

    /// Number of non-tombstoned rows.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.count() - self.tombstones.len() as usize
    }

    /// Appends a row and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if `data` has the wrong length.
    pub fn add(&mut self, data: &[f32]) -> Result<RowId> {
        Error::check_dimension(self.dimension, data.len())?;
        self.reserve_row();
        let row = self.count() as RowId;
        self.data.extend_from_slice(data);
        self.metadata.push(None);
        Ok(row)
    }

    /// Appends a row with metadata and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if `data` has the wrong length.
    pub fn add_with_metadata(&mut self, data: &[f32], metadata: Metadata) -> Result<RowId> {
        let row = self.add(data)?;
        self.metadata[row as usize] = Some(metadata);
        Ok(row)
    }

    // Geometric growth: double the row capacity whenever the slab is full.
    fn reserve_row(&mut self) {
        if self.data.len() + self.dimension > self.data.capacity() {
            let rows = (self.count().max(1)) * 2;
            let want = rows * self.dimension;
            self.data.reserve(want.saturating_sub(self.data.len()));
        }
    }

    /// Borrows the data of a live row.
    ///
    /// # Errors
    ///
    /// Returns `RowNotFound` for out-of-range or tombstoned rows.
    pub fn row(&self, row: RowId) -> Result<&[f32]> {
        if self.is_deleted(row)? {
            return Err(Error::RowNotFound(row));
        }
        Ok(self.row_unchecked(row))
    }

    /// Borrows row data without the tombstone check. Index traversal may
    /// pass through tombstoned rows (they are filtered from results only).
    #[must_use]
    pub(crate) fn row_unchecked(&self, row: RowId) -> &[f32] {
        let start = row as usize * self.dimension;
        &self.data[start..start + self.dimension]
    }

    /// Returns the metadata of a live row, if any was set.
    ///
    /// # Errors
    ///
    /// Returns `RowNotFound` for out-of-range or tombstoned rows.
    pub fn metadata(&self, row: RowId) -> Result<Option<&Metadata>> {
        if self.is_deleted(row)? {
            return Err(Error::RowNotFound(row));
        }
        Ok(self.metadata[row as usize].as_ref())
    }

    /// Overwrites the data of a live row in place.
    ///
    /// # Errors
    ///
    /// Returns `RowNotFound` or `DimensionMismatch`.
    pub fn update_data(&mut self, row: RowId, data: &[f32]) -> Result<()> {
        Error::check_dimension(self.dimension, data.len())?;
        if self.is_deleted(row)? {
            return Err(Error::RowNotFound(row));
        }
        let start = row as usize * self.dimension;
        self.data[start..start + self.dimension].copy_from_slice(data);
        Ok(())
    }

    /// Sets one metadata key on a live row, preserving insertion order of
    /// existing keys.
    ///
    /// # Errors
    ///
    /// Returns `RowNotFound` for out-of-range or tombstoned rows.
    pub fn set_metadata(&mut self, row: RowId, key: &str, value: &str) -> Result<()> {
        if self.is_deleted(row)? {
            return Err(Error::RowNotFound(row));
        }
        self.metadata[row as usize]
            .get_or_insert_with(Metadata::new)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Tombstones a row in O(1). The row keeps its index until
    /// [`Self::compact`] runs.
    ///
    /// # Errors
    ///
    /// Returns `RowNotFound` for out-of-range or already-tombstoned rows.
    pub fn delete(&mut self, row: RowId) -> Result<()> {
        if self.is_deleted(row)? {
            return Err(Error::RowNotFound(row));
        }
        self.tombstones.insert(tombstone_key(row));
        Ok(())
    }

    /// Whether a row has been tombstoned.
    ///
    /// # Errors
    ///
    /// Returns `RowNotFound` if `row` is out of range.
    pub fn is_deleted(&self, row: RowId) -> Result<bool> {
        if row as usize >= self.count() {
            return Err(Error::RowNotFound(row));
        }
        Ok(self.tombstones.contains(tombstone_key(row)))
    }

    /// Infallible tombstone check for rows known to be in range.
    #[must_use]
    pub(crate) fn is_tombstoned(&self, row: RowId) -> bool {
        self.tombstones.contains(tombstone_key(row))
    }

    /// Iterates `(row, data)` over non-tombstoned rows in ascending order.
    pub fn iter_live(&self) -> impl Iterator<Item = (RowId, &[f32])> {
        (0..self.count() as RowId)
            .filter(|&r| !self.is_tombstoned(r))
            .map(|r| (r, self.row_unchecked(r)))
    }

    /// Physically removes tombstoned rows, renumbering the survivors in
    /// ascending order. Returns the old-to-new permutation that indexes
    /// apply to their own structures.
    pub fn compact(&mut self) -> Permutation {
        let old_count = self.count();
        let mut map = vec![None; old_count];
        let mut data = Vec::with_capacity(self.live_count() * self.dimension);
        let mut metadata = Vec::with_capacity(self.live_count());

        let mut next: RowId = 0;
        for old in 0..old_count as RowId {
            if self.is_tombstoned(old) {
                continue;
            }
            data.extend_from_slice(self.row_unchecked(old));
            metadata.push(self.metadata[old as usize].take());
            map[old as usize] = Some(next);
            next += 1;
        }

        let removed = old_count - next as usize;
        self.data = data;
        self.metadata = metadata;
        self.tombstones = RoaringBitmap::new();
        tracing::debug!(removed, remaining = next, "store compacted");

        Permutation { map }
    }

    /// Serialized tombstone bitmap: `⌈count/8⌉` bytes, row `r` at bit
    /// `r % 8` of byte `r / 8`.
    #[must_use]
    pub(crate) fn tombstone_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.count().div_ceil(8)];
        for key in &self.tombstones {
            bytes[key as usize / 8] |= 1 << (key % 8);
        }
        bytes
    }

    /// Inverse of [`Self::tombstone_bytes`].
    pub(crate) fn tombstones_from_bytes(bytes: &[u8], count: usize) -> RoaringBitmap {
        let mut set = RoaringBitmap::new();
        for row in 0..count {
            if bytes
                .get(row / 8)
                .is_some_and(|b| b & (1 << (row % 8)) != 0)
            {
                set.insert(row as u32);
            }
        }
        set
    }

    /// Raw float slab, used by persistence.
    #[must_use]
    pub(crate) fn raw_data(&self) -> &[f32] {
        &self.data
    }

    /// Per-row metadata slots, used by persistence.
    #[must_use]
    pub(crate) fn raw_metadata(&self) -> &[Option<Metadata>] {
        &self.metadata
    }
}

// Roaring bitmaps index by u32; the store addresses rows well below that
// bound (tens of millions).
fn tombstone_key(row: RowId) -> u32 {
    u32::try_from(row).expect("row id exceeds tombstone key space")
}
