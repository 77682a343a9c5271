//! LSH index: signed random hyperplane signatures over multiple tables.

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::config::LshConfig;
use crate::distance::DistanceKind;
use crate::error::{Error, Result};
use crate::index::{IndexKind, VectorIndex};
use crate::persistence::codec::{self, SectionReader};
use crate::simd;
use crate::store::{Permutation, RowId, SharedStore};

/// Serialized LSH state. The on-disk layout of this member is not pinned
/// by the database format, so it rides as a bincode payload.
#[derive(Debug, Serialize, Deserialize)]
struct LshState {
    /// `tables × hash_bits` random hyperplanes of store dimension.
    hyperplanes: Vec<Vec<f32>>,
    /// Per table: signature -> bucket of rows.
    tables: Vec<FxHashMap<u64, Vec<RowId>>>,
}

impl LshState {
    fn new(dimension: usize, config: LshConfig) -> Self {
        // Deterministic hyperplanes from an xorshift64 stream, components
        // uniform in [-1, 1].
        let mut state = 0xA076_1D64_78BD_642Fu64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 40) as f32 / (1u64 << 23) as f32 - 1.0
        };
        let hyperplanes = (0..config.tables * config.hash_bits)
            .map(|_| (0..dimension).map(|_| next()).collect())
            .collect();
        Self {
            hyperplanes,
            tables: vec![FxHashMap::default(); config.tables],
        }
    }

    fn signature(&self, config: LshConfig, table: usize, vector: &[f32]) -> u64 {
        let mut signature = 0u64;
        for bit in 0..config.hash_bits {
            let plane = &self.hyperplanes[table * config.hash_bits + bit];
            let side = u64::from(simd::dot(vector, plane) >= 0.0);
            signature = (signature << 1) | side;
        }
        signature
    }
}

/// Approximate index probing one hash bucket per table, with exact
/// verification against the store.
#[derive(Debug)]
pub struct LshIndex {
    store: SharedStore,
    metric: DistanceKind,
    config: LshConfig,
    inner: RwLock<LshState>,
    count: RwLock<usize>,
}

impl LshIndex {
    /// Creates an empty index with deterministic hyperplanes.
    #[must_use]
    pub fn new(store: SharedStore, metric: DistanceKind, config: LshConfig) -> Self {
        let dimension = store.read().dimension();
        Self {
            store,
            metric,
            config,
            inner: RwLock::new(LshState::new(dimension, config)),
            count: RwLock::new(0),
        }
    }

    /// The configured parameters.
    #[must_use]
    pub fn config(&self) -> LshConfig {
        self.config
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
        metric: DistanceKind,
        config: LshConfig,
        reader: &mut SectionReader<'_>,
    ) -> Result<Self> {
        let len = reader.read_u64()? as usize;
        let state: LshState = bincode::deserialize(reader.take(len)?)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        if state.tables.len() != config.tables {
            return Err(Error::Corrupted(format!(
                "lsh payload has {} tables, config says {}",
                state.tables.len(),
                config.tables
            )));
        }
        let count = state
            .tables
            .first()
            .map_or(0, |t| t.values().map(Vec::len).sum());
        let index = Self::new(store, metric, config);
        *index.inner.write() = state;
        *index.count.write() = count;
        Ok(index)
    }
}

impl VectorIndex for LshIndex {
    fn insert(&self, row: RowId, vector: &[f32]) -> Result<()> {
        let mut state = self.inner.write();
        let store = self.store.read();
        Error::check_dimension(store.dimension(), vector.len())?;
        for table in 0..self.config.tables {
            let signature = state.signature(self.config, table, vector);
            state.tables[table].entry(signature).or_default().push(row);
        }
        *self.count.write() += 1;
        Ok(())
    }

    fn remove(&self, row: RowId) -> bool {
        let mut state = self.inner.write();
        let mut found = false;
        for table in &mut state.tables {
            for bucket in table.values_mut() {
                let before = bucket.len();
                bucket.retain(|&r| r != row);
                found |= bucket.len() != before;
            }
        }
        if found {
            let mut count = self.count.write();
            *count = count.saturating_sub(1);
        }
        found
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(RowId, f32)>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be non-zero".into()));
        }
        let state = self.inner.read();
        let store = self.store.read();
        Error::check_dimension(store.dimension(), query.len())?;

        // Union of the query's bucket in every table.
        let mut candidates: FxHashSet<RowId> = FxHashSet::default();
        for table in 0..self.config.tables {
            let signature = state.signature(self.config, table, query);
            if let Some(bucket) = state.tables[table].get(&signature) {
                candidates.extend(bucket.iter().copied());
            }
        }

        let mut results: Vec<(RowId, f32)> = candidates
            .into_iter()
            .filter(|&row| !store.is_tombstoned(row))
            .map(|row| {
                (
                    row,
                    self.metric.distance(query, store.row_unchecked(row)),
                )
            })
            .collect();
        self.metric.sort_results(&mut results);
        results.truncate(k);
        Ok(results)
    }

    fn len(&self) -> usize {
        *self.count.read()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Lsh
    }

    fn metric(&self) -> DistanceKind {
        self.metric
    }

    fn apply_permutation(&self, perm: &Permutation) -> Result<()> {
        let mut state = self.inner.write();
        let mut removed = 0usize;
        for table in &mut state.tables {
            for bucket in table.values_mut() {
                let before = bucket.len();
                *bucket = bucket.iter().filter_map(|&r| perm.remap(r)).collect();
                removed += before - bucket.len();
            }
        }
        if !state.tables.is_empty() {
            let mut count = self.count.write();
            *count = count.saturating_sub(removed / state.tables.len());
        }
        Ok(())
    }
}
