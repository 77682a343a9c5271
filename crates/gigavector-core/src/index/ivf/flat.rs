//! IVF-Flat: coarse k-means partitioning with exact in-list scoring.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BinaryHeap;
use std::io::Write;

use super::kmeans;
use crate::config::IvfConfig;
use crate::distance::DistanceKind;
use crate::error::{Error, Result};
use crate::index::ordered_float::OrderedFloat;
use crate::index::{IndexKind, VectorIndex};
use crate::persistence::codec::{self, SectionReader};
use crate::store::{Permutation, RowId, SharedStore};

#[derive(Debug)]
struct IvfState {
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<RowId>>,
    /// row -> list id; list membership never changes after insertion.
    assignments: FxHashMap<RowId, u32>,
}

impl IvfState {
    fn trained(&self) -> bool {
        !self.centroids.is_empty()
    }
}

/// Inverted-file index with exact distances inside probed lists.
#[derive(Debug)]
pub struct IvfFlatIndex {
    store: SharedStore,
    metric: DistanceKind,
    config: IvfConfig,
    inner: RwLock<IvfState>,
}

impl IvfFlatIndex {
    /// Creates an untrained index; [`Self::train`] must run before inserts.
    #[must_use]
    pub fn new(store: SharedStore, metric: DistanceKind, config: IvfConfig) -> Self {
        Self {
            store,
            metric,
            config,
            inner: RwLock::new(IvfState {
                centroids: Vec::new(),
                lists: Vec::new(),
                assignments: FxHashMap::default(),
            }),
        }
    }

    /// The configured parameters.
    #[must_use]
    pub fn config(&self) -> IvfConfig {
        self.config
    }

    /// Whether training has produced centroids.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.inner.read().trained()
    }

    /// Trains the coarse quantizer on the store's live rows (the retrain
    /// and migration path). Re-training reassigns any rows already
    /// indexed.
    pub fn train(&self) -> Result<()> {
        let (sample, count) = {
            let store = self.store.read();
            let mut sample = Vec::new();
            let mut count = 0usize;
            for (_, data) in store.iter_live() {
                sample.extend_from_slice(data);
                count += 1;
            }
            (sample, count)
        };
        self.train_on(&sample, count)
    }

    /// Trains the coarse quantizer on an explicit row-major sample (the
    /// bootstrap path, before any row is inserted).
    pub fn train_with(&self, sample: &[f32], count: usize) -> Result<()> {
        let dimension = self.store.read().dimension();
        if sample.len() != count * dimension {
            return Err(Error::InvalidArgument(format!(
                "training sample of {} floats does not hold {count} rows of dimension {dimension}",
                sample.len()
            )));
        }
        self.train_on(sample, count)
    }

    fn train_on(&self, sample: &[f32], count: usize) -> Result<()> {
        let dimension = self.store.read().dimension();
        let centroids = kmeans::train(
            sample,
            count,
            dimension,
            self.config.nlist,
            self.config.train_iters,
        )?;
        tracing::info!(nlist = centroids.len(), samples = count, "ivf-flat trained");

        let mut state = self.inner.write();
        let store = self.store.read();
        let previous: Vec<RowId> = state.assignments.keys().copied().collect();
        state.lists = vec![Vec::new(); centroids.len()];
        state.assignments.clear();
        state.centroids = centroids;
        for row in previous {
            Self::assign(&mut state, row, store.row_unchecked(row));
        }
        Ok(())
    }

    fn assign(state: &mut IvfState, row: RowId, vector: &[f32]) {
        let (list, _) = kmeans::nearest_centroid(vector, &state.centroids);
        state.lists[list].push(row);
        state.assignments.insert(row, list as u32);
    }

    /// Search with a per-query probe count override.
    pub fn search_with_nprobe(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
    ) -> Result<Vec<(RowId, f32)>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be non-zero".into()));
        }
        let state = self.inner.read();
        if !state.trained() {
            return Err(Error::Untrained("ivf-flat"));
        }
        let store = self.store.read();
        Error::check_dimension(store.dimension(), query.len())?;

        // Score all centroids, probe the closest nprobe lists.
        let mut ranked: Vec<(usize, f32)> = state
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, crate::simd::squared_l2(query, c)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        let nprobe = nprobe.max(1).min(ranked.len());

        let mut heap: BinaryHeap<(OrderedFloat, RowId)> = BinaryHeap::with_capacity(k + 1);
        for &(list, _) in ranked.iter().take(nprobe) {
            for &row in &state.lists[list] {
                if store.is_tombstoned(row) {
                    continue;
                }
                let key = self
                    .metric
                    .order_key(self.metric.distance(query, store.row_unchecked(row)));
                if heap.len() < k {
                    heap.push((OrderedFloat(key), row));
                } else if let Some(&(worst, _)) = heap.peek() {
                    if key < worst.0 {
                        heap.pop();
                        heap.push((OrderedFloat(key), row));
                    }
                }
            }
        }

        let mut results: Vec<(RowId, f32)> = heap
            .into_iter()
            .map(|(key, row)| {
                let raw = if self.metric.higher_is_better() {
                    -key.0
                } else {
                    key.0
                };
                (row, raw)
            })
            .collect();
        self.metric.sort_results(&mut results);
        Ok(results)
    }

    pub(crate) fn save_payload<W: Write>(&self, w: &mut W) -> Result<()> {
        let state = self.inner.read();
        codec::write_u32(w, state.centroids.len() as u32)?;
        codec::write_u32(w, self.config.nprobe as u32)?;
        for centroid in &state.centroids {
            codec::write_f32_slice(w, centroid)?;
        }
        for list in &state.lists {
            codec::write_u64(w, list.len() as u64)?;
            for &row in list {
                codec::write_u64(w, row)?;
            }
        }
        Ok(())
    }

    pub(crate) fn load_payload(
        store: SharedStore,
        metric: DistanceKind,
        mut config: IvfConfig,
        reader: &mut SectionReader<'_>,
    ) -> Result<Self> {
        let nlist = reader.read_u32()? as usize;
        config.nprobe = reader.read_u32()? as usize;
        let dimension = store.read().dimension();
        let row_count = store.read().count() as u64;

        let mut centroids = Vec::with_capacity(nlist);
        for _ in 0..nlist {
            centroids.push(reader.read_f32_vec(dimension)?);
        }
        let mut lists = Vec::with_capacity(nlist);
        let mut assignments = FxHashMap::default();
        for list_id in 0..nlist {
            let len = reader.read_u64()? as usize;
            let mut list = Vec::with_capacity(len);
            for _ in 0..len {
                let row = reader.read_u64()?;
                if row >= row_count {
                    return Err(Error::Corrupted(format!(
                        "ivf list {list_id} references out-of-range row {row}"
                    )));
                }
                if assignments.insert(row, list_id as u32).is_some() {
                    return Err(Error::Corrupted(format!(
                        "row {row} appears in more than one ivf list"
                    )));
                }
                list.push(row);
            }
            lists.push(list);
        }

        let index = Self::new(store, metric, config);
        *index.inner.write() = IvfState {
            centroids,
            lists,
            assignments,
        };
        Ok(index)
    }
}

impl VectorIndex for IvfFlatIndex {
    fn insert(&self, row: RowId, vector: &[f32]) -> Result<()> {
        let mut state = self.inner.write();
        if !state.trained() {
            return Err(Error::Untrained("ivf-flat"));
        }
        let store = self.store.read();
        Error::check_dimension(store.dimension(), vector.len())?;
        Self::assign(&mut state, row, vector);
        Ok(())
    }

    fn remove(&self, row: RowId) -> bool {
        let mut state = self.inner.write();
        let Some(list) = state.assignments.remove(&row) else {
            return false;
        };
        state.lists[list as usize].retain(|&r| r != row);
        true
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(RowId, f32)>> {
        self.search_with_nprobe(query, k, self.config.nprobe)
    }

    fn len(&self) -> usize {
        self.inner.read().assignments.len()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::IvfFlat
    }

    fn metric(&self) -> DistanceKind {
        self.metric
    }

    fn apply_permutation(&self, perm: &Permutation) -> Result<()> {
        let mut state = self.inner.write();
        for list in &mut state.lists {
            *list = list.iter().filter_map(|&r| perm.remap(r)).collect();
        }
        let old: Vec<(RowId, u32)> = state.assignments.drain().collect();
        for (row, list) in old {
            if let Some(new_row) = perm.remap(row) {
                state.assignments.insert(new_row, list);
            }
        }
        Ok(())
    }
}
