//! IVF-PQ: coarse partitioning with product-quantized residuals and
//! asymmetric distance computation.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::io::Write;

use super::kmeans;
use crate::config::IvfPqConfig;
use crate::distance::DistanceKind;
use crate::error::{Error, Result};
use crate::index::{IndexKind, VectorIndex};
use crate::persistence::codec::{self, SectionReader};
use crate::simd;
use crate::store::{Permutation, RowId, SharedStore};

/// Product quantizer: `m` independent subquantizers of `2^nbits` centroids
/// over `dim/m`-float subspaces.
#[derive(Debug)]
pub struct ProductQuantizer {
    dim: usize,
    m: usize,
    dsub: usize,
    /// `codebooks[sub][code]` is a `dsub`-float centroid.
    codebooks: Vec<Vec<Vec<f32>>>,
}

impl ProductQuantizer {
    /// Trains subcodebooks over a set of residual vectors.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `m` does not divide `dim`; `TrainingFailed`
    /// when a subspace cannot be clustered.
    pub fn train(
        residuals: &[f32],
        n: usize,
        dim: usize,
        m: usize,
        nbits: u8,
        max_iters: usize,
    ) -> Result<Self> {
        if m == 0 || dim % m != 0 {
            return Err(Error::InvalidArgument(format!(
                "pq subquantizer count {m} must divide dimension {dim}"
            )));
        }
        let dsub = dim / m;
        let ksub = 1usize << nbits;

        let mut codebooks = Vec::with_capacity(m);
        for sub in 0..m {
            // Gather this subspace from every residual.
            let mut subvectors = Vec::with_capacity(n * dsub);
            for i in 0..n {
                let start = i * dim + sub * dsub;
                subvectors.extend_from_slice(&residuals[start..start + dsub]);
            }
            let mut centroids = kmeans::train(&subvectors, n, dsub, ksub, max_iters)?;
            // Small training sets yield fewer than 2^nbits centroids; the
            // code space and the on-disk layout are fixed-size, so pad by
            // cycling the learned entries.
            let learned = centroids.len();
            while centroids.len() < ksub {
                let repeat = centroids[centroids.len() % learned].clone();
                centroids.push(repeat);
            }
            codebooks.push(centroids);
        }
        Ok(Self {
            dim,
            m,
            dsub,
            codebooks,
        })
    }

    /// Encodes a residual into `m` subquantizer codes.
    #[must_use]
    pub fn encode(&self, residual: &[f32]) -> Vec<u8> {
        (0..self.m)
            .map(|sub| {
                let slice = &residual[sub * self.dsub..(sub + 1) * self.dsub];
                let (code, _) = kmeans::nearest_centroid(slice, &self.codebooks[sub]);
                code as u8
            })
            .collect()
    }

    /// Reconstructs the residual a code represents (centroid concatenation).
    #[must_use]
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dim);
        for (sub, &code) in codes.iter().enumerate() {
            out.extend_from_slice(&self.codebooks[sub][code as usize]);
        }
        out
    }

    /// Precomputes the ADC table: `m × 2^nbits` squared distances between
    /// the query residual's subvectors and every subcentroid.
    #[must_use]
    pub fn adc_table(&self, query_residual: &[f32]) -> Vec<f32> {
        let ksub = self.codebooks[0].len();
        let mut table = Vec::with_capacity(self.m * ksub);
        for sub in 0..self.m {
            let q = &query_residual[sub * self.dsub..(sub + 1) * self.dsub];
            for centroid in &self.codebooks[sub] {
                table.push(simd::squared_l2(q, centroid));
            }
        }
        table
    }

    /// Sums table lookups across a code word.
    #[inline]
    #[must_use]
    pub fn adc_distance(&self, table: &[f32], codes: &[u8]) -> f32 {
        let ksub = self.codebooks[0].len();
        codes
            .iter()
            .enumerate()
            .map(|(sub, &code)| table[sub * ksub + code as usize])
            .sum()
    }
}

#[derive(Debug)]
struct PqEntry {
    row: RowId,
    code: Vec<u8>,
}

#[derive(Debug)]
struct PqState {
    centroids: Vec<Vec<f32>>,
    quantizer: Option<ProductQuantizer>,
    lists: Vec<Vec<PqEntry>>,
    assignments: FxHashMap<RowId, u32>,
}

impl PqState {
    fn trained(&self) -> bool {
        self.quantizer.is_some()
    }
}

/// Inverted-file index over PQ-encoded residuals.
///
/// With `use_cosine` the index normalizes vectors at insert and query
/// time and operates as an inner-product index; reported distances are
/// then squared L2 over unit vectors (monotone in cosine distance).
#[derive(Debug)]
pub struct IvfPqIndex {
    store: SharedStore,
    metric: DistanceKind,
    config: IvfPqConfig,
    inner: RwLock<PqState>,
}

impl IvfPqIndex {
    /// Creates an untrained index; [`Self::train`] must run before inserts.
    #[must_use]
    pub fn new(store: SharedStore, metric: DistanceKind, config: IvfPqConfig) -> Self {
        Self {
            store,
            metric,
            config,
            inner: RwLock::new(PqState {
                centroids: Vec::new(),
                quantizer: None,
                lists: Vec::new(),
                assignments: FxHashMap::default(),
            }),
        }
    }

    /// The configured parameters.
    #[must_use]
    pub fn config(&self) -> IvfPqConfig {
        self.config
    }

    /// Whether training has completed.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.inner.read().trained()
    }

    fn prepared(&self, vector: &[f32]) -> Vec<f32> {
        let mut v = vector.to_vec();
        if self.config.use_cosine {
            simd::normalize_inplace(&mut v);
        }
        v
    }

    /// Trains the coarse quantizer and the PQ subcodebooks on the store's
    /// live rows (the retrain and migration path), then re-encodes any
    /// rows already indexed.
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

    /// Trains on an explicit row-major sample (the bootstrap path).
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

    fn train_on(&self, raw_sample: &[f32], count: usize) -> Result<()> {
        let dim = self.store.read().dimension();
        let mut sample = Vec::with_capacity(raw_sample.len());
        for i in 0..count {
            sample.extend(self.prepared(&raw_sample[i * dim..(i + 1) * dim]));
        }
        let centroids = kmeans::train(
            &sample,
            count,
            dim,
            self.config.nlist,
            self.config.train_iters,
        )?;

        // Residuals against the assigned coarse centroid feed PQ training.
        let mut residuals = Vec::with_capacity(sample.len());
        for i in 0..count {
            let v = &sample[i * dim..(i + 1) * dim];
            let (list, _) = kmeans::nearest_centroid(v, &centroids);
            residuals.extend(v.iter().zip(&centroids[list]).map(|(x, c)| x - c));
        }
        let quantizer = ProductQuantizer::train(
            &residuals,
            count,
            dim,
            self.config.m,
            self.config.nbits,
            self.config.train_iters,
        )?;
        tracing::info!(
            nlist = centroids.len(),
            m = self.config.m,
            nbits = self.config.nbits,
            samples = count,
            "ivf-pq trained"
        );

        let mut state = self.inner.write();
        let store = self.store.read();
        let previous: Vec<RowId> = state.assignments.keys().copied().collect();
        state.lists = (0..centroids.len()).map(|_| Vec::new()).collect();
        state.assignments.clear();
        state.centroids = centroids;
        state.quantizer = Some(quantizer);
        for row in previous {
            let v = self.prepared(store.row_unchecked(row));
            Self::assign(&mut state, row, &v);
        }
        Ok(())
    }

    fn assign(state: &mut PqState, row: RowId, prepared: &[f32]) {
        let PqState {
            centroids,
            quantizer,
            lists,
            assignments,
        } = state;
        let Some(quantizer) = quantizer.as_ref() else {
            return;
        };
        let (list, _) = kmeans::nearest_centroid(prepared, centroids);
        let residual: Vec<f32> = prepared
            .iter()
            .zip(&centroids[list])
            .map(|(x, c)| x - c)
            .collect();
        let code = quantizer.encode(&residual);
        lists[list].push(PqEntry { row, code });
        assignments.insert(row, list as u32);
    }

    /// ADC search with a per-query probe count override.
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
        let Some(quantizer) = state.quantizer.as_ref() else {
            return Err(Error::Untrained("ivf-pq"));
        };
        let store = self.store.read();
        Error::check_dimension(store.dimension(), query.len())?;
        let query = self.prepared(query);

        let mut ranked: Vec<(usize, f32)> = state
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, simd::squared_l2(&query, c)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        let nprobe = nprobe.max(1).min(ranked.len());

        // Gather enough ADC candidates for the optional exact rerank.
        let gather = if self.config.rerank_top > 0 {
            k.max(self.config.rerank_top * self.config.oversampling_factor)
        } else {
            k
        };

        let mut candidates: Vec<(RowId, f32)> = Vec::new();
        for &(list, _) in ranked.iter().take(nprobe) {
            let residual: Vec<f32> = query
                .iter()
                .zip(&state.centroids[list])
                .map(|(x, c)| x - c)
                .collect();
            let table = quantizer.adc_table(&residual);
            for entry in &state.lists[list] {
                if store.is_tombstoned(entry.row) {
                    continue;
                }
                candidates.push((entry.row, quantizer.adc_distance(&table, &entry.code)));
            }
        }
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
        candidates.truncate(gather);

        if self.config.rerank_top > 0 {
            // Exact re-scoring of the ADC front-runners on raw vectors.
            for (row, dist) in &mut candidates {
                let exact = self.prepared(store.row_unchecked(*row));
                *dist = simd::squared_l2(&query, &exact);
            }
            candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
        }
        candidates.truncate(k);
        Ok(candidates)
    }

    pub(crate) fn save_payload<W: Write>(&self, w: &mut W) -> Result<()> {
        let state = self.inner.read();
        codec::write_u32(w, state.centroids.len() as u32)?;
        codec::write_u32(w, self.config.m as u32)?;
        codec::write_u8(w, self.config.nbits)?;
        codec::write_u32(w, self.config.nprobe as u32)?;
        for centroid in &state.centroids {
            codec::write_f32_slice(w, centroid)?;
        }
        if let Some(q) = state.quantizer.as_ref() {
            for sub in &q.codebooks {
                for centroid in sub {
                    codec::write_f32_slice(w, centroid)?;
                }
            }
        }
        for list in &state.lists {
            codec::write_u64(w, list.len() as u64)?;
            for entry in list {
                codec::write_u64(w, entry.row)?;
                w.write_all(&entry.code)?;
            }
        }
        Ok(())
    }

    pub(crate) fn load_payload(
        store: SharedStore,
        metric: DistanceKind,
        mut config: IvfPqConfig,
        reader: &mut SectionReader<'_>,
    ) -> Result<Self> {
        let nlist = reader.read_u32()? as usize;
        let m = reader.read_u32()? as usize;
        let nbits = reader.read_u8()?;
        config.nprobe = reader.read_u32()? as usize;
        config.m = m;
        config.nbits = nbits;

        let dim = store.read().dimension();
        let row_count = store.read().count() as u64;
        if m == 0 || dim % m != 0 {
            return Err(Error::Corrupted(format!(
                "pq subquantizer count {m} does not divide dimension {dim}"
            )));
        }
        let dsub = dim / m;
        let ksub = 1usize << nbits;

        let mut centroids = Vec::with_capacity(nlist);
        for _ in 0..nlist {
            centroids.push(reader.read_f32_vec(dim)?);
        }
        let quantizer = if nlist > 0 {
            let mut codebooks = Vec::with_capacity(m);
            for _ in 0..m {
                let mut sub = Vec::with_capacity(ksub);
                for _ in 0..ksub {
                    sub.push(reader.read_f32_vec(dsub)?);
                }
                codebooks.push(sub);
            }
            Some(ProductQuantizer {
                dim,
                m,
                dsub,
                codebooks,
            })
        } else {
            None
        };

        let mut lists = Vec::with_capacity(nlist);
        let mut assignments = FxHashMap::default();
        for list_id in 0..nlist {
            let len = reader.read_u64()? as usize;
            let mut list = Vec::with_capacity(len);
            for _ in 0..len {
                let row = reader.read_u64()?;
                if row >= row_count {
                    return Err(Error::Corrupted(format!(
                        "ivf-pq list {list_id} references out-of-range row {row}"
                    )));
                }
                if assignments.insert(row, list_id as u32).is_some() {
                    return Err(Error::Corrupted(format!(
                        "row {row} appears in more than one ivf-pq list"
                    )));
                }
                let code = reader.take(m)?.to_vec();
                list.push(PqEntry { row, code });
            }
            lists.push(list);
        }

        let index = Self::new(store, metric, config);
        *index.inner.write() = PqState {
            centroids,
            quantizer,
            lists,
            assignments,
        };
        Ok(index)
    }
}

impl VectorIndex for IvfPqIndex {
    fn insert(&self, row: RowId, vector: &[f32]) -> Result<()> {
        let mut state = self.inner.write();
        if !state.trained() {
            return Err(Error::Untrained("ivf-pq"));
        }
        let store = self.store.read();
        Error::check_dimension(store.dimension(), vector.len())?;
        let prepared = self.prepared(vector);
        Self::assign(&mut state, row, &prepared);
        Ok(())
    }

    fn remove(&self, row: RowId) -> bool {
        let mut state = self.inner.write();
        let Some(list) = state.assignments.remove(&row) else {
            return false;
        };
        state.lists[list as usize].retain(|entry| entry.row != row);
        true
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(RowId, f32)>> {
        self.search_with_nprobe(query, k, self.config.nprobe)
    }

    fn len(&self) -> usize {
        self.inner.read().assignments.len()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::IvfPq
    }

    fn metric(&self) -> DistanceKind {
        self.metric
    }

    fn apply_permutation(&self, perm: &Permutation) -> Result<()> {
        let mut state = self.inner.write();
        for list in &mut state.lists {
            let entries = std::mem::take(list);
            *list = entries
                .into_iter()
                .filter_map(|mut entry| {
                    entry.row = perm.remap(entry.row)?;
                    Some(entry)
                })
                .collect();
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
