//! Configuration for the engine and its index family.
//!
//! Configuration is resolved with the following priority (highest first):
//!
//! 1. Runtime overrides (struct fields set by the embedding host)
//! 2. Environment variables (`GIGAVECTOR_*`, e.g. `GIGAVECTOR_HNSW__M=32`)
//! 3. Configuration file (`gigavector.toml`)
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::fulltext::Language;

/// HNSW index parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Maximum connections per node above level 0 (`M`); level 0 allows `2M`.
    pub m: usize,
    /// Beam width during construction.
    pub ef_construction: usize,
    /// Beam width during search.
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

/// IVF-Flat index parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IvfConfig {
    /// Number of coarse centroids.
    pub nlist: usize,
    /// Number of lists probed at query time.
    pub nprobe: usize,
    /// k-means iteration cap during training.
    pub train_iters: usize,
}

impl Default for IvfConfig {
    fn default() -> Self {
        Self {
            nlist: 64,
            nprobe: 8,
            train_iters: 25,
        }
    }
}

/// IVF-PQ index parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IvfPqConfig {
    /// Number of coarse centroids.
    pub nlist: usize,
    /// Number of subquantizers; must divide the vector dimension.
    pub m: usize,
    /// Bits per subquantizer code (codebook size is `2^nbits`).
    pub nbits: u8,
    /// Number of lists probed at query time.
    pub nprobe: usize,
    /// k-means iteration cap during training.
    pub train_iters: usize,
    /// Number of top ADC candidates re-scored with exact distances.
    /// Zero disables reranking.
    pub rerank_top: usize,
    /// Normalize vectors at insert and query time so the index runs as an
    /// inner-product index.
    pub use_cosine: bool,
    /// Multiplier applied to `rerank_top` when gathering ADC candidates.
    pub oversampling_factor: usize,
}

impl Default for IvfPqConfig {
    fn default() -> Self {
        Self {
            nlist: 64,
            m: 8,
            nbits: 8,
            nprobe: 8,
            train_iters: 25,
            rerank_top: 0,
            use_cosine: false,
            oversampling_factor: 2,
        }
    }
}

/// LSH index parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LshConfig {
    /// Number of hash tables.
    pub tables: usize,
    /// Signature width in bits per table.
    pub hash_bits: usize,
}

impl Default for LshConfig {
    fn default() -> Self {
        Self {
            tables: 8,
            hash_bits: 12,
        }
    }
}

/// Flat index parameters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatConfig {
    /// Use SIMD kernels for distance computation. Off by default so results
    /// are bit-identical with the scalar reference path.
    pub use_simd: bool,
}

/// Full-text index parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FullTextConfig {
    /// Tokenizer/stemmer/stopword language.
    pub language: Language,
    /// Apply stemming after stopword removal.
    pub enable_stemming: bool,
    /// Retain token positions so phrase search works.
    pub enable_phrase_match: bool,
    /// Use BlockMax-WAND for multi-term queries (the naive scorer is used
    /// otherwise; both produce identical top-k results).
    pub use_blockmax_wand: bool,
    /// Posting-list block size for block-max precomputation.
    pub block_size: usize,
}

impl Default for FullTextConfig {
    fn default() -> Self {
        Self {
            language: Language::English,
            enable_stemming: true,
            enable_phrase_match: true,
            use_blockmax_wand: true,
            block_size: 128,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// HNSW parameters.
    pub hnsw: HnswConfig,
    /// IVF-Flat parameters.
    pub ivf: IvfConfig,
    /// IVF-PQ parameters.
    pub ivf_pq: IvfPqConfig,
    /// LSH parameters.
    pub lsh: LshConfig,
    /// Flat index parameters.
    pub flat: FlatConfig,
    /// Full-text index parameters.
    pub fulltext: FullTextConfig,
}

impl EngineConfig {
    /// Loads configuration from an optional `gigavector.toml` file layered
    /// with `GIGAVECTOR_*` environment variables over the defaults.
    ///
    /// # Errors
    ///
    /// Returns `Config` if extraction or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: Self = figment
            .merge(Env::prefixed("GIGAVECTOR_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.hnsw.m < 2 {
            return Err(Error::Config("hnsw.m must be at least 2".into()));
        }
        if self.hnsw.ef_construction == 0 || self.hnsw.ef_search == 0 {
            return Err(Error::Config(
                "hnsw ef_construction and ef_search must be non-zero".into(),
            ));
        }
        if self.ivf.nlist == 0 || self.ivf_pq.nlist == 0 {
            return Err(Error::Config("ivf nlist must be non-zero".into()));
        }
        if self.ivf_pq.m == 0 {
            return Err(Error::Config("ivf_pq.m must be non-zero".into()));
        }
        if self.ivf_pq.nbits == 0 || self.ivf_pq.nbits > 8 {
            return Err(Error::Config("ivf_pq.nbits must be in 1..=8".into()));
        }
        if self.ivf_pq.oversampling_factor == 0 {
            return Err(Error::Config(
                "ivf_pq.oversampling_factor must be non-zero".into(),
            ));
        }
        if self.lsh.tables == 0 || self.lsh.hash_bits == 0 || self.lsh.hash_bits > 64 {
            return Err(Error::Config(
                "lsh.tables must be non-zero and hash_bits in 1..=64".into(),
            ));
        }
        if self.fulltext.block_size == 0 {
            return Err(Error::Config("fulltext.block_size must be non-zero".into()));
        }
        Ok(())
    }
}
