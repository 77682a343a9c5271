//! # GigaVector Core
//!
//! Embeddable single-node vector retrieval engine.
//!
//! GigaVector serves dense and sparse approximate-nearest-neighbor
//! queries, BM25 lexical retrieval and hybrid ranking pipelines over
//! collections from thousands to tens of millions of vectors.
//!
//! ## Features
//!
//! - **Index family**: brute-force, HNSW, IVF-Flat, IVF-PQ, LSH and a
//!   sparse inverted index behind one `Database` facade
//! - **Full-text search**: BM25 with BlockMax-WAND and phrase matching
//!   in six languages
//! - **Phased ranking**: compose ANN retrieval with expression, MMR and
//!   callback rerankers plus metadata filters
//! - **Binary persistence**: one-file save/load for every index kind
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gigavector_core::{Database, DistanceKind, IndexKind};
//!
//! let db = Database::open(Some("./vectors.gv"), 768, IndexKind::Hnsw)?;
//! let row = db.add_with_rich_metadata(&embedding, &["lang"], &["en"])?;
//! let hits = db.search(&query, 10, DistanceKind::SquaredEuclidean)?;
//! db.close()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod database;
pub mod distance;
pub mod error;
pub mod fulltext;
pub mod index;
pub mod migration;
pub mod pipeline;
pub mod simd;
pub mod sparse;
pub mod store;

pub(crate) mod persistence;

#[cfg(test)]
mod error_tests;
#[cfg(test)]
mod simd_tests;
#[cfg(test)]
mod store_tests;

pub use config::{
    EngineConfig, FlatConfig, FullTextConfig, HnswConfig, IvfConfig, IvfPqConfig, LshConfig,
};
pub use database::Database;
pub use distance::DistanceKind;
pub use error::{Error, Result};
pub use fulltext::{FullTextIndex, Language};
pub use index::{IndexKind, PrimaryIndex, VectorIndex};
pub use migration::{start_migration, MigrationEvent, MigrationHandle};
pub use pipeline::{Candidate, PhaseConfig, PhaseKind, PhaseStats, RankingPipeline};
pub use sparse::SparseVector;
pub use store::{Metadata, Permutation, RowId, VectorStore};
