//! The embeddable `Database` facade.
//!
//! A database owns one vector store, one primary ANN index and one
//! full-text index. Insert, update and delete operations fan out to the
//! store and the index; queries go through the index (or the phased
//! ranking pipeline), the full-text index, or both for hybrid search.
//!
//! # Module Organization
//!
//! - `crud`: row lifecycle (add/get/update/delete/compact/train)
//! - `search`: dense, filtered, range, text, hybrid and pipeline search
//! - `persist`: save/load of the on-disk format

mod crud;
mod persist;
mod search;

#[cfg(test)]
mod database_tests;

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::distance::DistanceKind;
use crate::error::Result;
use crate::fulltext::FullTextIndex;
use crate::index::{IndexKind, PrimaryIndex, VectorIndex};
use crate::store::{SharedStore, VectorStore};

/// Single-node vector database: store + primary index + full-text index.
///
/// All methods take `&self`; interior locking follows the engine-wide
/// discipline (one reader-writer lock per index, never held across user
/// callbacks), so a `Database` can be shared across threads in an `Arc`.
#[derive(Debug)]
pub struct Database {
    path: Option<PathBuf>,
    metric: DistanceKind,
    config: EngineConfig,
    store: SharedStore,
    /// The outer lock only guards index replacement (migration swap);
    /// regular operations go through a read guard and the index's own
    /// internal lock.
    index: RwLock<PrimaryIndex>,
    fulltext: FullTextIndex,
}

impl Database {
    /// Opens a database: loads from `path` when a file exists there,
    /// otherwise creates an empty database with squared-Euclidean metric
    /// and default configuration.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero dimension, `Io`/`Corrupted` when an
    /// existing file cannot be loaded.
    pub fn open<P: AsRef<Path>>(
        path: Option<P>,
        dimension: usize,
        kind: IndexKind,
    ) -> Result<Self> {
        Self::open_with(
            path,
            dimension,
            kind,
            DistanceKind::SquaredEuclidean,
            EngineConfig::default(),
        )
    }

    /// Opens a database with an explicit metric and configuration.
    ///
    /// # Errors
    ///
    /// See [`Self::open`]; additionally `Config` when the configuration
    /// fails validation.
    pub fn open_with<P: AsRef<Path>>(
        path: Option<P>,
        dimension: usize,
        kind: IndexKind,
        metric: DistanceKind,
        config: EngineConfig,
    ) -> Result<Self> {
        let path = path.map(|p| p.as_ref().to_path_buf());
        if let Some(p) = &path {
            if p.exists() {
                let db = Self::load_with(p, config)?;
                crate::error::Error::check_dimension(dimension, db.dimension())?;
                return Ok(db);
            }
        }

        config.validate()?;
        let store: SharedStore = Arc::new(RwLock::new(VectorStore::new(dimension)?));
        let index = PrimaryIndex::build(kind, Arc::clone(&store), metric, &config)?;
        Ok(Self {
            path,
            metric,
            fulltext: FullTextIndex::new(config.fulltext),
            config,
            store,
            index: RwLock::new(index),
        })
    }

    /// Saves to the open path (when one was given) and drops the handle.
    ///
    /// # Errors
    ///
    /// Propagates save failures; the database is dropped either way.
    pub fn close(self) -> Result<()> {
        if let Some(path) = self.path.clone() {
            self.save(&path)?;
        }
        Ok(())
    }

    /// The fixed vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.store.read().dimension()
    }

    /// Number of live (non-tombstoned) rows.
    #[must_use]
    pub fn count(&self) -> usize {
        self.store.read().live_count()
    }

    /// The primary index kind.
    #[must_use]
    pub fn index_kind(&self) -> IndexKind {
        self.index.read().kind()
    }

    /// The metric the primary index was built with.
    #[must_use]
    pub fn metric(&self) -> DistanceKind {
        self.metric
    }

    /// The engine configuration in effect.
    #[must_use]
    pub fn engine_config(&self) -> &EngineConfig {
        &self.config
    }

    /// The full-text index.
    #[must_use]
    pub fn fulltext(&self) -> &FullTextIndex {
        &self.fulltext
    }

    /// Shared handle to the vector store.
    #[must_use]
    pub fn shared_store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    /// Replaces the primary index (migration swap).
    pub(crate) fn swap_index(&self, new_index: PrimaryIndex) {
        *self.index.write() = new_index;
    }
}
