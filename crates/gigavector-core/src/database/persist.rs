//! Save/load of the database file and its full-text sibling.

use memmap2::Mmap;
use parking_lot::RwLock;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::Database;
use crate::config::EngineConfig;
use crate::distance::DistanceKind;
use crate::error::{Error, Result};
use crate::fulltext::FullTextIndex;
use crate::index::{
    FlatIndex, HnswIndex, IndexKind, IvfFlatIndex, IvfPqIndex, LshIndex, PrimaryIndex,
    SparseIndex, VectorIndex,
};
use crate::persistence::codec::{self, SectionReader};
use crate::persistence::{read_store, write_store, DB_MAGIC, DB_VERSION};
use crate::store::SharedStore;

/// Path of the full-text sibling file for a database path.
fn fulltext_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".ft");
    PathBuf::from(os)
}

impl Database {
    /// Writes the database file at `path` (and `<path>.ft` when documents
    /// are indexed).
    ///
    /// # Errors
    ///
    /// `Io` on filesystem failures.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let index = self.index.read();
        let store = self.store.read();

        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        w.write_all(DB_MAGIC)?;
        codec::write_u32(&mut w, DB_VERSION)?;
        codec::write_u32(&mut w, index.kind().tag())?;
        codec::write_u64(&mut w, store.count() as u64)?;
        codec::write_u64(&mut w, store.dimension() as u64)?;
        write_store(&mut w, &store)?;

        codec::write_u32(&mut w, self.metric.tag())?;
        match &*index {
            PrimaryIndex::Flat(_) => {}
            PrimaryIndex::Hnsw(i) => i.save_payload(&mut w)?,
            PrimaryIndex::IvfFlat(i) => i.save_payload(&mut w)?,
            PrimaryIndex::IvfPq(i) => i.save_payload(&mut w)?,
            PrimaryIndex::Lsh(i) => i.save_payload(&mut w)?,
            PrimaryIndex::Sparse(i) => i.save_payload(&mut w)?,
        }
        w.flush()?;

        if self.fulltext.doc_count() > 0 {
            let file = File::create(fulltext_path(path))?;
            let mut w = BufWriter::new(file);
            self.fulltext.save_to(&mut w)?;
            w.flush()?;
        }
        tracing::info!(path = %path.display(), rows = store.count(), "database saved");
        Ok(())
    }

    /// Loads a database file with default configuration.
    ///
    /// # Errors
    ///
    /// `Io` when the file cannot be read, `Corrupted` on a bad magic,
    /// version mismatch or invariant violation. On error nothing is kept.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with(path, EngineConfig::default())
    }

    /// Loads a database file, using `config` for parameters the payload
    /// does not pin.
    ///
    /// # Errors
    ///
    /// See [`Self::load`].
    pub fn load_with<P: AsRef<Path>>(path: P, config: EngineConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and lives only for the parse.
        let mmap = unsafe { Mmap::map(&file)? };
        let mut reader = SectionReader::new(&mmap);

        let magic = reader.take(DB_MAGIC.len())?;
        if magic != DB_MAGIC {
            return Err(Error::Corrupted("missing database magic".into()));
        }
        let version = reader.read_u32()?;
        if version != DB_VERSION {
            return Err(Error::Corrupted(format!(
                "unsupported format version {version}, expected {DB_VERSION}"
            )));
        }
        let kind = IndexKind::from_tag(reader.read_u32()?)
            .ok_or_else(|| Error::Corrupted("unknown index kind tag".into()))?;
        let count = reader.read_u64()? as usize;
        let dimension = reader.read_u64()? as usize;
        if dimension == 0 {
            return Err(Error::Corrupted("zero dimension in header".into()));
        }

        let store = read_store(&mut reader, count, dimension)?;
        let store: SharedStore = Arc::new(RwLock::new(store));

        let metric = DistanceKind::from_tag(reader.read_u32()?)
            .ok_or_else(|| Error::Corrupted("unknown metric tag".into()))?;
        let index = match kind {
            IndexKind::Flat => {
                PrimaryIndex::Flat(FlatIndex::new(Arc::clone(&store), metric, config.flat))
            }
            IndexKind::Hnsw => PrimaryIndex::Hnsw(HnswIndex::load_payload(
                Arc::clone(&store),
                metric,
                &mut reader,
            )?),
            IndexKind::IvfFlat => PrimaryIndex::IvfFlat(IvfFlatIndex::load_payload(
                Arc::clone(&store),
                metric,
                config.ivf,
                &mut reader,
            )?),
            IndexKind::IvfPq => PrimaryIndex::IvfPq(IvfPqIndex::load_payload(
                Arc::clone(&store),
                metric,
                config.ivf_pq,
                &mut reader,
            )?),
            IndexKind::Lsh => PrimaryIndex::Lsh(LshIndex::load_payload(
                Arc::clone(&store),
                metric,
                config.lsh,
                &mut reader,
            )?),
            IndexKind::Sparse => PrimaryIndex::Sparse(SparseIndex::load_payload(
                Arc::clone(&store),
                &mut reader,
            )?),
        };

        let ft_file = fulltext_path(path);
        let fulltext = if ft_file.exists() {
            let file = File::open(&ft_file)?;
            // SAFETY: read-only mapping scoped to the parse.
            let ft_mmap = unsafe { Mmap::map(&file)? };
            let mut ft_reader = SectionReader::new(&ft_mmap);
            FullTextIndex::load_from(&mut ft_reader)?
        } else {
            FullTextIndex::new(config.fulltext)
        };

        tracing::info!(path = %path.display(), rows = count, ?kind, "database loaded");
        Ok(Self {
            path: Some(path.to_path_buf()),
            metric,
            config,
            store,
            index: RwLock::new(index),
            fulltext,
        })
    }
}
