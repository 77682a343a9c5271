//! Binary persistence for the database file.
//!
//! Layout (all integers little-endian, matching the writer):
//!
//! ```text
//! 8-byte magic "GIGAVEC1"
//! u32 version
//! u32 index-kind tag
//! u64 count, u64 dimension
//! SoA payload: count × dimension × f32
//! metadata section: u32 row count, per row u32 pair_count then
//!   (u32 klen, bytes, u32 vlen, bytes) pairs
//! tombstone bitmap: ⌈count/8⌉ bytes
//! index payload: u32 metric tag, then kind-specific data
//! ```
//!
//! The full-text index is a sibling file with its own `GV_FT01` magic.

pub(crate) mod codec;


use std::io::Write;

use crate::error::{Error, Result};
use crate::store::{Metadata, VectorStore};
use codec::SectionReader;

/// Database file magic.
pub(crate) const DB_MAGIC: &[u8; 8] = b"GIGAVEC1";
/// Current format version.
pub(crate) const DB_VERSION: u32 = 1;

/// Writes the store sections (SoA, metadata, tombstones).
pub(crate) fn write_store<W: Write>(w: &mut W, store: &VectorStore) -> Result<()> {
    codec::write_f32_slice(w, store.raw_data())?;

    let metadata = store.raw_metadata();
    codec::write_u32(w, metadata.len() as u32)?;
    for slot in metadata {
        match slot {
            None => codec::write_u32(w, 0)?,
            Some(map) => {
                codec::write_u32(w, map.len() as u32)?;
                for (key, value) in map {
                    codec::write_bytes(w, key.as_bytes())?;
                    codec::write_bytes(w, value.as_bytes())?;
                }
            }
        }
    }

    w.write_all(&store.tombstone_bytes())?;
    Ok(())
}

/// Reads the store sections written by [`write_store`].
pub(crate) fn read_store(
    reader: &mut SectionReader<'_>,
    count: usize,
    dimension: usize,
) -> Result<VectorStore> {
    let data = reader.read_f32_vec(count.checked_mul(dimension).ok_or_else(|| {
        Error::Corrupted(format!("{count} rows × {dimension} dims overflows"))
    })?)?;

    let meta_rows = reader.read_u32()? as usize;
    if meta_rows != count {
        return Err(Error::Corrupted(format!(
            "metadata section covers {meta_rows} rows, header says {count}"
        )));
    }
    let mut metadata = Vec::with_capacity(count);
    for _ in 0..count {
        let pairs = reader.read_u32()? as usize;
        if pairs == 0 {
            metadata.push(None);
            continue;
        }
        let mut map = Metadata::with_capacity(pairs);
        for _ in 0..pairs {
            let key = reader.read_string()?;
            let value = reader.read_string()?;
            map.insert(key, value);
        }
        metadata.push(Some(map));
    }

    let bitmap = reader.take(count.div_ceil(8))?;
    let tombstones = VectorStore::tombstones_from_bytes(bitmap, count);

    VectorStore::from_parts(dimension, data, metadata, tombstones)
}
