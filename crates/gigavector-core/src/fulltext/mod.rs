//! BM25 full-text index with BlockMax-WAND retrieval and phrase search.
//!
//! # Module Organization
//!
//! - `tokenizer`: language-aware splitting, stopword removal, stemming
//! - `stemmer`: Porter stemmer (EN) and suffix tables (DE/FR/ES/IT/PT)
//! - `stopwords`: bundled stopword tables
//! - `postings`: position-aware posting lists with block-max arrays
//! - `wand`: BlockMax-WAND cursors and the top-k loop

mod postings;
mod stemmer;
mod stopwords;
pub mod tokenizer;
mod wand;


pub use postings::Bm25Params;
pub use tokenizer::{Token, Tokenizer};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;

use crate::config::FullTextConfig;
use crate::error::{Error, Result};
use crate::persistence::codec::{self, SectionReader};
use crate::store::Permutation;
use postings::{Posting, TermPostings};
use wand::{blockmax_wand, Cursor, TopK};

/// Magic prefix of the serialized full-text payload.
const FT_MAGIC: &[u8; 7] = b"GV_FT01";
/// Sentinel terminating the doc table.
const DOC_TABLE_END: u64 = u64::MAX;

const FLAG_STEMMING: u32 = 1;
const FLAG_PHRASE: u32 = 1 << 1;
const FLAG_WAND: u32 = 1 << 2;

/// Supported tokenizer languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English (full Porter stemmer).
    #[default]
    English,
    /// German (suffix-stripping tables).
    German,
    /// French (suffix-stripping tables).
    French,
    /// Spanish (suffix-stripping tables).
    Spanish,
    /// Italian (suffix-stripping tables).
    Italian,
    /// Portuguese (suffix-stripping tables).
    Portuguese,
}

impl Language {
    /// Stable numeric tag used by the on-disk format.
    #[must_use]
    pub const fn tag(&self) -> u32 {
        match self {
            Self::English => 0,
            Self::German => 1,
            Self::French => 2,
            Self::Spanish => 3,
            Self::Italian => 4,
            Self::Portuguese => 5,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::English),
            1 => Some(Self::German),
            2 => Some(Self::French),
            3 => Some(Self::Spanish),
            4 => Some(Self::Italian),
            5 => Some(Self::Portuguese),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct DocEntry {
    /// Token length of the document (pre-stopword token count).
    length: u32,
    /// Unique normalized terms, for posting cleanup on removal.
    terms: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    postings: FxHashMap<String, TermPostings>,
    docs: FxHashMap<u64, DocEntry>,
    total_doc_length: u64,
    /// Bumped on every mutation; stale block-max cache entries are
    /// recomputed on first use.
    epoch: u64,
}

/// BM25 inverted index over tokenized documents.
///
/// Thread safety follows the engine-wide discipline: one reader-writer
/// lock over the whole index, shared for queries, exclusive for indexing.
#[derive(Debug)]
pub struct FullTextIndex {
    config: FullTextConfig,
    tokenizer: Tokenizer,
    params: Bm25Params,
    inner: RwLock<Inner>,
    /// term -> (epoch, block maxes); lazily recomputed after mutations.
    block_cache: Mutex<FxHashMap<String, (u64, Arc<Vec<f32>>)>>,
}

impl FullTextIndex {
    /// Creates an empty index with the given configuration.
    #[must_use]
    pub fn new(config: FullTextConfig) -> Self {
        Self {
            config,
            tokenizer: Tokenizer::new(config.language, config.enable_stemming),
            params: Bm25Params::default(),
            inner: RwLock::new(Inner::default()),
            block_cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// The index configuration.
    #[must_use]
    pub fn config(&self) -> &FullTextConfig {
        &self.config
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.inner.read().docs.len()
    }

    /// Number of unique terms.
    #[must_use]
    pub fn term_count(&self) -> usize {
        self.inner.read().postings.len()
    }

    /// Average document token length, or 0.0 for an empty index.
    #[must_use]
    pub fn avg_doc_length(&self) -> f32 {
        let inner = self.inner.read();
        Self::avgdl(&inner)
    }

    fn avgdl(inner: &Inner) -> f32 {
        if inner.docs.is_empty() {
            0.0
        } else {
            inner.total_doc_length as f32 / inner.docs.len() as f32
        }
    }

    /// Indexes (or re-indexes) a document. Empty token streams are ignored.
    pub fn index_document(&self, doc_id: u64, text: &str) {
        let (tokens, doc_length) = self.tokenizer.tokenize_with_length(text);
        if tokens.is_empty() {
            return;
        }

        // Group positions per normalized term.
        let mut grouped: FxHashMap<String, Vec<u32>> = FxHashMap::default();
        for token in tokens {
            grouped.entry(token.term).or_default().push(token.position);
        }

        let mut inner = self.inner.write();
        Self::remove_locked(&mut inner, doc_id);

        let mut terms = Vec::with_capacity(grouped.len());
        for (term, positions) in grouped {
            let tf = positions.len() as u32;
            let positions = if self.config.enable_phrase_match {
                positions
            } else {
                Vec::new()
            };
            inner
                .postings
                .entry(term.clone())
                .or_default()
                .upsert(doc_id, tf, positions);
            terms.push(term);
        }
        inner.docs.insert(
            doc_id,
            DocEntry {
                length: doc_length,
                terms,
            },
        );
        inner.total_doc_length += u64::from(doc_length);
        inner.epoch += 1;
        tracing::debug!(doc_id, doc_length, "document indexed");
    }

    /// Removes a document. Returns true if it was indexed.
    pub fn remove_document(&self, doc_id: u64) -> bool {
        let mut inner = self.inner.write();
        let removed = Self::remove_locked(&mut inner, doc_id);
        if removed {
            inner.epoch += 1;
        }
        removed
    }

    fn remove_locked(inner: &mut Inner, doc_id: u64) -> bool {
        let Some(entry) = inner.docs.remove(&doc_id) else {
            return false;
        };
        for term in &entry.terms {
            if let Some(list) = inner.postings.get_mut(term) {
                list.remove(doc_id);
                if list.df() == 0 {
                    inner.postings.remove(term);
                }
            }
        }
        inner.total_doc_length = inner.total_doc_length.saturating_sub(u64::from(entry.length));
        true
    }

    /// Unique normalized query terms, in first-occurrence order.
    fn query_terms(&self, query: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for token in self.tokenizer.tokenize(query) {
            if !seen.contains(&token.term) {
                seen.push(token.term);
            }
        }
        seen
    }

    /// BM25 top-k search.
    ///
    /// Multi-term queries use BlockMax-WAND when enabled; the naive
    /// term-at-a-time scorer produces identical results and serves as the
    /// fallback.
    #[must_use]
    pub fn search(&self, query: &str, k: usize) -> Vec<(u64, f32)> {
        let terms = self.query_terms(query);
        if terms.is_empty() || k == 0 {
            return Vec::new();
        }
        let inner = self.inner.read();
        if inner.docs.is_empty() {
            return Vec::new();
        }
        if self.config.use_blockmax_wand && terms.len() > 1 {
            self.search_wand(&inner, &terms, k)
        } else {
            self.search_naive(&inner, &terms, k)
        }
    }

    /// Naive term-at-a-time scoring over the union of candidate docs.
    fn search_naive(&self, inner: &Inner, terms: &[String], k: usize) -> Vec<(u64, f32)> {
        let avgdl = Self::avgdl(inner);
        let mut scores: FxHashMap<u64, f32> = FxHashMap::default();
        for term in terms {
            let Some(list) = inner.postings.get(term) else {
                continue;
            };
            let idf = self.params.idf(inner.docs.len(), list.df());
            for posting in &list.postings {
                let doc_len = inner
                    .docs
                    .get(&posting.doc_id)
                    .map_or(0, |d| d.length);
                *scores.entry(posting.doc_id).or_insert(0.0) +=
                    self.params.term_score(idf, posting.tf, doc_len, avgdl);
            }
        }
        let mut top = TopK::new(k);
        for (doc, score) in scores {
            top.push(doc, score);
        }
        top.into_sorted()
    }

    fn search_wand(&self, inner: &Inner, terms: &[String], k: usize) -> Vec<(u64, f32)> {
        let avgdl = Self::avgdl(inner);
        let doc_count = inner.docs.len();
        let mut cursors = Vec::with_capacity(terms.len());
        for term in terms {
            let Some(list) = inner.postings.get(term) else {
                continue;
            };
            let idf = self.params.idf(doc_count, list.df());
            let block_maxes = self.block_maxes_for(inner, term, list, idf, avgdl);
            cursors.push(Cursor::new(
                &list.postings,
                block_maxes,
                self.config.block_size,
                idf,
            ));
        }
        if cursors.is_empty() {
            return Vec::new();
        }
        let docs = &inner.docs;
        blockmax_wand(cursors, k, self.params, avgdl, |doc| {
            docs.get(&doc).map_or(0, |d| d.length)
        })
    }

    /// Returns the cached block-max array for a term, recomputing it when
    /// the corpus changed since it was derived.
    fn block_maxes_for(
        &self,
        inner: &Inner,
        term: &str,
        list: &TermPostings,
        idf: f32,
        avgdl: f32,
    ) -> Arc<Vec<f32>> {
        let mut cache = self.block_cache.lock();
        if let Some((epoch, maxes)) = cache.get(term) {
            if *epoch == inner.epoch {
                return Arc::clone(maxes);
            }
        }
        let maxes = Arc::new(list.compute_block_maxes(
            self.config.block_size,
            self.params,
            idf,
            avgdl,
            |doc| inner.docs.get(&doc).map_or(0, |d| d.length),
        ));
        cache.insert(term.to_string(), (inner.epoch, Arc::clone(&maxes)));
        maxes
    }

    /// Exact phrase search: tokens must appear at adjacent positions
    /// (gaps left by removed stopwords count as matched positions).
    ///
    /// Unknown terms yield an empty result, not an error. Requires
    /// `enable_phrase_match`.
    pub fn phrase_search(&self, phrase: &str, k: usize) -> Result<Vec<(u64, f32)>> {
        if !self.config.enable_phrase_match {
            return Err(Error::InvalidArgument(
                "phrase matching is disabled for this index".into(),
            ));
        }
        let tokens = self.tokenizer.tokenize(phrase);
        if tokens.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let inner = self.inner.read();

        let mut lists = Vec::with_capacity(tokens.len());
        for token in &tokens {
            match inner.postings.get(&token.term) {
                Some(list) => lists.push((token, list)),
                None => return Ok(Vec::new()),
            }
        }

        // The rarest term generates candidates; every other term is
        // checked at its query-relative offset.
        let rarest = lists
            .iter()
            .enumerate()
            .min_by_key(|(_, (_, list))| list.df())
            .map(|(i, _)| i)
            .unwrap_or(0);
        let base_position = lists[rarest].0.position;

        let avgdl = Self::avgdl(&inner);
        let mut top = TopK::new(k);
        'docs: for candidate in &lists[rarest].1.postings {
            let doc_id = candidate.doc_id;
            let mut matched_starts: Vec<u32> = candidate.positions.clone();
            for (token, list) in &lists {
                if token.position == base_position {
                    continue;
                }
                let Some(posting) = list.get(doc_id) else {
                    continue 'docs;
                };
                matched_starts.retain(|&start| {
                    let offset = token.position as i64 - base_position as i64;
                    let want = start as i64 + offset;
                    want >= 0 && posting.positions.binary_search(&(want as u32)).is_ok()
                });
                if matched_starts.is_empty() {
                    continue 'docs;
                }
            }
            // Phrase present: score with summed BM25 across the terms.
            let doc_len = inner.docs.get(&doc_id).map_or(0, |d| d.length);
            let mut score = 0.0;
            for (_, list) in &lists {
                if let Some(posting) = list.get(doc_id) {
                    let idf = self.params.idf(inner.docs.len(), list.df());
                    score += self.params.term_score(idf, posting.tf, doc_len, avgdl);
                }
            }
            top.push(doc_id, score);
        }
        Ok(top.into_sorted())
    }

    /// Remaps doc ids after a store compaction. Docs that were removed by
    /// the compaction are dropped from the index.
    pub fn apply_permutation(&self, perm: &Permutation) {
        let mut inner = self.inner.write();
        let mut postings = FxHashMap::default();
        for (term, list) in inner.postings.drain() {
            let mut remapped = TermPostings::default();
            for posting in list.postings {
                if let Some(new_doc) = perm.remap(posting.doc_id) {
                    remapped.upsert(new_doc, posting.tf, posting.positions);
                }
            }
            if remapped.df() > 0 {
                postings.insert(term, remapped);
            }
        }
        inner.postings = postings;

        let docs: Vec<(u64, DocEntry)> = inner.docs.drain().collect();
        let mut total = 0u64;
        for (doc_id, entry) in docs {
            if let Some(new_doc) = perm.remap(doc_id) {
                total += u64::from(entry.length);
                inner.docs.insert(new_doc, entry);
            }
        }
        inner.total_doc_length = total;
        inner.epoch += 1;
    }

    /// Serializes the index in the `GV_FT01` format.
    pub fn save_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let inner = self.inner.read();
        w.write_all(FT_MAGIC)?;
        let mut flags = 0u32;
        if self.config.enable_stemming {
            flags |= FLAG_STEMMING;
        }
        if self.config.enable_phrase_match {
            flags |= FLAG_PHRASE;
        }
        if self.config.use_blockmax_wand {
            flags |= FLAG_WAND;
        }
        codec::write_u32(w, self.config.language.tag())?;
        codec::write_u32(w, flags)?;
        codec::write_u64(w, self.config.block_size as u64)?;
        codec::write_u64(w, inner.docs.len() as u64)?;
        codec::write_u64(w, inner.postings.len() as u64)?;
        codec::write_u64(w, inner.total_doc_length)?;

        // Doc table, sorted for deterministic output.
        let mut doc_ids: Vec<u64> = inner.docs.keys().copied().collect();
        doc_ids.sort_unstable();
        for doc_id in doc_ids {
            codec::write_u64(w, doc_id)?;
            codec::write_u32(w, inner.docs[&doc_id].length)?;
        }
        codec::write_u64(w, DOC_TABLE_END)?;

        // Posting lists, sorted by term.
        let mut terms: Vec<&String> = inner.postings.keys().collect();
        terms.sort();
        for term in terms {
            let list = &inner.postings[term];
            codec::write_bytes(w, term.as_bytes())?;
            codec::write_u64(w, list.df() as u64)?;
            for posting in &list.postings {
                codec::write_u64(w, posting.doc_id)?;
                codec::write_u32(w, posting.tf)?;
                codec::write_u32(w, posting.positions.len() as u32)?;
                for &p in &posting.positions {
                    codec::write_u32(w, p)?;
                }
            }
        }
        codec::write_u32(w, 0)?;
        Ok(())
    }

    /// Deserializes an index saved by [`Self::save_to`], validating the
    /// posting-order invariants.
    pub(crate) fn load_from(reader: &mut SectionReader<'_>) -> Result<Self> {
        let magic = reader.take(FT_MAGIC.len())?;
        if magic != FT_MAGIC {
            return Err(Error::Corrupted("missing full-text magic".into()));
        }
        let language = Language::from_tag(reader.read_u32()?)
            .ok_or_else(|| Error::Corrupted("unknown language tag".into()))?;
        let flags = reader.read_u32()?;
        let block_size = reader.read_u64()? as usize;
        if block_size == 0 {
            return Err(Error::Corrupted("zero block size".into()));
        }
        let doc_count = reader.read_u64()? as usize;
        let term_count = reader.read_u64()? as usize;
        let total_doc_length = reader.read_u64()?;

        let mut docs: FxHashMap<u64, DocEntry> = FxHashMap::default();
        loop {
            let doc_id = reader.read_u64()?;
            if doc_id == DOC_TABLE_END {
                break;
            }
            let length = reader.read_u32()?;
            docs.insert(
                doc_id,
                DocEntry {
                    length,
                    terms: Vec::new(),
                },
            );
        }
        if docs.len() != doc_count {
            return Err(Error::Corrupted(format!(
                "doc table has {} entries, header says {doc_count}",
                docs.len()
            )));
        }

        let mut postings: FxHashMap<String, TermPostings> = FxHashMap::default();
        loop {
            let term_len = reader.read_u32()? as usize;
            if term_len == 0 {
                break;
            }
            let term = String::from_utf8(reader.take(term_len)?.to_vec())
                .map_err(|_| Error::Corrupted("non-UTF-8 term".into()))?;
            let posting_count = reader.read_u64()? as usize;
            let mut list = TermPostings::default();
            for _ in 0..posting_count {
                let doc_id = reader.read_u64()?;
                let tf = reader.read_u32()?;
                let pos_count = reader.read_u32()? as usize;
                let mut positions = Vec::with_capacity(pos_count);
                for _ in 0..pos_count {
                    positions.push(reader.read_u32()?);
                }
                list.postings.push(Posting {
                    doc_id,
                    tf,
                    positions,
                });
            }
            if !list.check_sorted() {
                return Err(Error::Corrupted(format!(
                    "posting list for '{term}' is not sorted"
                )));
            }
            for posting in &list.postings {
                if let Some(doc) = docs.get_mut(&posting.doc_id) {
                    doc.terms.push(term.clone());
                } else {
                    return Err(Error::Corrupted(format!(
                        "posting for '{term}' references unknown doc {}",
                        posting.doc_id
                    )));
                }
            }
            postings.insert(term, list);
        }
        if postings.len() != term_count {
            return Err(Error::Corrupted(format!(
                "{} posting lists, header says {term_count}",
                postings.len()
            )));
        }

        let config = FullTextConfig {
            language,
            enable_stemming: flags & FLAG_STEMMING != 0,
            enable_phrase_match: flags & FLAG_PHRASE != 0,
            use_blockmax_wand: flags & FLAG_WAND != 0,
            block_size,
        };
        let index = Self::new(config);
        {
            let mut inner = index.inner.write();
            inner.postings = postings;
            inner.docs = docs;
            inner.total_doc_length = total_doc_length;
        }
        Ok(index)
    }
}
