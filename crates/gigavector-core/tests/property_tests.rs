//! Property-based invariants over the public API.

use gigavector_core::{Database, DistanceKind, EngineConfig, FullTextIndex, IndexKind};
use proptest::prelude::*;

const VOCAB: &[&str] = &[
    "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta", "iota", "kappa",
];

fn doc_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..VOCAB.len(), 1..30)
}

fn render(doc: &[usize]) -> String {
    doc.iter()
        .map(|&w| VOCAB[w])
        .collect::<Vec<_>>()
        .join(" ")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// `search` returns at most `min(k, live_count)` results in
    /// non-decreasing distance order, all of them live rows.
    #[test]
    fn flat_search_is_sorted_and_live(
        vectors in prop::collection::vec(prop::collection::vec(-10.0f32..10.0, 4), 1..40),
        k in 1usize..20,
    ) {
        let db = Database::open(None::<&str>, 4, IndexKind::Flat).unwrap();
        for v in &vectors {
            db.add(v).unwrap();
        }
        // Tombstone every third row.
        let mut live = 0usize;
        for row in 0..vectors.len() as u64 {
            if row % 3 == 2 {
                db.delete(row).unwrap();
            } else {
                live += 1;
            }
        }

        let results = db.search(&[0.0; 4], k, DistanceKind::SquaredEuclidean).unwrap();
        prop_assert_eq!(results.len(), k.min(live));
        for pair in results.windows(2) {
            prop_assert!(pair[0].1 <= pair[1].1);
        }
        for &(row, _) in &results {
            prop_assert!(!db.is_deleted(row).unwrap());
        }
    }

    /// Added data reads back unchanged until updated.
    #[test]
    fn store_roundtrip(
        vectors in prop::collection::vec(prop::collection::vec(-1e6f32..1e6, 8), 1..20),
    ) {
        let db = Database::open(None::<&str>, 8, IndexKind::Flat).unwrap();
        let mut rows = Vec::new();
        for v in &vectors {
            rows.push(db.add(v).unwrap());
        }
        for (row, v) in rows.iter().zip(&vectors) {
            prop_assert_eq!(&db.get(*row).unwrap(), v);
        }
    }

    /// BlockMax-WAND and naive scoring produce identical top-k documents
    /// and scores on any corpus and query.
    #[test]
    fn wand_matches_naive_scoring(
        docs in prop::collection::vec(doc_strategy(), 1..60),
        query in prop::collection::vec(0..VOCAB.len(), 1..4),
        k in 1usize..8,
    ) {
        let mut wand_config = EngineConfig::default().fulltext;
        wand_config.use_blockmax_wand = true;
        wand_config.block_size = 4;
        let mut naive_config = wand_config;
        naive_config.use_blockmax_wand = false;

        let wand = FullTextIndex::new(wand_config);
        let naive = FullTextIndex::new(naive_config);
        for (i, doc) in docs.iter().enumerate() {
            let text = render(doc);
            wand.index_document(i as u64, &text);
            naive.index_document(i as u64, &text);
        }

        let q = render(&query);
        let a = wand.search(&q, k);
        let b = naive.search(&q, k);
        prop_assert_eq!(a.len(), b.len());
        for ((doc_a, score_a), (doc_b, score_b)) in a.iter().zip(&b) {
            prop_assert_eq!(doc_a, doc_b);
            prop_assert!((score_a - score_b).abs() < 1e-5);
        }
    }

    /// Compaction preserves the live row set: every pre-compaction search
    /// hit maps onto the same vector afterwards.
    #[test]
    fn compact_preserves_search_hits(
        vectors in prop::collection::vec(prop::collection::vec(-10.0f32..10.0, 4), 4..30),
    ) {
        let db = Database::open(None::<&str>, 4, IndexKind::Flat).unwrap();
        for v in &vectors {
            db.add(v).unwrap();
        }
        for row in 0..vectors.len() as u64 {
            if row % 4 == 0 {
                db.delete(row).unwrap();
            }
        }
        // Fetch every live row so tie ordering at a cutoff cannot change
        // the returned set; compare canonically sorted data.
        let query = [1.0, -1.0, 0.5, 0.0];
        let canon = |db: &Database| -> Vec<Vec<u32>> {
            let mut hits: Vec<Vec<u32>> = db
                .search(&query, vectors.len(), DistanceKind::SquaredEuclidean)
                .unwrap()
                .into_iter()
                .map(|(row, _)| db.get(row).unwrap().iter().map(|x| x.to_bits()).collect())
                .collect();
            hits.sort();
            hits
        };

        let before = canon(&db);
        db.compact().unwrap();
        let after = canon(&db);
        prop_assert_eq!(before, after);
    }
}
