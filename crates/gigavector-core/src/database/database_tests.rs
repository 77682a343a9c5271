use super::Database;
use crate::config::EngineConfig;
use crate::distance::DistanceKind;
use crate::index::IndexKind;
use crate::pipeline::{PhaseConfig, PhaseKind};
use crate::sparse::SparseVector;

fn memdb(kind: IndexKind) -> Database {
    Database::open(None::<&str>, 4, kind).unwrap()
}

#[test]
fn test_flat_exact_match_scenario() {
    let db = memdb(IndexKind::Flat);
    db.add(&[1.0, 0.0, 0.0, 0.0]).unwrap();
    db.add(&[0.0, 1.0, 0.0, 0.0]).unwrap();
    db.add(&[0.0, 0.0, 1.0, 0.0]).unwrap();

    let results = db
        .search(&[1.0, 0.0, 0.0, 0.0], 1, DistanceKind::SquaredEuclidean)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, 0);
    assert!(results[0].1.abs() < 1e-6);
}

#[test]
fn test_range_search_scenario() {
    let db = memdb(IndexKind::Flat);
    db.add(&[1.0, 0.0, 0.0, 0.0]).unwrap();
    db.add(&[0.0, 1.0, 0.0, 0.0]).unwrap();
    db.add(&[0.0, 0.0, 1.0, 0.0]).unwrap();

    // Squared radius 2.25 covers squared distances {0, 2, 2}.
    let results = db
        .range_search(&[1.0, 0.0, 0.0, 0.0], 2.25, DistanceKind::SquaredEuclidean, 10)
        .unwrap();
    assert_eq!(results.len(), 3);
    let rows: Vec<u64> = results.iter().map(|(r, _)| *r).collect();
    assert_eq!(rows, vec![0, 1, 2]);
    assert!(results[0].1.abs() < 1e-6);
    assert!((results[1].1 - 2.0).abs() < 1e-6);
    assert!((results[2].1 - 2.0).abs() < 1e-6);
}

#[test]
fn test_add_get_update_delete_lifecycle() {
    let db = memdb(IndexKind::Flat);
    let row = db
        .add_with_rich_metadata(&[1.0, 2.0, 3.0, 4.0], &["lang"], &["en"])
        .unwrap();
    assert_eq!(db.get(row).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(
        db.get_metadata(row).unwrap().unwrap().get("lang").unwrap(),
        "en"
    );
    assert!(!db.is_deleted(row).unwrap());

    db.update(row, &[4.0, 3.0, 2.0, 1.0]).unwrap();
    assert_eq!(db.get(row).unwrap(), vec![4.0, 3.0, 2.0, 1.0]);

    db.delete(row).unwrap();
    assert!(db.is_deleted(row).unwrap());
    assert!(db.get(row).is_err());
    assert_eq!(db.count(), 0);
}

#[test]
fn test_rich_metadata_length_mismatch() {
    let db = memdb(IndexKind::Flat);
    let err = db
        .add_with_rich_metadata(&[0.0; 4], &["a", "b"], &["1"])
        .unwrap_err();
    assert_eq!(err.code(), "GV-001");
}

#[test]
fn test_search_filtered_on_metadata() {
    let db = memdb(IndexKind::Flat);
    for i in 0..6u64 {
        let lang = if i % 2 == 0 { "en" } else { "fr" };
        db.add_with_rich_metadata(&[i as f32, 0.0, 0.0, 0.0], &["lang"], &[lang])
            .unwrap();
    }
    let results = db
        .search_filtered(
            &[0.0, 0.0, 0.0, 0.0],
            3,
            DistanceKind::SquaredEuclidean,
            "lang",
            "en",
        )
        .unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|&(row, _)| row % 2 == 0));
}

#[test]
fn test_search_returns_min_k_live_count() {
    let db = memdb(IndexKind::Flat);
    db.add(&[0.0; 4]).unwrap();
    db.add(&[1.0; 4]).unwrap();
    let results = db
        .search(&[0.0; 4], 10, DistanceKind::SquaredEuclidean)
        .unwrap();
    assert_eq!(results.len(), 2);
}

#[test]
fn test_compact_then_search_still_consistent() {
    let db = memdb(IndexKind::Hnsw);
    let mut rows = Vec::new();
    for i in 0..30u64 {
        let v = vec![i as f32, (i * 2) as f32, 0.0, 1.0];
        rows.push(db.add(&v).unwrap());
    }
    db.delete(rows[0]).unwrap();
    db.delete(rows[15]).unwrap();
    db.compact().unwrap();

    assert_eq!(db.count(), 28);
    // Old row 1 is now row 0.
    let results = db
        .search(&[1.0, 2.0, 0.0, 1.0], 1, DistanceKind::SquaredEuclidean)
        .unwrap();
    assert_eq!(results[0].0, 0);
    assert!(results[0].1 < 1e-6);
}

#[test]
fn test_ivf_requires_training() {
    let db = Database::open(None::<&str>, 4, IndexKind::IvfFlat).unwrap();
    assert_eq!(db.add(&[0.0; 4]).unwrap_err().code(), "GV-004");
}

#[test]
fn test_ivf_bootstrap_train_then_insert_and_search() {
    let db = Database::open(None::<&str>, 4, IndexKind::IvfFlat).unwrap();
    // Training on an empty store fails; an explicit sample bootstraps.
    assert_eq!(db.train().unwrap_err().code(), "GV-005");

    let samples: Vec<Vec<f32>> = (0..64)
        .map(|i| vec![(i % 8) as f32, (i / 8) as f32, 0.0, 1.0])
        .collect();
    db.train_with(&samples).unwrap();

    for sample in &samples {
        db.add(sample).unwrap();
    }
    let results = db
        .search(&[3.0, 2.0, 0.0, 1.0], 1, DistanceKind::SquaredEuclidean)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].1 < 1e-6);
}

#[test]
fn test_hybrid_search_combines_scores() {
    let db = memdb(IndexKind::Flat);
    let a = db.add(&[1.0, 0.0, 0.0, 0.0]).unwrap();
    let b = db.add(&[0.0, 1.0, 0.0, 0.0]).unwrap();
    db.index_document(a, "rust systems programming");
    db.index_document(b, "python scripting");

    // Vector query close to row b, text query matching row a: the text
    // side dominates at low vector weight.
    let results = db
        .hybrid_search(&[0.0, 1.0, 0.0, 0.0], "rust programming", 2, 0.1)
        .unwrap();
    assert_eq!(results[0].0, a);

    // And the vector side dominates at high weight.
    let results = db
        .hybrid_search(&[0.0, 1.0, 0.0, 0.0], "rust programming", 2, 0.95)
        .unwrap();
    assert_eq!(results[0].0, b);

    assert!(db.hybrid_search(&[0.0; 4], "x", 2, 1.5).is_err());
    assert!(db.hybrid_search(&[0.0; 4], "x", 0, 0.5).is_err());
}

#[test]
fn test_pipeline_scenario_filter_then_mmr() {
    let db = Database::open_with(
        None::<&str>,
        4,
        IndexKind::Flat,
        DistanceKind::Cosine,
        EngineConfig::default(),
    )
    .unwrap();
    for i in 0..20u64 {
        let angle = i as f32 * 0.1;
        let lang = if i % 2 == 0 { "en" } else { "fr" };
        db.add_with_rich_metadata(
            &[angle.cos(), angle.sin(), 0.0, 0.0],
            &["lang"],
            &[lang],
        )
        .unwrap();
    }

    let phases = vec![
        PhaseConfig {
            kind: PhaseKind::Ann {
                distance: DistanceKind::Cosine,
            },
            output_k: 100,
        },
        PhaseConfig {
            kind: PhaseKind::Filter {
                expr: "lang=en".into(),
            },
            output_k: 100,
        },
        PhaseConfig {
            kind: PhaseKind::RerankMmr { lambda: 0.7 },
            output_k: 10,
        },
    ];
    let (candidates, stats) = db.pipeline_search(&[1.0, 0.0, 0.0, 0.0], phases).unwrap();

    assert!(candidates.len() <= 10);
    assert!(!candidates.is_empty());
    for candidate in &candidates {
        let meta = db.get_metadata(candidate.row).unwrap().unwrap();
        assert_eq!(meta.get("lang").map(String::as_str), Some("en"));
    }
    assert_eq!(stats.len(), 3);
    assert_eq!(stats[1].output_count, 10); // half of the 20 rows
}

#[test]
fn test_sparse_database_roundtrip_through_facade() {
    let db = memdb(IndexKind::Sparse);
    let v = SparseVector::new(vec![0, 2], vec![1.0, 2.0], 4).unwrap();
    let row = db.add_sparse(&v).unwrap();
    assert_eq!(db.get(row).unwrap(), vec![1.0, 0.0, 2.0, 0.0]);

    let query = SparseVector::new(vec![2], vec![1.0], 4).unwrap();
    let results = db.search_sparse(&query, 5).unwrap();
    assert_eq!(results.len(), 1);
    assert!((results[0].1 - 2.0).abs() < 1e-6);

    // Dense adds are sparsified on the way in.
    db.add(&[0.0, 3.0, 0.0, 0.0]).unwrap();
    let query = SparseVector::new(vec![1], vec![1.0], 4).unwrap();
    assert_eq!(db.search_sparse(&query, 5).unwrap().len(), 1);
}

#[test]
fn test_sparse_search_on_dense_index_rejected() {
    let db = memdb(IndexKind::Flat);
    let query = SparseVector::new(vec![0], vec![1.0], 4).unwrap();
    assert_eq!(db.search_sparse(&query, 5).unwrap_err().code(), "GV-001");
}
