use super::HnswIndex;
use crate::config::{FlatConfig, HnswConfig};
use crate::distance::DistanceKind;
use crate::index::flat::FlatIndex;
use crate::index::VectorIndex;
use crate::persistence::codec::SectionReader;
use crate::store::{SharedStore, VectorStore};

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn shared_store(dimension: usize) -> SharedStore {
    Arc::new(RwLock::new(VectorStore::new(dimension).unwrap()))
}

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>()).collect())
        .collect()
}

fn build_index(
    store: &SharedStore,
    vectors: &[Vec<f32>],
    metric: DistanceKind,
    config: HnswConfig,
) -> HnswIndex {
    let index = HnswIndex::new(Arc::clone(store), metric, config);
    for vector in vectors {
        let row = store.write().add(vector).unwrap();
        index.insert(row, vector).unwrap();
    }
    index
}

#[test]
fn test_search_returns_inserted_vector_exactly() {
    let store = shared_store(64);
    let vectors = random_vectors(1000, 64, 42);
    let index = build_index(
        &store,
        &vectors,
        DistanceKind::SquaredEuclidean,
        HnswConfig::default(),
    );

    for probe in [0usize, 137, 512, 999] {
        let results = index.search(&vectors[probe], 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, probe as u64);
        assert!(results[0].1 <= 1e-5, "distance {} too large", results[0].1);
    }
}

#[test]
fn test_results_are_sorted_ascending() {
    let store = shared_store(16);
    let vectors = random_vectors(300, 16, 7);
    let index = build_index(
        &store,
        &vectors,
        DistanceKind::SquaredEuclidean,
        HnswConfig::default(),
    );

    let results = index.search(&vectors[3], 10).unwrap();
    assert_eq!(results.len(), 10);
    for pair in results.windows(2) {
        assert!(pair[0].1 <= pair[1].1);
    }
}

#[test]
fn test_recall_against_flat_baseline() {
    let dim = 32;
    let store = shared_store(dim);
    let vectors = random_vectors(600, dim, 99);
    let config = HnswConfig {
        m: 16,
        ef_construction: 200,
        ef_search: 128,
    };
    let index = build_index(&store, &vectors, DistanceKind::SquaredEuclidean, config);
    let flat = FlatIndex::new(
        Arc::clone(&store),
        DistanceKind::SquaredEuclidean,
        FlatConfig::default(),
    );

    let queries = random_vectors(20, dim, 1234);
    let k = 10;
    let mut hits = 0usize;
    let mut total = 0usize;
    for query in &queries {
        let exact: Vec<u64> = flat
            .search(query, k)
            .unwrap()
            .into_iter()
            .map(|(row, _)| row)
            .collect();
        let approx: Vec<u64> = index
            .search(query, k)
            .unwrap()
            .into_iter()
            .map(|(row, _)| row)
            .collect();
        total += exact.len();
        hits += exact.iter().filter(|row| approx.contains(row)).count();
    }
    let recall = hits as f64 / total as f64;
    assert!(recall >= 0.95, "recall {recall} below 0.95");
}

#[test]
fn test_cosine_metric_search() {
    let store = shared_store(8);
    let vectors = random_vectors(200, 8, 5);
    let index = build_index(&store, &vectors, DistanceKind::Cosine, HnswConfig::default());

    let results = index.search(&vectors[17], 1).unwrap();
    assert_eq!(results[0].0, 17);
    assert!(results[0].1 < 1e-5);
}

#[test]
fn test_tombstoned_rows_are_skipped_in_results() {
    let store = shared_store(4);
    let vectors = vec![
        vec![1.0, 0.0, 0.0, 0.0],
        vec![0.9, 0.1, 0.0, 0.0],
        vec![0.0, 1.0, 0.0, 0.0],
    ];
    let index = build_index(
        &store,
        &vectors,
        DistanceKind::SquaredEuclidean,
        HnswConfig::default(),
    );

    store.write().delete(0).unwrap();
    let results = index.search(&[1.0, 0.0, 0.0, 0.0], 2).unwrap();
    let rows: Vec<u64> = results.iter().map(|(row, _)| *row).collect();
    assert!(!rows.contains(&0));
    assert_eq!(rows[0], 1);
}

#[test]
fn test_dimension_mismatch_rejected() {
    let store = shared_store(8);
    let index = HnswIndex::new(store, DistanceKind::SquaredEuclidean, HnswConfig::default());
    assert!(index.insert(0, &[1.0, 2.0]).is_err());
    assert!(index.search(&[1.0, 2.0], 1).is_err());
}

#[test]
fn test_apply_permutation_after_compact() {
    let store = shared_store(4);
    let vectors = random_vectors(50, 4, 11);
    let index = build_index(
        &store,
        &vectors,
        DistanceKind::SquaredEuclidean,
        HnswConfig::default(),
    );

    for row in [0u64, 10, 20, 30, 40] {
        store.write().delete(row).unwrap();
    }
    let perm = store.write().compact();
    index.apply_permutation(&perm).unwrap();

    // Row 5 moved to index 4 (one earlier deletion below it).
    let results = index.search(&vectors[5], 1).unwrap();
    assert_eq!(results[0].0, 4);
    assert!(results[0].1 <= 1e-5);
}

#[test]
fn test_save_load_payload_roundtrip() {
    let store = shared_store(16);
    let vectors = random_vectors(120, 16, 3);
    let index = build_index(
        &store,
        &vectors,
        DistanceKind::SquaredEuclidean,
        HnswConfig::default(),
    );

    let mut buf = Vec::new();
    index.save_payload(&mut buf).unwrap();
    let mut reader = SectionReader::new(&buf);
    let loaded =
        HnswIndex::load_payload(Arc::clone(&store), DistanceKind::SquaredEuclidean, &mut reader)
            .unwrap();

    let query = &vectors[33];
    assert_eq!(
        index.search(query, 5).unwrap(),
        loaded.search(query, 5).unwrap()
    );
}

#[test]
fn test_load_rejects_corrupted_level() {
    let store = shared_store(4);
    let mut buf = Vec::new();
    // M, efC, efS, entry, count=1, then a row with an absurd level.
    for v in [16u32, 200, 64] {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(&1u64.to_le_bytes());
    buf.push(200);
    let mut reader = SectionReader::new(&buf);
    let err = HnswIndex::load_payload(store, DistanceKind::SquaredEuclidean, &mut reader)
        .unwrap_err();
    assert_eq!(err.code(), "GV-006");
}
