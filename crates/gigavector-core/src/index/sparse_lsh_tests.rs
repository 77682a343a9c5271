use super::lsh::LshIndex;
use super::sparse::SparseIndex;
use super::VectorIndex;
use crate::config::LshConfig;
use crate::distance::DistanceKind;
use crate::persistence::codec::SectionReader;
use crate::sparse::SparseVector;
use crate::store::{SharedStore, VectorStore};

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn shared_store(dimension: usize) -> SharedStore {
    Arc::new(RwLock::new(VectorStore::new(dimension).unwrap()))
}

// ============================================================================
// Sparse index
// ============================================================================

#[test]
fn test_sparse_accumulates_partial_dot_products() {
    let store = shared_store(8);
    for _ in 0..3 {
        store.write().add(&[0.0; 8]).unwrap();
    }
    let index = SparseIndex::new(Arc::clone(&store));
    index
        .insert_sparse(0, &SparseVector::new(vec![0, 2], vec![1.0, 2.0], 8).unwrap())
        .unwrap();
    index
        .insert_sparse(1, &SparseVector::new(vec![2, 5], vec![3.0, 1.0], 8).unwrap())
        .unwrap();
    index
        .insert_sparse(2, &SparseVector::new(vec![6], vec![9.0], 8).unwrap())
        .unwrap();

    let query = SparseVector::new(vec![0, 2], vec![1.0, 1.0], 8).unwrap();
    let results = index.search_sparse(&query, 10).unwrap();
    // Row 1 scores 3.0 (term 2), row 0 scores 3.0 (1 + 2); tie broken by row.
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, 0);
    assert!((results[0].1 - 3.0).abs() < 1e-6);
    assert_eq!(results[1].0, 1);
    assert!((results[1].1 - 3.0).abs() < 1e-6);
}

#[test]
fn test_sparse_dense_insert_sparsifies() {
    let store = shared_store(4);
    store.write().add(&[0.0, 2.0, 0.0, 1.0]).unwrap();
    let index = SparseIndex::new(Arc::clone(&store));
    index.insert(0, &[0.0, 2.0, 0.0, 1.0]).unwrap();

    let results = index.search(&[0.0, 1.0, 0.0, 0.0], 5).unwrap();
    assert_eq!(results.len(), 1);
    assert!((results[0].1 - 2.0).abs() < 1e-6);
}

#[test]
fn test_sparse_remove_clears_postings() {
    let store = shared_store(4);
    store.write().add(&[1.0, 0.0, 0.0, 0.0]).unwrap();
    let index = SparseIndex::new(Arc::clone(&store));
    index.insert(0, &[1.0, 0.0, 0.0, 0.0]).unwrap();
    assert!(index.remove(0));
    assert!(!index.remove(0));
    assert!(index.search(&[1.0, 0.0, 0.0, 0.0], 5).unwrap().is_empty());
    assert_eq!(index.len(), 0);
}

#[test]
fn test_sparse_payload_roundtrip() {
    let store = shared_store(8);
    for _ in 0..2 {
        store.write().add(&[0.0; 8]).unwrap();
    }
    let index = SparseIndex::new(Arc::clone(&store));
    index
        .insert_sparse(0, &SparseVector::new(vec![1, 3], vec![0.5, 0.7], 8).unwrap())
        .unwrap();
    index
        .insert_sparse(1, &SparseVector::new(vec![3], vec![0.9], 8).unwrap())
        .unwrap();

    let mut buf = Vec::new();
    index.save_payload(&mut buf).unwrap();
    let mut reader = SectionReader::new(&buf);
    let loaded = SparseIndex::load_payload(Arc::clone(&store), &mut reader).unwrap();

    let query = SparseVector::new(vec![3], vec![1.0], 8).unwrap();
    assert_eq!(
        index.search_sparse(&query, 5).unwrap(),
        loaded.search_sparse(&query, 5).unwrap()
    );
}

#[test]
fn test_sparse_permutation() {
    let store = shared_store(4);
    for _ in 0..3 {
        store.write().add(&[0.0; 4]).unwrap();
    }
    let index = SparseIndex::new(Arc::clone(&store));
    for row in 0..3u64 {
        index
            .insert_sparse(row, &SparseVector::new(vec![row as u32], vec![1.0], 4).unwrap())
            .unwrap();
    }

    store.write().delete(0).unwrap();
    let perm = store.write().compact();
    index.apply_permutation(&perm).unwrap();

    assert_eq!(index.len(), 2);
    let results = index
        .search_sparse(&SparseVector::new(vec![2], vec![1.0], 4).unwrap(), 5)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, 1); // old row 2 renumbered
}

// ============================================================================
// LSH index
// ============================================================================

fn build_lsh(n: usize, dim: usize, seed: u64) -> (SharedStore, LshIndex, Vec<Vec<f32>>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let vectors: Vec<Vec<f32>> = (0..n)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect())
        .collect();
    let store = shared_store(dim);
    let index = LshIndex::new(
        Arc::clone(&store),
        DistanceKind::SquaredEuclidean,
        LshConfig {
            tables: 8,
            hash_bits: 8,
        },
    );
    for v in &vectors {
        let row = store.write().add(v).unwrap();
        index.insert(row, v).unwrap();
    }
    (store, index, vectors)
}

#[test]
fn test_lsh_finds_exact_duplicate() {
    let (_, index, vectors) = build_lsh(200, 16, 4);
    // The query hashes identically to its duplicate in every table.
    let results = index.search(&vectors[50], 1).unwrap();
    assert_eq!(results[0].0, 50);
    assert!(results[0].1 < 1e-6);
}

#[test]
fn test_lsh_deduplicates_bucket_hits() {
    let (_, index, vectors) = build_lsh(100, 8, 9);
    let results = index.search(&vectors[0], 100).unwrap();
    let mut rows: Vec<u64> = results.iter().map(|(r, _)| *r).collect();
    let before = rows.len();
    rows.dedup();
    assert_eq!(before, rows.len());
}

#[test]
fn test_lsh_remove_and_len() {
    let (_, index, vectors) = build_lsh(50, 8, 2);
    assert_eq!(index.len(), 50);
    assert!(index.remove(10));
    assert!(!index.remove(10));
    assert_eq!(index.len(), 49);
    let results = index.search(&vectors[10], 50).unwrap();
    assert!(results.iter().all(|&(row, _)| row != 10));
}

#[test]
fn test_lsh_payload_roundtrip() {
    let (store, index, vectors) = build_lsh(80, 8, 7);
    let mut buf = Vec::new();
    index.save_payload(&mut buf).unwrap();
    let mut reader = SectionReader::new(&buf);
    let loaded = LshIndex::load_payload(
        Arc::clone(&store),
        DistanceKind::SquaredEuclidean,
        LshConfig {
            tables: 8,
            hash_bits: 8,
        },
        &mut reader,
    )
    .unwrap();
    assert_eq!(loaded.len(), 80);
    assert_eq!(
        index.search(&vectors[3], 5).unwrap(),
        loaded.search(&vectors[3], 5).unwrap()
    );
}
