use super::store::{Metadata, VectorStore};

fn store_with_rows(rows: &[&[f32]]) -> VectorStore {
    let mut store = VectorStore::new(rows[0].len()).unwrap();
    for row in rows {
        store.add(row).unwrap();
    }
    store
}

#[test]
fn test_add_then_get_roundtrip() {
    let mut store = VectorStore::new(4).unwrap();
    let row = store.add(&[1.0, 2.0, 3.0, 4.0]).unwrap();
    assert_eq!(row, 0);
    assert_eq!(store.row(row).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    assert!(!store.is_deleted(row).unwrap());
}

#[test]
fn test_dimension_mismatch_rejected() {
    let mut store = VectorStore::new(4).unwrap();
    assert!(store.add(&[1.0, 2.0]).is_err());
    store.add(&[0.0; 4]).unwrap();
    assert!(store.update_data(0, &[1.0]).is_err());
}

#[test]
fn test_zero_dimension_rejected() {
    assert!(VectorStore::new(0).is_err());
}

#[test]
fn test_update_data_overwrites() {
    let mut store = store_with_rows(&[&[1.0, 0.0], &[0.0, 1.0]]);
    store.update_data(1, &[5.0, 6.0]).unwrap();
    assert_eq!(store.row(1).unwrap(), &[5.0, 6.0]);
    assert_eq!(store.row(0).unwrap(), &[1.0, 0.0]);
}

#[test]
fn test_metadata_preserves_insertion_order() {
    let mut store = VectorStore::new(2).unwrap();
    let mut meta = Metadata::new();
    meta.insert("zebra".into(), "1".into());
    meta.insert("apple".into(), "2".into());
    let row = store.add_with_metadata(&[0.0, 0.0], meta).unwrap();
    store.set_metadata(row, "mango", "3").unwrap();

    let keys: Vec<&str> = store
        .metadata(row)
        .unwrap()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(keys, vec!["zebra", "apple", "mango"]);
}

#[test]
fn test_set_metadata_overwrites_existing_key_in_place() {
    let mut store = VectorStore::new(2).unwrap();
    let row = store.add(&[0.0, 0.0]).unwrap();
    store.set_metadata(row, "a", "1").unwrap();
    store.set_metadata(row, "b", "2").unwrap();
    store.set_metadata(row, "a", "9").unwrap();

    let meta = store.metadata(row).unwrap().unwrap();
    assert_eq!(meta.get("a").map(String::as_str), Some("9"));
    let keys: Vec<&str> = meta.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["a", "b"]);
}

#[test]
fn test_delete_is_tombstone_not_renumber() {
    let mut store = store_with_rows(&[&[1.0, 0.0], &[0.0, 1.0], &[1.0, 1.0]]);
    store.delete(1).unwrap();

    assert_eq!(store.count(), 3);
    assert_eq!(store.live_count(), 2);
    assert!(store.is_deleted(1).unwrap());
    // Other rows keep their indices.
    assert_eq!(store.row(2).unwrap(), &[1.0, 1.0]);
    // Fetching a tombstoned row explicitly is an error.
    assert!(store.row(1).is_err());
    assert!(store.metadata(1).is_err());
    // Double delete is an error.
    assert!(store.delete(1).is_err());
}

#[test]
fn test_out_of_range_row() {
    let store = store_with_rows(&[&[0.0, 0.0]]);
    assert!(store.row(5).is_err());
    assert!(store.is_deleted(5).is_err());
}

#[test]
fn test_compact_renumbers_and_returns_permutation() {
    let mut store = store_with_rows(&[&[1.0, 0.0], &[0.0, 1.0], &[1.0, 1.0], &[2.0, 2.0]]);
    store.set_metadata(3, "tag", "keep").unwrap();
    store.delete(0).unwrap();
    store.delete(2).unwrap();

    let perm = store.compact();
    assert_eq!(perm.len(), 4);
    assert_eq!(perm.remap(0), None);
    assert_eq!(perm.remap(1), Some(0));
    assert_eq!(perm.remap(2), None);
    assert_eq!(perm.remap(3), Some(1));

    assert_eq!(store.count(), 2);
    assert_eq!(store.live_count(), 2);
    assert_eq!(store.row(0).unwrap(), &[0.0, 1.0]);
    assert_eq!(store.row(1).unwrap(), &[2.0, 2.0]);
    assert_eq!(
        store.metadata(1).unwrap().unwrap().get("tag").unwrap(),
        "keep"
    );
}

#[test]
fn test_iter_live_skips_tombstones() {
    let mut store = store_with_rows(&[&[0.0, 0.0], &[1.0, 1.0], &[2.0, 2.0]]);
    store.delete(1).unwrap();
    let rows: Vec<u64> = store.iter_live().map(|(r, _)| r).collect();
    assert_eq!(rows, vec![0, 2]);
}

#[test]
fn test_tombstone_bitmap_roundtrip() {
    let mut store = VectorStore::new(2).unwrap();
    for _ in 0..10 {
        store.add(&[0.0, 0.0]).unwrap();
    }
    store.delete(0).unwrap();
    store.delete(7).unwrap();
    store.delete(9).unwrap();

    let bytes = store.tombstone_bytes();
    assert_eq!(bytes.len(), 2);
    let restored = VectorStore::tombstones_from_bytes(&bytes, 10);
    assert!(restored.contains(0));
    assert!(restored.contains(7));
    assert!(restored.contains(9));
    assert!(!restored.contains(1));
}
