//! Tests for the contiguous vector store.

use crate::error::Error;
use crate::store::VectorStore;

#[test]
fn push_assigns_dense_ids() {
    let mut store = VectorStore::new(3);
    assert_eq!(store.push(&[1.0, 2.0, 3.0]).unwrap(), 0);
    assert_eq!(store.push(&[4.0, 5.0, 6.0]).unwrap(), 1);
    assert_eq!(store.len(), 2);
    assert_eq!(store.live_count(), 2);
}

#[test]
fn get_returns_the_stored_slice() {
    let mut store = VectorStore::new(2);
    store.push(&[1.5, -2.5]).unwrap();
    assert_eq!(store.get(0), Some(&[1.5, -2.5][..]));
    assert_eq!(store.get(1), None);
}

#[test]
fn push_rejects_wrong_dimension() {
    let mut store = VectorStore::new(4);
    let err = store.push(&[1.0, 2.0]).unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 4,
            actual: 2
        }
    ));
    assert!(store.is_empty());
}

#[test]
fn tombstone_keeps_ids_stable() {
    let mut store = VectorStore::new(1);
    store.push(&[1.0]).unwrap();
    store.push(&[2.0]).unwrap();
    store.tombstone(0).unwrap();

    assert_eq!(store.len(), 2);
    assert_eq!(store.live_count(), 1);
    assert!(!store.is_live(0));
    assert!(store.is_live(1));
    // The slot survives tombstoning.
    assert_eq!(store.get(0), Some(&[1.0][..]));
}

#[test]
fn tombstone_unknown_id_fails() {
    let mut store = VectorStore::new(1);
    store.push(&[1.0]).unwrap();
    assert!(matches!(store.tombstone(5), Err(Error::NotFound(5))));
}

#[test]
fn double_tombstone_fails() {
    let mut store = VectorStore::new(1);
    store.push(&[1.0]).unwrap();
    store.tombstone(0).unwrap();
    assert!(matches!(store.tombstone(0), Err(Error::NotFound(0))));
}

#[test]
fn flat_slice_is_fixed_stride() {
    let mut store = VectorStore::new(2);
    store.push(&[1.0, 2.0]).unwrap();
    store.push(&[3.0, 4.0]).unwrap();
    assert_eq!(store.as_flat_slice(), &[1.0, 2.0, 3.0, 4.0]);
}
