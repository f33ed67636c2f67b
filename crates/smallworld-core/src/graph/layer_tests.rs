//! Tests for the per-layer adjacency arena.

use super::layer::Layer;

#[test]
fn new_layer_has_empty_lists() {
    let layer = Layer::new(3);
    assert_eq!(layer.slots(), 3);
    assert!(layer.get(0).is_empty());
    assert_eq!(layer.degree(2), 0);
}

#[test]
fn out_of_range_access_is_empty() {
    let layer = Layer::new(2);
    assert!(layer.get(10).is_empty());
    assert_eq!(layer.degree(10), 0);
    assert!(!layer.try_add(10, 0, 8));
    assert!(!layer.remove(10, 0));
}

#[test]
fn try_add_respects_cap() {
    let layer = Layer::new(4);
    assert!(layer.try_add(0, 1, 2));
    assert!(layer.try_add(0, 2, 2));
    assert!(!layer.try_add(0, 3, 2));
    assert_eq!(layer.degree(0), 2);
}

#[test]
fn try_add_deduplicates() {
    let layer = Layer::new(2);
    assert!(layer.try_add(0, 1, 8));
    assert!(!layer.try_add(0, 1, 8));
    assert_eq!(layer.get(0), vec![1]);
}

#[test]
fn remove_reports_membership() {
    let layer = Layer::new(3);
    layer.try_add(0, 1, 8);
    layer.try_add(0, 2, 8);
    assert!(layer.remove(0, 1));
    assert!(!layer.remove(0, 1));
    assert_eq!(layer.get(0), vec![2]);
}

#[test]
fn purge_sweeps_every_list() {
    let layer = Layer::new(4);
    layer.try_add(0, 3, 8);
    layer.try_add(1, 3, 8);
    layer.try_add(2, 1, 8);
    layer.purge(3);
    assert!(layer.get(0).is_empty());
    assert!(layer.get(1).is_empty());
    assert_eq!(layer.get(2), vec![1]);
}

#[test]
fn ensure_capacity_grows_slots() {
    let mut layer = Layer::new(1);
    layer.ensure_capacity(4);
    assert_eq!(layer.slots(), 5);
    assert!(layer.try_add(4, 0, 8));
}

#[test]
fn snapshot_round_trips_through_from_lists() {
    let layer = Layer::new(3);
    layer.try_add(0, 1, 8);
    layer.try_add(1, 0, 8);
    layer.try_add(1, 2, 8);

    let lists = layer.snapshot();
    let rebuilt = Layer::from_lists(lists);
    assert_eq!(rebuilt.get(0), vec![1]);
    assert_eq!(rebuilt.get(1), vec![0, 2]);
    assert!(rebuilt.get(2).is_empty());
}
