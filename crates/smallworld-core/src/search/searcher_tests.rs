//! Tests for query execution and searcher pooling.

use super::{Searcher, SearcherPool};
use crate::distance::DistanceMetric;
use crate::error::Error;
use crate::graph::{BuildParams, GraphBuilder};
use crate::model::Model;
use roaring::RoaringBitmap;
use std::sync::Arc;

fn small_params() -> BuildParams {
    BuildParams {
        m: 4,
        max_m0: 8,
        ef_construction: 50,
        n_threads: 2,
        ..BuildParams::default()
    }
}

fn clustered_model(n: usize) -> Arc<Model> {
    let mut builder = GraphBuilder::with_params(2, DistanceMetric::L2, small_params());
    for i in 0..n {
        let x = (i % 10) as f32;
        let y = (i / 10) as f32;
        builder.add_vector(&[x, y]).unwrap();
    }
    Arc::new(builder.fit().unwrap())
}

fn empty_model() -> Arc<Model> {
    Arc::new(Model::from_parts(
        DistanceMetric::L2,
        2,
        None,
        Vec::new(),
        vec![Vec::new()],
        RoaringBitmap::new(),
        Vec::new(),
    ))
}

#[test]
fn finds_the_exact_stored_point_first() {
    let model = clustered_model(100);
    let mut searcher = Searcher::new(Arc::clone(&model));

    for &id in &[0usize, 37, 55, 99] {
        let query = model.vector(id).to_vec();
        let hits = searcher.search(&query, 1, 50, false).unwrap();
        assert_eq!(hits[0].id, id);
        assert_eq!(hits[0].distance, 0.0);
    }
}

#[test]
fn results_are_sorted_by_distance() {
    let model = clustered_model(100);
    let mut searcher = Searcher::new(model);

    let hits = searcher.search(&[4.5, 4.5], 10, 80, false).unwrap();
    assert_eq!(hits.len(), 10);
    for pair in hits.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[test]
fn k_zero_returns_empty() {
    let model = clustered_model(10);
    let mut searcher = Searcher::new(model);
    assert!(searcher.search(&[0.0, 0.0], 0, 50, false).unwrap().is_empty());
}

#[test]
fn empty_model_returns_empty() {
    let mut searcher = Searcher::new(empty_model());
    assert!(searcher.search(&[0.0, 0.0], 5, 50, false).unwrap().is_empty());
    assert!(searcher.search(&[0.0, 0.0], 5, 50, true).unwrap().is_empty());
}

#[test]
fn wrong_query_dimension_fails() {
    let model = clustered_model(10);
    let mut searcher = Searcher::new(model);
    let err = searcher.search(&[0.0, 0.0, 0.0], 5, 50, false).unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 2,
            actual: 3
        }
    ));
}

#[test]
fn k_larger_than_live_returns_all_live() {
    let model = clustered_model(5);
    let mut searcher = Searcher::new(model);
    let hits = searcher.search(&[0.0, 0.0], 50, 50, false).unwrap();
    assert_eq!(hits.len(), 5);
    // ensure_k must not error either: there are simply fewer than k items.
    let hits = searcher.search(&[0.0, 0.0], 50, 50, true).unwrap();
    assert_eq!(hits.len(), 5);
}

#[test]
fn ensure_k_covers_unreachable_components_when_k_exceeds_live() {
    // Nodes 0 and 1 link each other; nodes 2 and 3 are stranded with no
    // edges, so plain traversal from the entry point can never see them.
    let model = Arc::new(Model::from_parts(
        DistanceMetric::L2,
        1,
        Some(0),
        vec![0, 0, 0, 0],
        vec![vec![vec![1], vec![0], vec![], vec![]]],
        RoaringBitmap::new(),
        vec![0.0, 1.0, 10.0, 11.0],
    ));
    let mut searcher = Searcher::new(Arc::clone(&model));

    let hits = searcher.search(&[0.0], 10, 4, true).unwrap();
    assert_eq!(hits.len(), 4);
    assert_eq!(
        hits.iter().map(|n| n.id).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    for pair in hits.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[test]
fn deleted_items_never_surface() {
    let mut builder = GraphBuilder::with_params(2, DistanceMetric::L2, small_params());
    for i in 0..30 {
        builder.insert(&[i as f32, 0.0]).unwrap();
    }
    builder.delete(10).unwrap();
    let model = Arc::new(builder.build_from_deletion().unwrap());

    let mut searcher = Searcher::new(model);
    let hits = searcher.search(&[10.0, 0.0], 29, 60, false).unwrap();
    assert!(hits.iter().all(|n| n.id != 10));
}

#[test]
fn ensure_k_returns_exactly_k() {
    let model = clustered_model(80);
    let mut searcher = Searcher::new(model);
    // A deliberately narrow frontier still has to produce k hits.
    let hits = searcher.search(&[3.0, 3.0], 20, 1, true).unwrap();
    assert_eq!(hits.len(), 20);
}

#[test]
fn larger_ef_never_hurts_recall_of_the_true_nearest() {
    let model = clustered_model(100);
    let mut searcher = Searcher::new(Arc::clone(&model));
    let query = [5.2, 5.2];

    let narrow = searcher.search(&query, 5, 10, false).unwrap();
    let wide = searcher.search(&query, 5, 100, false).unwrap();
    assert!(wide[0].distance <= narrow[0].distance);
}

#[test]
fn search_by_id_excludes_the_item_itself() {
    let model = clustered_model(50);
    let mut searcher = Searcher::new(model);

    let hits = searcher.search_by_id(12, 5, 60, false).unwrap();
    assert_eq!(hits.len(), 5);
    assert!(hits.iter().all(|n| n.id != 12));
}

#[test]
fn search_by_id_unknown_or_deleted_fails() {
    let mut builder = GraphBuilder::with_params(2, DistanceMetric::L2, small_params());
    for i in 0..10 {
        builder.insert(&[i as f32, 0.0]).unwrap();
    }
    builder.delete(3).unwrap();
    let model = Arc::new(builder.build_from_deletion().unwrap());
    let mut searcher = Searcher::new(model);

    assert!(matches!(
        searcher.search_by_id(3, 2, 50, false),
        Err(Error::NotFound(3))
    ));
    assert!(matches!(
        searcher.search_by_id(99, 2, 50, false),
        Err(Error::NotFound(99))
    ));
}

#[test]
fn dot_metric_prefers_large_inner_products() {
    let mut builder = GraphBuilder::with_params(2, DistanceMetric::Dot, small_params());
    builder.add_vector(&[1.0, 0.0]).unwrap();
    builder.add_vector(&[10.0, 0.0]).unwrap();
    builder.add_vector(&[0.0, 1.0]).unwrap();
    let model = Arc::new(builder.fit().unwrap());

    let mut searcher = Searcher::new(model);
    let hits = searcher.search(&[1.0, 0.0], 1, 50, false).unwrap();
    assert_eq!(hits[0].id, 1);
}

#[test]
fn pool_hands_out_and_reclaims_searchers() {
    let model = clustered_model(20);
    let pool = SearcherPool::new(model, 2);

    let mut first = pool.acquire();
    let _second = pool.acquire();
    assert!(pool.try_acquire().is_none());

    let hits = first.search(&[1.0, 1.0], 3, 50, false).unwrap();
    assert_eq!(hits.len(), 3);

    drop(first);
    assert!(pool.try_acquire().is_some());
}

#[test]
fn pool_guards_work_across_threads() {
    let model = clustered_model(50);
    let pool = Arc::new(SearcherPool::new(model, 4));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                let mut searcher = pool.acquire();
                let hits = searcher
                    .search(&[(i % 10) as f32, 0.0], 3, 50, false)
                    .unwrap();
                assert!(!hits.is_empty());
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}
