//! Tests for distance metrics.

use crate::distance::DistanceMetric;
use crate::error::Error;

#[test]
fn l2_is_squared_euclidean() {
    let a = [1.0, 2.0, 3.0];
    let b = [4.0, 6.0, 3.0];
    // (3^2 + 4^2 + 0^2) = 25, no square root.
    assert!((DistanceMetric::L2.evaluate(&a, &b) - 25.0).abs() < 1e-6);
}

#[test]
fn l2_identical_vectors_is_zero() {
    let a = [0.5, -0.5, 2.0];
    assert_eq!(DistanceMetric::L2.evaluate(&a, &a), 0.0);
}

#[test]
fn angular_orthogonal_vectors() {
    let a = [1.0, 0.0];
    let b = [0.0, 1.0];
    assert!((DistanceMetric::Angular.evaluate(&a, &b) - 1.0).abs() < 1e-6);
}

#[test]
fn angular_parallel_vectors_is_zero() {
    let a = [2.0, 2.0];
    let b = [4.0, 4.0];
    assert!(DistanceMetric::Angular.evaluate(&a, &b).abs() < 1e-6);
}

#[test]
fn angular_opposite_vectors() {
    let a = [1.0, 0.0];
    let b = [-1.0, 0.0];
    assert!((DistanceMetric::Angular.evaluate(&a, &b) - 2.0).abs() < 1e-6);
}

#[test]
fn angular_zero_norm_yields_sentinel() {
    let zero = [0.0, 0.0];
    let b = [1.0, 0.0];
    assert_eq!(DistanceMetric::Angular.evaluate(&zero, &b), 1.0);
    assert_eq!(DistanceMetric::Angular.evaluate(&b, &zero), 1.0);
    assert_eq!(DistanceMetric::Angular.evaluate(&zero, &zero), 1.0);
}

#[test]
fn dot_negates_inner_product() {
    let a = [1.0, 2.0];
    let b = [3.0, 4.0];
    // Larger inner product means more similar means smaller score.
    assert!((DistanceMetric::Dot.evaluate(&a, &b) - (-11.0)).abs() < 1e-6);
}

#[test]
fn dot_ranks_higher_products_closer() {
    let query = [1.0, 0.0];
    let close = [5.0, 0.0];
    let far = [1.0, 0.0];
    assert!(
        DistanceMetric::Dot.evaluate(&query, &close) < DistanceMetric::Dot.evaluate(&query, &far)
    );
}

#[test]
fn parse_accepts_canonical_and_alias_names() {
    assert_eq!(DistanceMetric::parse("L2").unwrap(), DistanceMetric::L2);
    assert_eq!(
        DistanceMetric::parse("euclidean").unwrap(),
        DistanceMetric::L2
    );
    assert_eq!(
        DistanceMetric::parse("angular").unwrap(),
        DistanceMetric::Angular
    );
    assert_eq!(DistanceMetric::parse("dot").unwrap(), DistanceMetric::Dot);
}

#[test]
fn parse_rejects_unknown_names() {
    let err = DistanceMetric::parse("manhattan").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(err.code(), "SW-001");
}

#[test]
fn metric_codes_round_trip() {
    for metric in [
        DistanceMetric::L2,
        DistanceMetric::Angular,
        DistanceMetric::Dot,
    ] {
        assert_eq!(DistanceMetric::from_code(metric.code()).unwrap(), metric);
    }
}

#[test]
fn unknown_code_is_format_error() {
    let err = DistanceMetric::from_code(7).unwrap_err();
    assert!(matches!(err, Error::Format(_)));
    assert!(!err.is_recoverable());
}

#[test]
#[should_panic(expected = "vector length mismatch")]
fn mismatched_lengths_panic() {
    DistanceMetric::L2.evaluate(&[1.0, 2.0], &[1.0]);
}
