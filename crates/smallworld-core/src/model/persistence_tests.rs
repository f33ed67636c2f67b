//! Tests for model save/load in both owned and memory-mapped modes.

use crate::distance::DistanceMetric;
use crate::error::Error;
use crate::graph::{BuildParams, GraphBuilder};
use crate::model::Model;
use std::fs;
use tempfile::tempdir;

fn built_model(n: usize) -> Model {
    let params = BuildParams {
        m: 4,
        max_m0: 8,
        ef_construction: 50,
        n_threads: 2,
        ..BuildParams::default()
    };
    let mut builder = GraphBuilder::with_params(3, DistanceMetric::L2, params);
    for i in 0..n {
        builder
            .add_vector(&[i as f32, (i * 2) as f32, 0.5])
            .unwrap();
    }
    builder.fit().unwrap()
}

fn assert_models_equal(a: &Model, b: &Model) {
    assert_eq!(a.len(), b.len());
    assert_eq!(a.dimension(), b.dimension());
    assert_eq!(a.metric(), b.metric());
    assert_eq!(a.entry_point(), b.entry_point());
    assert_eq!(a.max_level(), b.max_level());
    assert_eq!(a.live_count(), b.live_count());
    for id in 0..a.len() {
        assert_eq!(a.node_level(id), b.node_level(id));
        assert_eq!(a.vector(id), b.vector(id));
        for level in 0..=a.max_level() {
            assert_eq!(a.neighbors(level, id), b.neighbors(level, id));
        }
    }
}

#[test]
fn save_and_load_owned() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.swx");

    let model = built_model(30);
    model.save_to_file(&path).unwrap();

    let loaded = Model::load_from_file(&path, false).unwrap();
    assert!(!loaded.is_mapped());
    assert_models_equal(&model, &loaded);
}

#[test]
fn save_and_load_mmap() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.swx");

    let model = built_model(30);
    model.save_to_file(&path).unwrap();

    let loaded = Model::load_from_file(&path, true).unwrap();
    assert!(loaded.is_mapped());
    assert_models_equal(&model, &loaded);
}

#[test]
fn resave_of_mapped_model_is_identical() {
    let dir = tempdir().unwrap();
    let first = dir.path().join("first.swx");
    let second = dir.path().join("second.swx");

    built_model(25).save_to_file(&first).unwrap();
    let mapped = Model::load_from_file(&first, true).unwrap();
    mapped.save_to_file(&second).unwrap();

    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
}

#[test]
fn tombstones_survive_save_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.swx");

    let mut builder = GraphBuilder::new(3, DistanceMetric::L2);
    for i in 0..10 {
        builder.insert(&[i as f32, 0.0, 0.0]).unwrap();
    }
    builder.delete(4).unwrap();
    let model = builder.build_from_deletion().unwrap();
    model.save_to_file(&path).unwrap();

    for use_mmap in [false, true] {
        let loaded = Model::load_from_file(&path, use_mmap).unwrap();
        assert_eq!(loaded.live_count(), 9);
        assert!(!loaded.is_live(4));
        assert!(loaded.is_live(5));
    }
}

#[test]
fn metric_survives_save_load() {
    let dir = tempdir().unwrap();
    for metric in [
        DistanceMetric::L2,
        DistanceMetric::Angular,
        DistanceMetric::Dot,
    ] {
        let path = dir.path().join(format!("{}.swx", metric.name()));
        let mut builder = GraphBuilder::new(3, metric);
        builder.add_vector(&[1.0, 2.0, 3.0]).unwrap();
        builder.add_vector(&[4.0, 5.0, 6.0]).unwrap();
        builder.fit().unwrap().save_to_file(&path).unwrap();

        let loaded = Model::load_from_file(&path, false).unwrap();
        assert_eq!(loaded.metric(), metric);
    }
}

#[test]
fn load_missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    let err = Model::load_from_file(dir.path().join("absent.swx"), false).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn bad_magic_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.swx");
    built_model(5).save_to_file(&path).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    bytes[0..4].copy_from_slice(b"NOPE");
    fs::write(&path, &bytes).unwrap();

    for use_mmap in [false, true] {
        let err = Model::load_from_file(&path, use_mmap).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "mmap={use_mmap}");
        assert!(!err.is_recoverable());
    }
}

#[test]
fn out_of_range_neighbor_id_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.swx");
    let model = built_model(8);
    assert!(!model.neighbors(0, 0).is_empty());
    model.save_to_file(&path).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    // Adjacency section offset lives at header offset 48; the first neighbor
    // id sits after the layer-0 ids_len word and the (n+1)-entry offset table.
    let adjacency_off =
        u64::from_le_bytes(bytes[48..56].try_into().unwrap()) as usize;
    let first_id_off = adjacency_off + 8 + (8 + 1) * 8;
    bytes[first_id_off..first_id_off + 4].copy_from_slice(&u32::MAX.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    for use_mmap in [false, true] {
        let err = Model::load_from_file(&path, use_mmap).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "mmap={use_mmap}");
    }
}

#[test]
fn unsupported_version_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.swx");
    built_model(5).save_to_file(&path).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    let err = Model::load_from_file(&path, false).unwrap_err();
    assert!(matches!(err, Error::Format(_)));
}

#[test]
fn truncated_file_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.swx");
    built_model(20).save_to_file(&path).unwrap();

    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    let err = Model::load_from_file(&path, false).unwrap_err();
    assert!(matches!(err, Error::Format(_)));
}

#[test]
fn corrupt_entry_point_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.swx");
    built_model(5).save_to_file(&path).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    // Entry-point field at offset 32; point it past the item count.
    bytes[32..40].copy_from_slice(&1000u64.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    let err = Model::load_from_file(&path, false).unwrap_err();
    assert!(matches!(err, Error::Format(_)));
}

#[test]
fn validate_dimension_checks_declared_value() {
    let model = built_model(5);
    assert!(model.validate_dimension(3).is_ok());
    assert!(model.validate_dimension(0).is_ok());
    assert!(matches!(
        model.validate_dimension(7),
        Err(Error::DimensionMismatch {
            expected: 7,
            actual: 3
        })
    ));
}
