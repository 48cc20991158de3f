//! End-to-end tests for the dynamic overlay.
//!
//! Exercises the full cycle over real files: insert -> search -> remove ->
//! threshold-triggered merge -> search across both sub-indices.

mod common;

use freshann::{DynamicDiskIndex, IndexConfig, MemBudget};
use std::path::Path;
use tempfile::TempDir;

/// Well-separated deterministic vectors: distinct points on a jittered line.
fn test_vector(i: u32, d: usize) -> Vec<f32> {
    (0..d).map(|j| i as f32 * 5.0 + j as f32 * 0.1).collect()
}

fn small_config(d: usize) -> IndexConfig {
    let mut config = IndexConfig::new(d).unwrap();
    config.max_degree = 16;
    config.build_beam_width = 50;
    config.search_beam_width = 50;
    config
}

fn open_index(dir: &Path, threshold: usize) -> DynamicDiskIndex<f32> {
    common::init_tracing();
    DynamicDiskIndex::open(
        small_config(8),
        dir.join("base.bin"),
        dir.join("ann"),
        MemBudget::Points(threshold),
    )
    .unwrap()
}

#[test]
fn round_trip_insert() {
    let dir = TempDir::new().unwrap();
    let index = open_index(dir.path(), 100);

    let v = test_vector(7, 8);
    index.insert(&v, 42).unwrap();

    let out = index.search(&v, 1, 20).unwrap();
    assert_eq!(out.indices[0], 42);
    assert_eq!(out.distances[0], 0.0);
}

#[test]
fn delete_then_query() {
    let dir = TempDir::new().unwrap();
    let index = open_index(dir.path(), 100);

    let v = test_vector(7, 8);
    index.insert(&v, 42).unwrap();
    index.insert(&test_vector(8, 8), 43).unwrap();
    index.remove(42).unwrap();

    let out = index.search(&v, 1, 20).unwrap();
    assert_ne!(out.indices[0], 42);
}

#[test]
fn search_pads_unused_slots() {
    let dir = TempDir::new().unwrap();
    let index = open_index(dir.path(), 100);
    index.insert(&test_vector(1, 8), 1).unwrap();

    let out = index.search(&test_vector(1, 8), 4, 20).unwrap();
    assert_eq!(out.indices.len(), 4);
    assert_eq!(out.indices[0], 1);
    assert_eq!(&out.indices[1..], &[0, 0, 0]);
    assert!(out.distances[1..].iter().all(|&d| d == f32::MAX));
}

#[test]
fn repeated_searches_are_deterministic() {
    let dir = TempDir::new().unwrap();
    let index = open_index(dir.path(), 100);
    for i in 0..30 {
        index.insert(&test_vector(i, 8), 500 + i).unwrap();
    }

    let query = test_vector(11, 8);
    let a = index.search(&query, 5, 30).unwrap();
    let b = index.search(&query, 5, 30).unwrap();
    assert_eq!(a.indices, b.indices);
    assert_eq!(a.distances, b.distances);
}

#[test]
fn threshold_triggered_merge() {
    let dir = TempDir::new().unwrap();
    let index = open_index(dir.path(), 50);

    for i in 0..55u32 {
        index.insert(&test_vector(i, 8), 1000 + i).unwrap();
    }

    assert!(index.disk_points() >= 50, "merge did not reach disk");
    assert!(index.mem_points() <= 5);

    let mut recalled = 0;
    for i in 0..55u32 {
        let out = index.search(&test_vector(i, 8), 1, 50).unwrap();
        if out.indices[0] == (1000 + i) as u64 {
            recalled += 1;
        }
    }
    assert!(recalled * 100 >= 55 * 95, "recall {recalled}/55 below 95%");
}

#[test]
fn deletes_persist_across_merges() {
    let dir = TempDir::new().unwrap();
    let index = open_index(dir.path(), 50);

    for i in 0..55u32 {
        index.insert(&test_vector(i, 8), 1000 + i).unwrap();
    }
    for label in 1000..1010u32 {
        index.remove(label).unwrap();
    }
    // Force another merge with fresh labels.
    for i in 0..50u32 {
        index.insert(&test_vector(100 + i, 8), 2000 + i).unwrap();
    }

    // None of the removed labels ever comes back, from any query angle.
    for i in 0..10u32 {
        let out = index.search(&test_vector(i, 8), 3, 50).unwrap();
        for &idx in &out.indices {
            assert!(
                !(1000u64..1010).contains(&idx),
                "deleted label {idx} returned"
            );
        }
    }

    // The survivors stay recoverable.
    let mut recalled = 0;
    let mut live = Vec::new();
    live.extend((10..55u32).map(|i| (test_vector(i, 8), 1000 + i)));
    live.extend((0..50u32).map(|i| (test_vector(100 + i, 8), 2000 + i)));
    for (query, label) in &live {
        let out = index.search(query, 1, 50).unwrap();
        if out.indices[0] == *label as u64 {
            recalled += 1;
        }
    }
    assert!(
        recalled * 100 >= live.len() * 95,
        "recall {recalled}/{} below 95%",
        live.len()
    );
}

#[test]
fn reinsertion_resurrects_with_new_vector() {
    let dir = TempDir::new().unwrap();
    let index = open_index(dir.path(), 100);

    let v = test_vector(7, 8);
    let v_new = test_vector(70, 8);
    index.insert(&v, 42).unwrap();
    index.insert(&test_vector(8, 8), 43).unwrap();
    index.remove(42).unwrap();
    index.insert(&v_new, 42).unwrap();

    let out = index.search(&v_new, 1, 20).unwrap();
    assert_eq!(out.indices[0], 42);
    assert_eq!(out.distances[0], 0.0);

    // The old vector's neighborhood no longer answers to 42.
    let out = index.search(&v, 1, 20).unwrap();
    assert_ne!(out.indices[0], 42);
}

#[test]
fn reinsertion_shadowing_survives_a_merge() {
    let dir = TempDir::new().unwrap();
    let index = open_index(dir.path(), 100);

    let v = test_vector(7, 8);
    let v_new = test_vector(70, 8);
    for i in 0..20u32 {
        index.insert(&test_vector(i, 8), 300 + i).unwrap();
    }
    index.insert(&v, 42).unwrap();
    index.merge().unwrap(); // 42 -> disk with the old vector

    index.remove(42).unwrap();
    index.insert(&v_new, 42).unwrap();
    index.merge().unwrap(); // both copies now on disk; the new one owns 42

    let out = index.search(&v_new, 1, 50).unwrap();
    assert_eq!(out.indices[0], 42);
    assert_eq!(out.distances[0], 0.0);

    // Querying at the old vector must not surface the stale copy.
    let out = index.search(&v, 3, 50).unwrap();
    for (slot, &idx) in out.indices.iter().enumerate() {
        if idx == 42 {
            assert!(out.distances[slot] > 1.0, "stale copy of 42 surfaced");
        }
    }
}

#[test]
fn budget_driven_sizing() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let config = small_config(8);
    let index: DynamicDiskIndex<f32> = DynamicDiskIndex::open(
        config.clone(),
        dir.path().join("base.bin"),
        dir.path().join("ann"),
        MemBudget::RamGb(5e-5),
    )
    .unwrap();

    let budget_bytes = 5e-5 * (1u64 << 30) as f64;
    let cap = budget_bytes * 0.2 / freshann::config::per_point_bytes::<f32>(8, config.max_degree);
    assert!(index.mem_threshold() >= 1);
    assert!(index.mem_threshold() as f64 <= cap);

    for i in 0..100u32 {
        index.insert(&test_vector(i, 8), i).unwrap();
    }
    let out = index.search(&test_vector(50, 8), 1, 50).unwrap();
    assert_eq!(out.indices[0], 50);
}

#[test]
fn i8_and_u8_instantiations() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let config = small_config(8);

    let index: DynamicDiskIndex<i8> = DynamicDiskIndex::open(
        config.clone(),
        dir.path().join("base_i8.bin"),
        dir.path().join("ann_i8"),
        MemBudget::Points(100),
    )
    .unwrap();
    let v: Vec<i8> = (0..8).map(|j| (j * 3 - 12) as i8).collect();
    index.insert(&v, 5).unwrap();
    let out = index.search(&v, 1, 20).unwrap();
    assert_eq!(out.indices[0], 5);

    let index: DynamicDiskIndex<u8> = DynamicDiskIndex::open(
        config,
        dir.path().join("base_u8.bin"),
        dir.path().join("ann_u8"),
        MemBudget::Points(100),
    )
    .unwrap();
    let v: Vec<u8> = (0..8).map(|j| j * 10).collect();
    index.insert(&v, 6).unwrap();
    index.insert(&vec![200u8; 8], 7).unwrap();
    let out = index.search(&v, 1, 20).unwrap();
    assert_eq!(out.indices[0], 6);
}

#[test]
fn dimension_mismatch_is_rejected() {
    let dir = TempDir::new().unwrap();
    let index = open_index(dir.path(), 100);

    assert!(index.insert(&[1.0f32; 4], 1).is_err());
    assert!(index.search(&[1.0f32; 4], 1, 20).is_err());
}

#[test]
fn concurrent_searches_during_inserts() {
    let dir = TempDir::new().unwrap();
    let index = std::sync::Arc::new(open_index(dir.path(), 40));
    for i in 0..30u32 {
        index.insert(&test_vector(i, 8), i).unwrap();
    }

    let readers: Vec<_> = (0..4u32)
        .map(|t| {
            let index = index.clone();
            std::thread::spawn(move || {
                for i in 0..50u32 {
                    let q = test_vector((t * 7 + i) % 30, 8);
                    let out = index.search(&q, 3, 30).unwrap();
                    assert_eq!(out.indices.len(), 3);
                }
            })
        })
        .collect();

    // Writer crosses the merge threshold while readers run.
    for i in 30..60u32 {
        index.insert(&test_vector(i, 8), i).unwrap();
    }
    for handle in readers {
        handle.join().unwrap();
    }

    assert!(index.disk_points() >= 40);
}
