//! End-to-end tests across both index tiers: insert/search/delete flows on
//! the proximity graph, cluster routing with splits, quantized storage, and
//! snapshot round-trips including legacy migration.

use std::collections::BTreeSet;

use proptest::prelude::*;
use serde_json::json;

use annex::{
    ClusterRouter, DistanceMetric, HnswConfig, HnswIndex, RouterConfig, VectorError,
};

fn graph(m: usize) -> HnswIndex {
    HnswIndex::new(HnswConfig {
        m,
        ef_construction: 200,
        ef_search: 32,
        metric: DistanceMetric::Cosine,
    })
    .unwrap()
}

/// Deterministic pseudo-random points without pulling the crate's internal
/// RNG into the public surface.
fn pseudo_points(n: usize, dim: usize, seed: u64) -> Vec<(i64, Vec<f32>)> {
    let mut state = seed;
    let mut next = move || {
        state = state.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    };
    (0..n)
        .map(|i| {
            let v: Vec<f32> = (0..dim)
                .map(|_| (next() >> 11) as f32 / (1u64 << 53) as f32 - 0.5)
                .collect();
            (i as i64, v)
        })
        .collect()
}

// ============================================================================
// Graph tier
// ============================================================================

#[test]
fn graph_ranks_nearest_first() {
    let mut index = graph(4);
    index.insert(0, vec![1.0, 0.0]).unwrap();
    index.insert(1, vec![0.0, 1.0]).unwrap();
    index.insert(2, vec![0.9, 0.1]).unwrap();

    let hits = index.search(&[1.0, 0.0], 1, None).unwrap();
    assert_eq!(hits[0].id, 0);
    assert!((hits[0].score - 1.0).abs() < 1e-6);

    let hits = index.search(&[1.0, 0.0], 2, None).unwrap();
    assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![0, 2]);
}

#[test]
fn graph_search_on_empty_index_is_empty() {
    let index = graph(4);
    assert!(index.search(&[1.0, 0.0], 3, None).unwrap().is_empty());
}

#[test]
fn graph_self_retrieval_after_bulk_build() {
    let points = pseudo_points(120, 12, 7);
    let mut index = graph(16);
    index.build_index(points.clone()).unwrap();
    for (id, v) in &points {
        let hits = index.search(v, 1, None).unwrap();
        assert_eq!(hits[0].id, *id);
    }
}

#[test]
fn graph_delete_then_prune_flow() {
    let points = pseudo_points(50, 8, 3);
    let mut index = graph(8);
    index.build_index(points).unwrap();

    for id in [0, 10, 20, 30] {
        index.delete_point(id).unwrap();
    }
    assert_eq!(index.len(), 46);
    assert_eq!(index.tombstone_count(), 4);
    let hits = index.search(&vec![0.1; 8], 50, None).unwrap();
    assert!(hits.iter().all(|h| ![0, 10, 20, 30].contains(&h.id)));

    assert_eq!(index.prune_deleted_nodes(), 4);
    assert_eq!(index.node_count(), 46);
    // Search still works over the compacted graph.
    let hits = index.search(&vec![0.1; 8], 5, None).unwrap();
    assert_eq!(hits.len(), 5);
}

#[test]
fn graph_snapshot_round_trip_preserves_results() {
    let points = pseudo_points(40, 6, 21);
    let mut index = graph(8);
    index.build_index(points).unwrap();
    index.delete_point(5).unwrap();

    let json = index.to_json().unwrap();
    let restored = HnswIndex::from_json(&json).unwrap();

    assert_eq!(restored.len(), index.len());
    assert_eq!(restored.tombstone_count(), 1);
    for seed in 0..5u64 {
        let (_, q) = &pseudo_points(1, 6, 100 + seed)[0];
        let a = index.search(q, 10, None).unwrap();
        let b = restored.search(q, 10, None).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.id, y.id);
            assert!((x.score - y.score).abs() < 1e-6);
        }
    }
}

#[test]
fn graph_legacy_snapshot_loads_and_searches() {
    let legacy = json!({
        "dimension": 2,
        "entry_point": 0,
        "level_max": 0,
        "nodes": [
            {"id": 0, "level": 0, "vector": [1.0, 0.0], "neighbors": [[1, 2, -1]]},
            {"id": 1, "level": 0, "vector": [0.0, 1.0], "neighbors": [[0, -1, -1]]},
            {"id": 2, "level": 0, "vector": [0.8, 0.2], "neighbors": [[0, 1, -1]]},
        ]
    });
    let index = HnswIndex::from_json(&legacy.to_string()).unwrap();
    assert_eq!(index.len(), 3);
    let hits = index.search(&[1.0, 0.0], 2, None).unwrap();
    assert_eq!(hits[0].id, 0);
    assert_eq!(hits[1].id, 2);
    // Re-serializing produces the current envelope.
    let round = index.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&round).unwrap();
    assert!(value["metadata"]["version"].is_u64());
}

// ============================================================================
// Router tier
// ============================================================================

fn two_group_points() -> Vec<(String, Vec<f32>)> {
    vec![
        ("x0".into(), vec![1.0, 0.0, 0.0]),
        ("x1".into(), vec![0.95, 0.05, 0.0]),
        ("x2".into(), vec![0.9, 0.1, 0.0]),
        ("x3".into(), vec![0.85, 0.15, 0.0]),
        ("y0".into(), vec![0.0, 1.0, 0.0]),
        ("y1".into(), vec![0.0, 0.95, 0.05]),
        ("y2".into(), vec![0.05, 0.9, 0.05]),
    ]
}

#[test]
fn router_requires_build_before_search() {
    let router = ClusterRouter::new(RouterConfig::default()).unwrap();
    assert!(matches!(
        router.search(&[1.0, 0.0, 0.0], 1),
        Err(VectorError::BuildRequired)
    ));
}

#[test]
fn router_routes_to_correct_group() {
    let mut router = ClusterRouter::new(RouterConfig {
        num_clusters: 2,
        ..Default::default()
    })
    .unwrap();
    router.build_index(two_group_points()).unwrap();

    let hits = router.search(&[1.0, 0.0, 0.0], 3).unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|h| h.id.starts_with('x')));
    assert_eq!(hits[0].id, "x0");

    let hits = router.search(&[0.0, 1.0, 0.0], 2).unwrap();
    assert!(hits.iter().all(|h| h.id.starts_with('y')));
}

#[test]
fn router_upsert_past_capacity_splits_cluster() {
    let mut router = ClusterRouter::new(RouterConfig {
        num_clusters: 2,
        max_cluster_size: 3,
        ..Default::default()
    })
    .unwrap();
    router.build_index(two_group_points()).unwrap();
    assert_eq!(router.cluster_count(), 2);
    // The x-group cluster holds 4 members; one more pushes it to 5 and
    // forces a split.
    router.upsert("x4", vec![0.92, 0.08, 0.0], None).unwrap();

    assert_eq!(router.len(), 8);
    assert_eq!(router.cluster_count(), 3);
    let mut seen = BTreeSet::new();
    for centroid in router.clusters() {
        seen.insert(centroid.id);
    }
    // Every record maps into one of the live clusters.
    for id in ["x0", "x1", "x2", "x3", "x4", "y0", "y1", "y2"] {
        assert!(seen.contains(&router.cluster_of(id).unwrap()), "{id} orphaned");
    }
    // Results unaffected by the split.
    let hits = router.search(&[1.0, 0.0, 0.0], 1).unwrap();
    assert_eq!(hits[0].id, "x0");
}

#[test]
fn router_remove_and_metadata() {
    let mut router = ClusterRouter::new(RouterConfig {
        num_clusters: 2,
        ..Default::default()
    })
    .unwrap();
    router.build_index(two_group_points()).unwrap();
    router
        .upsert("tagged", vec![0.5, 0.5, 0.0], Some(json!({"kind": "probe"})))
        .unwrap();
    assert_eq!(router.metadata("tagged"), Some(&json!({"kind": "probe"})));

    router.remove("tagged").unwrap();
    assert!(!router.contains("tagged"));
    assert!(matches!(
        router.remove("tagged"),
        Err(VectorError::InvalidId { .. })
    ));
    let hits = router.search(&[0.5, 0.5, 0.0], 10).unwrap();
    assert!(hits.iter().all(|h| h.id != "tagged"));
}

#[test]
fn router_quantized_results_match_full_precision_ordering() {
    let points = two_group_points();
    let mut full = ClusterRouter::new(RouterConfig {
        num_clusters: 2,
        ..Default::default()
    })
    .unwrap();
    full.build_index(points.clone()).unwrap();
    let mut quantized = ClusterRouter::new(RouterConfig {
        num_clusters: 2,
        quantize_vectors: true,
        ..Default::default()
    })
    .unwrap();
    quantized.build_index(points).unwrap();

    let q = [0.9f32, 0.1, 0.0];
    let a = full.search(&q, 4).unwrap();
    let b = quantized.search(&q, 4).unwrap();
    assert_eq!(
        a.iter().map(|m| &m.id).collect::<Vec<_>>(),
        b.iter().map(|m| &m.id).collect::<Vec<_>>()
    );
}

#[test]
fn router_snapshot_round_trip() {
    let mut router = ClusterRouter::new(RouterConfig {
        num_clusters: 2,
        quantize_vectors: true,
        ..Default::default()
    })
    .unwrap();
    router.build_index(two_group_points()).unwrap();
    router
        .upsert("z0", vec![0.0, 0.0, 1.0], Some(json!({"fresh": true})))
        .unwrap();

    let restored = ClusterRouter::from_json(&router.to_json().unwrap()).unwrap();
    assert_eq!(restored.len(), router.len());
    assert_eq!(restored.cluster_count(), router.cluster_count());
    assert_eq!(restored.metadata("z0"), Some(&json!({"fresh": true})));
    let q = [0.9f32, 0.05, 0.05];
    assert_eq!(router.search(&q, 5).unwrap(), restored.search(&q, 5).unwrap());
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// After any delete set, pruning removes exactly the tombstones and
    /// leaves no dangling neighbor references (search keeps working).
    #[test]
    fn prune_is_complete(deletions in prop::collection::btree_set(0i64..40, 0..15)) {
        let mut index = graph(8);
        index.build_index(pseudo_points(40, 6, 13)).unwrap();
        for &id in &deletions {
            index.delete_point(id).unwrap();
        }
        let removed = index.prune_deleted_nodes();
        prop_assert_eq!(removed, deletions.len());
        prop_assert_eq!(index.tombstone_count(), 0);
        prop_assert_eq!(index.node_count(), 40 - deletions.len());

        let hits = index.search(&vec![0.2; 6], 40, None).unwrap();
        prop_assert_eq!(hits.len(), 40 - deletions.len());
        for h in hits {
            prop_assert!(!deletions.contains(&h.id));
        }
    }

    /// Cluster membership always partitions the record set, through builds,
    /// upserts and removes.
    #[test]
    fn cluster_membership_is_a_partition(
        extra in prop::collection::vec((0u32..50, -1.0f32..1.0, -1.0f32..1.0), 0..12),
        removals in prop::collection::vec(0usize..7, 0..4),
    ) {
        let mut router = ClusterRouter::new(RouterConfig {
            num_clusters: 2,
            max_cluster_size: 4,
            ..Default::default()
        }).unwrap();
        router.build_index(two_group_points()).unwrap();

        for (n, a, b) in extra {
            router.upsert(format!("p{n}"), vec![a, b, 0.25], None).unwrap();
        }
        let base = two_group_points();
        for i in removals {
            let id = &base[i].0;
            if router.contains(id) {
                router.remove(id).unwrap();
            }
        }

        let mut seen = BTreeSet::new();
        let mut total = 0usize;
        for centroid in router.clusters() {
            total += centroid.member_count;
        }
        for id in ["x0", "x1", "x2", "x3", "y0", "y1", "y2"] {
            if let Some(cluster) = router.cluster_of(id) {
                prop_assert!(seen.insert(id));
                let centroid = router.clusters().find(|c| c.id == cluster);
                prop_assert!(centroid.is_some());
            }
        }
        prop_assert_eq!(total, router.len());
    }
}
