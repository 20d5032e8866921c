//! Placement behavior through the protocol: popularity aggregation from
//! piggybacked reports, write-path placement deployment, lazy victim
//! fetching, and the fast-path hint.

mod common;

use common::{cluster, key_with_beacon};
use covered::{CloudStore, CoveredConfig, HitSource, Key, Value};

/// Repeated misses that cannot admit (the object exceeds the per-object
/// cap) accumulate uncached popularity at the beacon's aggregator.
#[test]
fn rejected_admissions_accumulate_popularity_at_the_beacon() {
    let mut cfg = CoveredConfig::for_testing();
    cfg.max_object_size_bytes = 1024;
    let c = cluster(3, cfg);
    let key = key_with_beacon(&c, 0, "hot");
    c.cloud.put(&key, Value::new(vec![1u8; 4096]));

    for _ in 0..3 {
        let outcome = c.nodes[1].get(&key).unwrap();
        assert_eq!(outcome.source, HitSource::GlobalMiss);
        assert!(outcome.value.is_some());
    }
    for _ in 0..2 {
        c.nodes[2].get(&key).unwrap();
    }

    let entry = c.nodes[0].aggregator().snapshot(&key).unwrap();
    assert_eq!(entry.sum(), 5.0);
    assert_eq!(entry.exist_edgecnt(), 2);
    assert!(entry.has_edge(1));
    assert!(entry.has_edge(2));
    assert!(!c.nodes[1].cache().is_locally_cached(&key));
}

/// A write to a key with accumulated demand deploys copies to the hot
/// edges through placement notifies.
#[test]
fn write_path_placement_deploys_to_hot_edges() {
    let mut cfg = CoveredConfig::for_testing();
    cfg.max_object_size_bytes = 1024;
    let c = cluster(4, cfg);
    let key = key_with_beacon(&c, 0, "deploy");
    c.cloud.put(&key, Value::new(vec![1u8; 4096]));

    // Edges 1 and 2 accumulate misses; the big object cannot be admitted.
    for _ in 0..3 {
        c.nodes[1].get(&key).unwrap();
    }
    for _ in 0..2 {
        c.nodes[2].get(&key).unwrap();
    }
    assert!(c.nodes[0].aggregator().contains(&key));

    // A small rewrite fits; the beacon plans a placement for the hot edges
    // and the writer fans the value out.
    c.nodes[3].put(&key, vec![2u8; 512]).unwrap();

    for edge in [1usize, 2] {
        assert!(
            c.nodes[edge].cache().is_valid_locally_cached(&key),
            "edge {edge} missing its placed copy"
        );
        let outcome = c.nodes[edge].get(&key).unwrap();
        assert_eq!(outcome.source, HitSource::LocalHit);
    }
    let sharers: Vec<u32> = c.nodes[0]
        .directory()
        .cached_edges(&key)
        .into_iter()
        .collect();
    assert_eq!(sharers, vec![1, 2, 3]);
    // Placed edges left the uncached aggregator.
    assert!(!c.nodes[0].aggregator().contains(&key));
}

/// When tracked victims cannot cover the object, the beacon lazily
/// fetches extra victim cacheinfos before committing the placement.
#[test]
fn placement_lazily_fetches_extra_victims() {
    let mut cfg = CoveredConfig::for_testing();
    cfg.cache_capacity_bytes = 256 * 1024;
    cfg.max_object_size_bytes = 128 * 1024;
    cfg.peredge_synced_victimcnt = 2;
    let c = cluster(3, cfg);

    // Fill edge 1 with filler objects so its margin is small and its two
    // advertised victims cannot cover a 100 KiB placement.
    for i in 0..10 {
        let filler = Key::from(format!("filler-{i}"));
        c.nodes[1].put(&filler, vec![0u8; 20 * 1024]).unwrap();
    }
    // Refresh the beacon's view of edge 1 with a piggybacked syncset.
    let key = key_with_beacon(&c, 0, "big");
    let _ = c.nodes[1].get(&key);

    // Seed demand from edge 1 at the beacon.
    c.nodes[0]
        .aggregator()
        .update(&key, 1, 3.0, false, 100 * 1024);

    c.nodes[2].put(&key, vec![3u8; 100 * 1024]).unwrap();

    assert!(c.nodes[1].cache().is_valid_locally_cached(&key));
    let sharers: Vec<u32> = c.nodes[0]
        .directory()
        .cached_edges(&key)
        .into_iter()
        .collect();
    assert_eq!(sharers, vec![1, 2]);
}

/// The fast-path hint lets a requester decline admission when the benefit
/// cannot beat the aggregator's weakest tracked object.
#[test]
fn fast_path_hint_declines_unworthy_admissions() {
    let mut cfg = CoveredConfig::for_testing();
    cfg.min_admission_benefit = 100.0;
    let c = cluster(2, cfg);
    let key = key_with_beacon(&c, 0, "meh");
    c.cloud.put(&key, Value::new(&b"origin"[..]));

    // First miss: the aggregator has no slot yet, so the beacon hands out
    // a hint and the reader decides alone. A single-miss benefit of 1.0
    // cannot beat the 100.0 threshold, so nothing is admitted.
    let outcome = c.nodes[1].get(&key).unwrap();
    assert_eq!(outcome.source, HitSource::GlobalMiss);
    assert!(outcome.value.is_some());
    assert!(!c.nodes[1].cache().is_locally_cached(&key));

    // Without competition the object is still served, always from the
    // cloud.
    let outcome = c.nodes[1].get(&key).unwrap();
    assert_eq!(outcome.source, HitSource::GlobalMiss);
}

/// Background placement deploys a popular key's copies without a write.
#[test]
fn background_placement_deploys_for_read_heavy_keys() {
    let mut cfg = CoveredConfig::for_testing();
    cfg.background_placement_enabled = true;
    cfg.max_object_size_bytes = 1024;
    let c = cluster(3, cfg);
    let key = key_with_beacon(&c, 0, "bg");
    c.cloud.put(&key, Value::new(vec![1u8; 4096]));

    // Demand accumulates while the oversized object cannot be admitted.
    for _ in 0..3 {
        c.nodes[1].get(&key).unwrap();
    }
    // Rewrite the object small enough to cache, directly at the origin,
    // then let another lookup trigger the background deployment.
    c.cloud.put(&key, Value::new(vec![2u8; 512]));
    c.nodes[0]
        .aggregator()
        .update(&key, 1, 3.0, false, 512);
    c.nodes[2].get(&key).unwrap();

    // The deployment runs on a background thread.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if c.nodes[1].cache().is_valid_locally_cached(&key) {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    assert!(
        c.nodes[1].cache().is_valid_locally_cached(&key),
        "background placement never reached edge 1"
    );
}

#[test]
fn evictions_propagate_to_the_victims_directory() {
    let mut cfg = CoveredConfig::for_testing();
    cfg.cache_capacity_bytes = 64 * 1024;
    cfg.max_object_size_bytes = 32 * 1024;
    let c = default_cluster_with(cfg);
    let first = key_with_beacon(&c, 0, "v-first");
    let second = key_with_beacon(&c, 0, "v-second");
    let third = key_with_beacon(&c, 0, "v-third");

    for key in [&first, &second, &third] {
        c.nodes[1].put(key, vec![0u8; 30 * 1024]).unwrap();
    }
    // Admitting the third evicted the first; its beacon no longer lists
    // edge 1 as a sharer.
    assert!(!c.nodes[1].cache().is_locally_cached(&first));
    assert!(c.nodes[0].directory().cached_edges(&first).is_empty());
    assert!(!c.nodes[0].directory().cached_edges(&third).is_empty());
}

fn default_cluster_with(cfg: CoveredConfig) -> common::Cluster {
    cluster(2, cfg)
}
