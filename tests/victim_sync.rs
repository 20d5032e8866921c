//! Victim synchronization through the protocol: piggybacked complete and
//! delta syncsets, tracker convergence, and the compress/recover law.

mod common;

use common::{cluster, key_with_beacon};
use covered::victim::syncset::VictimSyncset;
use covered::victim::VictimCacheinfo;
use covered::{CoveredConfig, Key, RewardWeights};

/// After any traffic from an edge, its beacon's tracker mirrors the
/// edge's advertised victim set and cache margin.
#[test]
fn piggybacked_syncsets_converge_at_the_peer() {
    let mut cfg = CoveredConfig::for_testing();
    cfg.peredge_synced_victimcnt = 4;
    let c = cluster(2, cfg);

    for i in 0..6 {
        let key = Key::from(format!("obj-{i}"));
        c.nodes[1].put(&key, vec![0u8; 2048]).unwrap();
    }
    // Any message to node 0 carries the piggyback; a lookup miss is enough.
    let probe = key_with_beacon(&c, 0, "probe");
    let _ = c.nodes[1].get(&probe);

    let advertised = c.nodes[1].cache().get_local_synced_victim_cacheinfos();
    let tracked = c.nodes[0].victims().peer_victims(1);
    assert_eq!(tracked, advertised);
    assert_eq!(
        c.nodes[0].victims().peer_margin(1),
        c.nodes[1].cache().cache_margin_bytes()
    );
}

/// Follow-up piggybacks are deltas, and applying them keeps the peer's
/// view identical to the sender's snapshot.
#[test]
fn delta_syncsets_keep_the_view_identical() {
    let mut cfg = CoveredConfig::for_testing();
    cfg.peredge_synced_victimcnt = 4;
    let c = cluster(2, cfg);

    let probe = key_with_beacon(&c, 0, "probe");
    for i in 0..4 {
        c.nodes[1]
            .put(&Key::from(format!("first-{i}")), vec![0u8; 1024])
            .unwrap();
    }
    let _ = c.nodes[1].get(&probe);
    let first_view = c.nodes[0].victims().peer_victims(1);
    assert!(!first_view.is_empty());

    // Change the victim population, then sync again.
    for i in 0..4 {
        c.nodes[1]
            .put(&Key::from(format!("second-{i}")), vec![0u8; 4096])
            .unwrap();
    }
    let _ = c.nodes[1].get(&probe);

    let advertised = c.nodes[1].cache().get_local_synced_victim_cacheinfos();
    assert_eq!(c.nodes[0].victims().peer_victims(1), advertised);
    assert_eq!(
        c.nodes[0].victims().peer_margin(1),
        c.nodes[1].cache().cache_margin_bytes()
    );
}

/// A committed placement consumes tracked victims at the beacon, and the
/// deployment's own piggybacks reconverge the tracker on the target's
/// post-eviction state.
#[test]
fn placement_deployment_keeps_victim_views_convergent() {
    let mut cfg = CoveredConfig::for_testing();
    cfg.cache_capacity_bytes = 64 * 1024;
    cfg.max_object_size_bytes = 32 * 1024;
    cfg.peredge_synced_victimcnt = 4;
    let c = cluster(2, cfg);

    for i in 0..4 {
        c.nodes[1]
            .put(&Key::from(format!("filler-{i}")), vec![0u8; 14 * 1024])
            .unwrap();
    }
    let probe = key_with_beacon(&c, 0, "probe");
    let _ = c.nodes[1].get(&probe);
    let before = c.nodes[0].victims().peer_victims(1).len();
    assert!(before > 0);

    // Demand from edge 1 makes it the placement target for a write that
    // needs eviction there.
    let key = key_with_beacon(&c, 0, "placed");
    c.nodes[0]
        .aggregator()
        .update(&key, 1, 10.0, false, 20 * 1024);
    c.nodes[0].put(&key, vec![1u8; 20 * 1024]).unwrap();

    assert!(c.nodes[1].cache().is_valid_locally_cached(&key));
    // The target's directory update piggybacked its post-eviction victim
    // set; the beacon's view matches it again.
    let advertised = c.nodes[1].cache().get_local_synced_victim_cacheinfos();
    assert_eq!(c.nodes[0].victims().peer_victims(1), advertised);
}

/// The compress/recover law across arbitrary complete syncset pairs from
/// one sender.
#[test]
fn recover_of_compress_is_identity() {
    let weights = RewardWeights::default();
    let make = |margin: u64, keys: &[(&str, u32, f32)]| {
        let mut victims: Vec<VictimCacheinfo> = keys
            .iter()
            .map(|(k, size, pop)| VictimCacheinfo {
                key: Key::from(*k),
                object_size: *size,
                local_cached_popularity: *pop,
                redirected_cached_popularity: pop / 2.0,
            })
            .collect();
        covered::victim::cacheinfo::sort_by_reward(&mut victims, &weights);
        VictimSyncset::complete(margin, victims, vec![])
    };

    let cases = [
        (make(1000, &[("a", 10, 1.0)]), make(1000, &[("a", 10, 1.0)])),
        (
            make(500, &[("a", 10, 2.0), ("b", 20, 1.0)]),
            make(900, &[("b", 20, 1.0), ("c", 30, 3.0)]),
        ),
        (make(0, &[]), make(1 << 40, &[("x", 1, 0.1)])),
        (make(1 << 41, &[("y", 7, 9.0)]), make(3, &[])),
    ];
    for (current, previous) in cases {
        let delta = VictimSyncset::compress(&current, &previous);
        let recovered = VictimSyncset::recover(&delta, &previous, &weights).unwrap();
        assert_eq!(recovered, current);
    }
}
