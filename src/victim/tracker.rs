//! Beacon-side victim tracking, indexed by peer edge.
//!
//! Holds each peer's advertised victim summaries (plus lazily fetched
//! extras), the cache margin they reported, and refcounted sharer sets for
//! victim keys, feeding eviction-cost estimates to the placement planner.

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::cluster::RewardWeights;
use crate::error::{CoveredError, Result};
use crate::types::{DeltaReward, EdgeIndex, Key, ObjectSize};
use crate::victim::cacheinfo::{sort_by_reward, VictimCacheinfo};
use crate::victim::dirinfo::DirinfoSet;
use crate::victim::sync::{check_generation, VictimSync};
use crate::victim::syncset::VictimSyncset;

#[derive(Default)]
struct PeerVictimSlot {
    cache_margin_bytes: u64,
    /// Synced victims, ascending by local reward.
    victims: Vec<VictimCacheinfo>,
    /// Lazily fetched extras beyond the synced set, ascending; consumed
    /// once and never reused.
    fetched: Vec<VictimCacheinfo>,
    /// Sharer sets the peer beacons for its synced victims.
    beaconed: FxHashMap<Key, DirinfoSet>,
    generation: u32,
    has_base: bool,
    needs_complete: bool,
}

struct VictimDirinfo {
    refcnt: u32,
    sharers: DirinfoSet,
    /// Whether this node's own directory maintains the sharer set.
    self_beaconed: bool,
}

#[derive(Default)]
struct TrackerState {
    peers: FxHashMap<EdgeIndex, PeerVictimSlot>,
    dirinfo: FxHashMap<Key, VictimDirinfo>,
    /// This edge's own complete snapshot, refreshed before piggybacking.
    local: Option<VictimSyncset>,
}

/// Per-edge victim outcome of a placement scan.
#[derive(Clone, Debug, Default)]
pub struct PerEdgeVictims {
    pub victims: Vec<VictimCacheinfo>,
    pub synced_keys: Vec<Key>,
    pub fetched_keys: Vec<Key>,
    pub eviction_cost: DeltaReward,
    pub need_more: bool,
}

pub struct VictimTracker {
    edge_idx: EdgeIndex,
    state: RwLock<TrackerState>,
}

impl VictimTracker {
    pub fn new(edge_idx: EdgeIndex) -> Self {
        Self {
            edge_idx,
            state: RwLock::new(TrackerState::default()),
        }
    }

    /// Applies an incoming syncset from `peer`. Complete syncsets replace
    /// the slot; deltas must extend the previously applied generation or
    /// the syncset is dropped with `StaleVictimSync`.
    pub fn apply_syncset(
        &self,
        peer: EdgeIndex,
        sync: &VictimSync,
        weights: &RewardWeights,
    ) -> Result<()> {
        let mut state = self.state.write();
        let slot = state.peers.entry(peer).or_default();

        let recovered = if sync.syncset.is_complete() {
            sync.syncset.clone()
        } else {
            if !slot.has_base {
                slot.needs_complete = true;
                return Err(CoveredError::StaleVictimSync(format!(
                    "delta from edge {peer} without a complete base"
                )));
            }
            if let Err(err) = check_generation(slot.generation, sync.generation) {
                slot.needs_complete = true;
                return Err(err);
            }
            let prev = VictimSyncset::complete(
                slot.cache_margin_bytes,
                slot.victims.clone(),
                slot.beaconed.iter().map(|(k, s)| (k.clone(), s.clone())).collect(),
            );
            match VictimSyncset::recover(&sync.syncset, &prev, weights) {
                Ok(recovered) => recovered,
                Err(err) => {
                    slot.needs_complete = true;
                    return Err(err);
                }
            }
        };

        let margin = recovered.complete_margin_bytes()?;
        let victims = recovered.complete_victims()?;
        let beaconed: FxHashMap<Key, DirinfoSet> =
            recovered.complete_beaconed()?.into_iter().collect();

        let old_keys: FxHashSet<Key> = slot.victims.iter().map(|v| v.key.clone()).collect();
        let new_keys: FxHashSet<Key> = victims.iter().map(|v| v.key.clone()).collect();

        slot.cache_margin_bytes = margin;
        slot.victims = victims;
        slot.fetched.retain(|v| !new_keys.contains(&v.key));
        slot.beaconed = beaconed.clone();
        slot.generation = sync.generation;
        slot.has_base = true;
        slot.needs_complete = false;

        for key in new_keys.difference(&old_keys) {
            let entry = state.dirinfo.entry(key.clone()).or_insert(VictimDirinfo {
                refcnt: 0,
                sharers: DirinfoSet::new(),
                self_beaconed: false,
            });
            entry.refcnt += 1;
        }
        for key in old_keys.difference(&new_keys) {
            Self::release_dirinfo(&mut state.dirinfo, key);
        }
        for (key, sharers) in &beaconed {
            if let Some(entry) = state.dirinfo.get_mut(key) {
                if !entry.self_beaconed {
                    entry.sharers = sharers.clone();
                }
            }
        }
        debug!(peer, generation = sync.generation, "applied victim syncset");
        Ok(())
    }

    fn release_dirinfo(dirinfo: &mut FxHashMap<Key, VictimDirinfo>, key: &Key) {
        if let Some(entry) = dirinfo.get_mut(key) {
            assert!(entry.refcnt > 0, "victim dirinfo refcount underflow");
            entry.refcnt -= 1;
            if entry.refcnt == 0 {
                dirinfo.remove(key);
            }
        }
    }

    /// Reads and clears the stale-sync flag for `peer`, used to stamp
    /// `need_complete_sync` onto the next message to it.
    pub fn take_needs_complete(&self, peer: EdgeIndex) -> bool {
        let mut state = self.state.write();
        match state.peers.get_mut(&peer) {
            Some(slot) => std::mem::take(&mut slot.needs_complete),
            None => false,
        }
    }

    /// Incremental sharer-set maintenance driven by this node's own
    /// directory admissions and evictions.
    pub fn update_synced_victim_dirinfo(&self, key: &Key, is_admit: bool, edge: EdgeIndex) {
        let mut state = self.state.write();
        if let Some(entry) = state.dirinfo.get_mut(key) {
            entry.self_beaconed = true;
            if is_admit {
                entry.sharers.insert(edge);
            } else {
                entry.sharers.remove(edge);
            }
        }
    }

    /// Stores lazily fetched victims for `peer` so the next placement scan
    /// can use them.
    pub fn note_fetched_victims(
        &self,
        peer: EdgeIndex,
        mut extras: Vec<VictimCacheinfo>,
        cache_margin_bytes: u64,
        weights: &RewardWeights,
    ) {
        let mut state = self.state.write();
        let slot = state.peers.entry(peer).or_default();
        slot.cache_margin_bytes = cache_margin_bytes;
        let synced: FxHashSet<Key> = slot.victims.iter().map(|v| v.key.clone()).collect();
        extras.retain(|v| !synced.contains(&v.key));
        slot.fetched.extend(extras);
        sort_by_reward(&mut slot.fetched, weights);
        slot.fetched.dedup_by(|a, b| a.key == b.key);
    }

    /// Scans each candidate edge's victims in reward order until the
    /// accumulated object sizes cover `object_size` beyond the edge's
    /// margin.
    pub fn find_victims_for_placement(
        &self,
        object_size: ObjectSize,
        edges: &[EdgeIndex],
        weights: &RewardWeights,
    ) -> Vec<(EdgeIndex, PerEdgeVictims)> {
        let state = self.state.read();
        let empty = PeerVictimSlot::default();
        edges
            .iter()
            .map(|&edge| {
                let slot = state.peers.get(&edge).unwrap_or(&empty);
                let mut out = PerEdgeVictims::default();
                let required = u64::from(object_size).saturating_sub(slot.cache_margin_bytes);
                if required == 0 {
                    return (edge, out);
                }
                let mut saved = 0u64;
                for (info, from_synced) in slot
                    .victims
                    .iter()
                    .map(|v| (v, true))
                    .chain(slot.fetched.iter().map(|v| (v, false)))
                {
                    out.eviction_cost += info.local_reward(weights);
                    out.victims.push(info.clone());
                    if from_synced {
                        out.synced_keys.push(info.key.clone());
                    } else {
                        out.fetched_keys.push(info.key.clone());
                    }
                    saved += u64::from(info.object_size);
                    if saved >= required {
                        break;
                    }
                }
                if saved < required {
                    out.need_more = true;
                }
                (edge, out)
            })
            .collect()
    }

    /// Drops victims committed by a placement so they are never reused;
    /// releases dirinfo refcounts for removed synced victims.
    pub fn remove_victims_for_placement(&self, peredge_victims: &[(EdgeIndex, Vec<Key>)]) {
        let mut state = self.state.write();
        for (edge, keys) in peredge_victims {
            let Some(slot) = state.peers.get_mut(edge) else {
                warn!(edge, "placement removed victims from an untracked edge");
                continue;
            };
            let mut released = Vec::new();
            for key in keys {
                let before = slot.victims.len();
                slot.victims.retain(|v| &v.key != key);
                if slot.victims.len() < before {
                    released.push(key.clone());
                } else {
                    slot.fetched.retain(|v| &v.key != key);
                }
            }
            for key in released {
                Self::release_dirinfo(&mut state.dirinfo, &key);
            }
        }
    }

    /// Refreshes this edge's own advertised snapshot.
    pub fn refresh_local(&self, snapshot: VictimSyncset) {
        assert!(snapshot.is_complete());
        self.state.write().local = Some(snapshot);
    }

    /// This edge's current complete victim syncset.
    pub fn get_victim_syncset(&self) -> VictimSyncset {
        self.state
            .read()
            .local
            .clone()
            .unwrap_or_else(|| VictimSyncset::complete(0, vec![], vec![]))
    }

    /// Sharer set tracked for one victim key, if any.
    pub fn dirinfo_sharers(&self, key: &Key) -> Option<DirinfoSet> {
        self.state.read().dirinfo.get(key).map(|e| e.sharers.clone())
    }

    pub fn dirinfo_refcnt(&self, key: &Key) -> u32 {
        self.state.read().dirinfo.get(key).map_or(0, |e| e.refcnt)
    }

    pub fn peer_victims(&self, edge: EdgeIndex) -> Vec<VictimCacheinfo> {
        self.state
            .read()
            .peers
            .get(&edge)
            .map(|s| s.victims.clone())
            .unwrap_or_default()
    }

    pub fn peer_margin(&self, edge: EdgeIndex) -> u64 {
        self.state
            .read()
            .peers
            .get(&edge)
            .map_or(0, |s| s.cache_margin_bytes)
    }

    pub fn edge_idx(&self) -> EdgeIndex {
        self.edge_idx
    }

    /// Metadata bytes charged by tracked victim state.
    pub fn size_for_capacity(&self) -> u64 {
        let state = self.state.read();
        let victims: u64 = state
            .peers
            .values()
            .flat_map(|s| s.victims.iter().chain(s.fetched.iter()))
            .map(|v| v.size_for_capacity())
            .sum();
        let dirinfo: u64 = state
            .dirinfo
            .iter()
            .map(|(k, e)| k.len() as u64 + 4 + e.sharers.size_for_capacity())
            .sum();
        victims + dirinfo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::victim::sync::SyncOutbox;

    fn info(key: &str, size: u32, local: f32) -> VictimCacheinfo {
        VictimCacheinfo {
            key: Key::from(key),
            object_size: size,
            local_cached_popularity: local,
            redirected_cached_popularity: 0.0,
        }
    }

    fn snapshot(margin: u64, victims: Vec<VictimCacheinfo>) -> VictimSyncset {
        let mut victims = victims;
        sort_by_reward(&mut victims, &RewardWeights::default());
        VictimSyncset::complete(margin, victims, vec![])
    }

    fn sync(generation: u32, syncset: VictimSyncset) -> VictimSync {
        VictimSync {
            generation,
            syncset,
        }
    }

    #[test]
    fn complete_syncset_replaces_slot_and_refcounts() {
        let tracker = VictimTracker::new(0);
        let w = RewardWeights::default();
        tracker
            .apply_syncset(1, &sync(1, snapshot(0, vec![info("a", 10, 1.0)])), &w)
            .unwrap();
        assert_eq!(tracker.dirinfo_refcnt(&Key::from("a")), 1);

        tracker
            .apply_syncset(1, &sync(2, snapshot(0, vec![info("b", 10, 1.0)])), &w)
            .unwrap();
        assert_eq!(tracker.dirinfo_refcnt(&Key::from("a")), 0);
        assert_eq!(tracker.dirinfo_refcnt(&Key::from("b")), 1);
    }

    #[test]
    fn shared_victim_key_is_refcounted_across_peers() {
        let tracker = VictimTracker::new(0);
        let w = RewardWeights::default();
        tracker
            .apply_syncset(1, &sync(1, snapshot(0, vec![info("k", 10, 1.0)])), &w)
            .unwrap();
        tracker
            .apply_syncset(2, &sync(1, snapshot(0, vec![info("k", 10, 2.0)])), &w)
            .unwrap();
        assert_eq!(tracker.dirinfo_refcnt(&Key::from("k")), 2);

        tracker
            .apply_syncset(1, &sync(2, snapshot(0, vec![])), &w)
            .unwrap();
        assert_eq!(tracker.dirinfo_refcnt(&Key::from("k")), 1);
    }

    #[test]
    fn delta_with_generation_gap_is_dropped() {
        let tracker = VictimTracker::new(0);
        let w = RewardWeights::default();
        let outbox = SyncOutbox::new();
        let first = outbox.prepare(0, snapshot(100, vec![info("a", 10, 1.0)]));
        tracker.apply_syncset(1, &first, &w).unwrap();
        let _skipped = outbox.prepare(0, snapshot(100, vec![info("a", 10, 2.0)]));
        let delta = outbox.prepare(0, snapshot(100, vec![info("a", 10, 3.0)]));
        assert!(matches!(
            tracker.apply_syncset(1, &delta, &w),
            Err(CoveredError::StaleVictimSync(_))
        ));
        assert!(tracker.take_needs_complete(1));
        assert!(!tracker.take_needs_complete(1));
    }

    #[test]
    fn placement_scan_accumulates_until_margin_is_covered() {
        let tracker = VictimTracker::new(0);
        let w = RewardWeights::default();
        // Margin 200 KiB at edge 1; two victims of 256 KiB and 64 KiB.
        tracker
            .apply_syncset(
                1,
                &sync(
                    1,
                    snapshot(
                        200 * 1024,
                        vec![info("v1", 256 * 1024, 0.5), info("v2", 64 * 1024, 1.0)],
                    ),
                ),
                &w,
            )
            .unwrap();
        // Margin 600 KiB at edge 2: no victims needed for a 500 KiB object.
        tracker
            .apply_syncset(2, &sync(1, snapshot(600 * 1024, vec![])), &w)
            .unwrap();

        let results = tracker.find_victims_for_placement(500 * 1024, &[1, 2], &w);
        let (_, e1) = &results[0];
        assert_eq!(e1.victims.len(), 2);
        assert!(!e1.need_more);
        let (_, e2) = &results[1];
        assert!(e2.victims.is_empty());
        assert!(!e2.need_more);
    }

    #[test]
    fn insufficient_victims_request_lazy_fetch() {
        let tracker = VictimTracker::new(0);
        let w = RewardWeights::default();
        tracker
            .apply_syncset(1, &sync(1, snapshot(0, vec![info("v", 16, 1.0)])), &w)
            .unwrap();
        let results = tracker.find_victims_for_placement(1024, &[1], &w);
        assert!(results[0].1.need_more);

        tracker.note_fetched_victims(1, vec![info("w", 4096, 2.0)], 0, &w);
        let results = tracker.find_victims_for_placement(1024, &[1], &w);
        assert!(!results[0].1.need_more);
        assert_eq!(results[0].1.fetched_keys, vec![Key::from("w")]);
    }

    #[test]
    fn removed_victims_are_not_reused() {
        let tracker = VictimTracker::new(0);
        let w = RewardWeights::default();
        tracker
            .apply_syncset(
                1,
                &sync(1, snapshot(0, vec![info("a", 512, 0.1), info("b", 512, 0.2)])),
                &w,
            )
            .unwrap();
        tracker.remove_victims_for_placement(&[(1, vec![Key::from("a")])]);
        assert_eq!(tracker.peer_victims(1).len(), 1);
        assert_eq!(tracker.dirinfo_refcnt(&Key::from("a")), 0);
        assert_eq!(tracker.dirinfo_refcnt(&Key::from("b")), 1);
    }
}
