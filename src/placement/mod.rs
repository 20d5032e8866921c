//! Trade-off-aware placement planning.
//!
//! A pure function over snapshots taken at the beacon under the per-key
//! lock: candidate edges come from the aggregated popularity (hottest
//! first, plus the writer on the write path), admission benefit from the
//! benefit function, and eviction cost from the victim tracker. The prefix
//! maximizing benefit minus cost wins; ties prefer fewer copies.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::cluster::{local_uncached_reward, BenefitParams, RewardWeights};
use crate::popularity::aggregated::AggregatedUncachedPopularity;
use crate::popularity::edgeset::Edgeset;
use crate::types::{DeltaReward, EdgeIndex, Key, ObjectSize, Popularity};
use crate::victim::cacheinfo::VictimCacheinfo;
use crate::victim::tracker::VictimTracker;

/// A computed placement together with its eviction plan.
#[derive(Clone, Debug, Default)]
pub struct PlacementPlan {
    pub edgeset: Edgeset,
    pub benefit: DeltaReward,
    pub eviction_cost: DeltaReward,
    /// For each victim key, the edges that will evict it.
    pub pervictim_edgeset: Vec<(Key, Edgeset)>,
    /// For each victim key, the cacheinfos backing the cost estimate.
    pub pervictim_cacheinfos: Vec<(Key, Vec<VictimCacheinfo>)>,
    /// Synced victims consumed per edge, for tracker removal on commit.
    pub peredge_synced_victims: Vec<(EdgeIndex, Vec<Key>)>,
    /// Lazily fetched victims consumed per edge.
    pub peredge_fetched_victims: Vec<(EdgeIndex, Vec<Key>)>,
    /// Edges whose tracked victims could not cover the object size.
    pub fetch_edgeset: Edgeset,
    pub need_more: bool,
}

impl PlacementPlan {
    pub fn is_empty(&self) -> bool {
        self.edgeset.is_empty()
    }

    /// Victim keys per edge, synced and fetched combined.
    pub fn peredge_victim_keys(&self) -> Vec<(EdgeIndex, Vec<Key>)> {
        let mut merged: FxHashMap<EdgeIndex, Vec<Key>> = FxHashMap::default();
        for (edge, keys) in self
            .peredge_synced_victims
            .iter()
            .chain(self.peredge_fetched_victims.iter())
        {
            merged.entry(*edge).or_default().extend(keys.iter().cloned());
        }
        merged.into_iter().collect()
    }
}

/// Computes which edges should host a new copy of `key`.
///
/// `writer` is the requesting edge on the write path together with its own
/// reported uncached popularity; `cached_edges` are excluded because they
/// already hold copies.
#[allow(clippy::too_many_arguments)]
pub fn plan_placement(
    key: &Key,
    object_size: ObjectSize,
    aggregated: Option<&AggregatedUncachedPopularity>,
    writer: Option<(EdgeIndex, Popularity)>,
    cached_edges: &BTreeSet<EdgeIndex>,
    is_global_cached: bool,
    tracker: &VictimTracker,
    weights: &RewardWeights,
    params: &BenefitParams,
) -> PlacementPlan {
    let mut candidates: Vec<(EdgeIndex, Popularity)> = aggregated
        .map(|aup| {
            aup.candidates_desc()
                .into_iter()
                .filter(|(edge, _)| !cached_edges.contains(edge))
                .collect()
        })
        .unwrap_or_default();

    let mut sum_all: Popularity = aggregated.map_or(0.0, |aup| aup.sum());
    if let Some((writer_edge, writer_pop)) = writer {
        let already_candidate = candidates.iter().any(|(e, _)| *e == writer_edge);
        if !already_candidate && !cached_edges.contains(&writer_edge) {
            if !aggregated.is_some_and(|aup| aup.has_edge(writer_edge)) {
                sum_all += writer_pop;
            }
            let pos = candidates
                .iter()
                .position(|(_, pop)| *pop < writer_pop)
                .unwrap_or(candidates.len());
            candidates.insert(pos, (writer_edge, writer_pop));
        }
    }

    if candidates.is_empty() {
        return PlacementPlan::default();
    }

    let candidate_edges: Vec<EdgeIndex> = candidates.iter().map(|(e, _)| *e).collect();
    let scans = tracker.find_victims_for_placement(object_size, &candidate_edges, weights);

    let mut best: Option<(usize, DeltaReward, DeltaReward)> = None;
    let mut topi_sum = 0.0;
    let mut cost_prefix = 0.0;
    for i in 1..=candidates.len() {
        topi_sum += candidates[i - 1].1;
        cost_prefix += scans[i - 1].1.eviction_cost;
        let benefit = local_uncached_reward(
            i,
            topi_sum,
            is_global_cached,
            (sum_all - topi_sum).max(0.0),
            params,
        );
        let improves = match best {
            None => true,
            Some((_, best_benefit, best_cost)) => benefit - cost_prefix > best_benefit - best_cost,
        };
        if improves {
            best = Some((i, benefit, cost_prefix));
        }
    }

    let (chosen, benefit, eviction_cost) = best.expect("at least one candidate prefix");
    if benefit - eviction_cost <= params.min_admission_benefit.max(0.0) {
        debug!(%key, benefit, eviction_cost, "placement not worthwhile");
        return PlacementPlan::default();
    }

    let mut plan = PlacementPlan {
        edgeset: candidates[..chosen].iter().map(|(e, _)| *e).collect(),
        benefit,
        eviction_cost,
        ..PlacementPlan::default()
    };

    let mut pervictim_edgeset: FxHashMap<Key, Edgeset> = FxHashMap::default();
    let mut pervictim_cacheinfos: FxHashMap<Key, Vec<VictimCacheinfo>> = FxHashMap::default();
    for (edge, scan) in scans.into_iter().take(chosen) {
        for info in &scan.victims {
            pervictim_edgeset
                .entry(info.key.clone())
                .or_default()
                .insert(edge);
            pervictim_cacheinfos
                .entry(info.key.clone())
                .or_default()
                .push(info.clone());
        }
        if !scan.synced_keys.is_empty() {
            plan.peredge_synced_victims.push((edge, scan.synced_keys));
        }
        if !scan.fetched_keys.is_empty() {
            plan.peredge_fetched_victims.push((edge, scan.fetched_keys));
        }
        if scan.need_more {
            plan.fetch_edgeset.insert(edge);
            plan.need_more = true;
        }
    }
    plan.pervictim_edgeset = pervictim_edgeset.into_iter().collect();
    plan.pervictim_cacheinfos = pervictim_cacheinfos.into_iter().collect();
    debug!(
        %key,
        placement = %plan.edgeset,
        benefit,
        eviction_cost,
        need_more = plan.need_more,
        "computed placement"
    );
    plan
}

/// Requester-side fast-path check: with the beacon's hint, decide whether
/// a single local placement already beats the aggregator's weakest slot.
pub fn fast_path_wins(
    own_popularity: Popularity,
    is_global_cached: bool,
    hint_sum: Popularity,
    smallest_max_admission_benefit: DeltaReward,
    params: &BenefitParams,
) -> bool {
    let benefit = local_uncached_reward(1, own_popularity, is_global_cached, hint_sum, params);
    benefit > smallest_max_admission_benefit.max(params.min_admission_benefit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::victim::sync::VictimSync;
    use crate::victim::syncset::VictimSyncset;

    fn aup(edges: &[(EdgeIndex, Popularity)], n: u32) -> AggregatedUncachedPopularity {
        let mut aup = AggregatedUncachedPopularity::new(Key::from("k"), n);
        for (edge, pop) in edges {
            aup.update(*edge, *pop, 8, 0);
        }
        aup
    }

    fn tracker_with(margins: &[(EdgeIndex, u64, Vec<VictimCacheinfo>)]) -> VictimTracker {
        let tracker = VictimTracker::new(9);
        let weights = RewardWeights::default();
        for (edge, margin, victims) in margins {
            let mut sorted = victims.clone();
            crate::victim::cacheinfo::sort_by_reward(&mut sorted, &weights);
            tracker
                .apply_syncset(
                    *edge,
                    &VictimSync {
                        generation: 1,
                        syncset: VictimSyncset::complete(*margin, sorted, vec![]),
                    },
                    &weights,
                )
                .unwrap();
        }
        tracker
    }

    fn victim(key: &str, size: u32, pop: f32) -> VictimCacheinfo {
        VictimCacheinfo {
            key: Key::from(key),
            object_size: size,
            local_cached_popularity: pop,
            redirected_cached_popularity: 0.0,
        }
    }

    #[test]
    fn places_on_edges_with_spare_margin() {
        // 500 KiB object; edge 0 has 200 KiB margin and two victims, edge 1
        // has 600 KiB margin and needs nothing.
        let tracker = tracker_with(&[
            (
                0,
                200 * 1024,
                vec![victim("v1", 256 * 1024, 0.1), victim("v2", 64 * 1024, 0.2)],
            ),
            (1, 600 * 1024, vec![]),
        ]);
        let aup = aup(&[(0, 100.0), (1, 80.0)], 4);
        let plan = plan_placement(
            &Key::from("k4"),
            500 * 1024,
            Some(&aup),
            None,
            &BTreeSet::new(),
            false,
            &tracker,
            &RewardWeights::default(),
            &BenefitParams::default(),
        );
        assert!(!plan.need_more);
        assert_eq!(plan.edgeset, [0, 1].into_iter().collect());
        let victims_on_0: Vec<_> = plan
            .pervictim_edgeset
            .iter()
            .filter(|(_, es)| es.contains(0))
            .map(|(k, _)| k.clone())
            .collect();
        assert_eq!(victims_on_0.len(), 2);
    }

    #[test]
    fn expensive_eviction_shrinks_the_placement() {
        // Edge 1's victims cost more reward than its admission gains.
        let tracker = tracker_with(&[
            (0, 1024, vec![]),
            (1, 0, vec![victim("costly", 1024, 500.0)]),
        ]);
        let aup = aup(&[(0, 10.0), (1, 8.0)], 4);
        let plan = plan_placement(
            &Key::from("k"),
            512,
            Some(&aup),
            None,
            &BTreeSet::new(),
            false,
            &tracker,
            &RewardWeights::default(),
            &BenefitParams::default(),
        );
        assert_eq!(plan.edgeset, [0].into_iter().collect());
    }

    #[test]
    fn worthless_placements_are_empty() {
        let tracker = tracker_with(&[(0, 0, vec![victim("v", 4096, 100.0)])]);
        let aup = aup(&[(0, 0.5)], 2);
        let plan = plan_placement(
            &Key::from("k"),
            1024,
            Some(&aup),
            None,
            &BTreeSet::new(),
            true,
            &tracker,
            &RewardWeights::default(),
            &BenefitParams::default(),
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn writer_joins_the_candidates_on_the_write_path() {
        let tracker = tracker_with(&[(3, 1 << 20, vec![])]);
        let plan = plan_placement(
            &Key::from("k"),
            1024,
            None,
            Some((3, 4.0)),
            &BTreeSet::new(),
            false,
            &tracker,
            &RewardWeights::default(),
            &BenefitParams::default(),
        );
        assert_eq!(plan.edgeset, [3].into_iter().collect());
        assert!(plan.benefit > 0.0);
    }

    #[test]
    fn already_cached_edges_are_excluded() {
        let tracker = tracker_with(&[(0, 1 << 20, vec![]), (1, 1 << 20, vec![])]);
        let aup = aup(&[(0, 10.0), (1, 10.0)], 4);
        let cached: BTreeSet<EdgeIndex> = [0].into_iter().collect();
        let plan = plan_placement(
            &Key::from("k"),
            64,
            Some(&aup),
            None,
            &cached,
            true,
            &tracker,
            &RewardWeights::default(),
            &BenefitParams::default(),
        );
        assert!(!plan.edgeset.contains(0));
    }

    #[test]
    fn insufficient_victims_surface_a_fetch_set() {
        let tracker = tracker_with(&[(0, 0, vec![victim("tiny", 8, 0.01)])]);
        let aup = aup(&[(0, 50.0)], 2);
        let plan = plan_placement(
            &Key::from("k"),
            4096,
            Some(&aup),
            None,
            &BTreeSet::new(),
            false,
            &tracker,
            &RewardWeights::default(),
            &BenefitParams::default(),
        );
        assert!(plan.need_more);
        assert!(plan.fetch_edgeset.contains(0));
    }

    #[test]
    fn fast_path_threshold_respects_the_hint() {
        let params = BenefitParams::default();
        assert!(fast_path_wins(5.0, false, 2.0, 0.0, &params));
        assert!(!fast_path_wins(0.1, true, 0.0, 10.0, &params));
    }
}
