//! Immutable process-wide context: the edge set, beacon selection, and the
//! reward arithmetic shared by victim tracking and placement planning.
//!
//! All constants are fixed at process init and passed explicitly; there are
//! no mutable singletons.

use xxhash_rust::xxh64::xxh64;

use crate::config::CoveredConfig;
use crate::types::{DeltaReward, EdgeIndex, Key, Popularity};

const BEACON_HASH_SEED: u64 = 0x5eed_c0de;

/// Weights of the linear local-reward combination for cached objects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardWeights {
    /// Weight of local cached popularity (w1).
    pub local: f32,
    /// Weight of redirected cached popularity (w2).
    pub redirected: f32,
}

impl RewardWeights {
    pub fn local_reward(&self, local_pop: Popularity, redirected_pop: Popularity) -> DeltaReward {
        self.local * local_pop + self.redirected * redirected_pop
    }
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            local: 1.0,
            redirected: 1.0,
        }
    }
}

/// Parameters of the admission-benefit function used by the aggregator and
/// the placement planner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenefitParams {
    pub local_hit_gain: f32,
    pub cooperative_hit_gain: f32,
    pub min_admission_benefit: f32,
}

impl Default for BenefitParams {
    fn default() -> Self {
        Self {
            local_hit_gain: 1.0,
            cooperative_hit_gain: 0.5,
            min_admission_benefit: 0.0,
        }
    }
}

/// Admission benefit of placing copies at the top `i` reporting edges.
///
/// The placed edges convert their misses into local hits; when the object
/// had no cooperative copy anywhere, the remaining reporting edges convert
/// global misses into cooperative hits. An empty placement yields zero.
pub fn local_uncached_reward(
    top_i: usize,
    topi_sum: Popularity,
    is_global_cached: bool,
    sum_minus_topi: Popularity,
    params: &BenefitParams,
) -> DeltaReward {
    if top_i == 0 {
        return 0.0;
    }
    let direct = params.local_hit_gain * topi_sum;
    let cooperative = if is_global_cached {
        0.0
    } else {
        params.cooperative_hit_gain * sum_minus_topi.max(0.0)
    };
    direct + cooperative
}

/// Fixed cluster-wide constants handed to every subsystem.
#[derive(Debug, Clone)]
pub struct ClusterContext {
    edge_count: u32,
    pub weights: RewardWeights,
    pub benefit: BenefitParams,
    pub fast_path_enabled: bool,
}

impl ClusterContext {
    pub fn new(edge_count: u32, cfg: &CoveredConfig) -> Self {
        assert!(edge_count > 0, "cluster needs at least one edge");
        Self {
            edge_count,
            weights: RewardWeights {
                local: cfg.local_cached_weight,
                redirected: cfg.redirected_cached_weight,
            },
            benefit: BenefitParams {
                local_hit_gain: cfg.local_hit_gain,
                cooperative_hit_gain: cfg.cooperative_hit_gain,
                min_admission_benefit: cfg.min_admission_benefit,
            },
            fast_path_enabled: cfg.fast_path_enabled,
        }
    }

    pub fn edge_count(&self) -> u32 {
        self.edge_count
    }

    /// Deterministically selects the directory authority for a key.
    pub fn beacon_of(&self, key: &Key) -> EdgeIndex {
        (xxh64(key.as_bytes(), BEACON_HASH_SEED) % u64::from(self.edge_count)) as EdgeIndex
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(n: u32) -> ClusterContext {
        ClusterContext::new(n, &CoveredConfig::for_testing())
    }

    #[test]
    fn beacon_is_stable_and_in_range() {
        let ctx = ctx(5);
        let key = Key::from("stable");
        let b = ctx.beacon_of(&key);
        assert!(b < 5);
        for _ in 0..8 {
            assert_eq!(ctx.beacon_of(&key), b);
        }
    }

    #[test]
    fn reward_is_linear_in_both_popularities() {
        let w = RewardWeights {
            local: 2.0,
            redirected: 0.5,
        };
        assert_eq!(w.local_reward(3.0, 4.0), 8.0);
    }

    #[test]
    fn empty_placement_has_zero_benefit() {
        let p = BenefitParams::default();
        assert_eq!(local_uncached_reward(0, 0.0, false, 10.0, &p), 0.0);
    }

    #[test]
    fn cooperative_term_vanishes_when_already_cached() {
        let p = BenefitParams::default();
        let with = local_uncached_reward(1, 2.0, false, 6.0, &p);
        let without = local_uncached_reward(1, 2.0, true, 6.0, &p);
        assert!(with > without);
        assert_eq!(without, 2.0);
    }
}
