//! Process configuration: tuning constants for caching, victim tracking,
//! popularity aggregation, placement, and protocol retry behavior.

use std::path::Path;

use serde::Deserialize;

use crate::error::{CoveredError, Result};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoveredConfig {
    /// Byte capacity of the local edge cache.
    pub cache_capacity_bytes: u64,
    /// Objects larger than this are rejected at admission.
    pub max_object_size_bytes: u32,
    /// Maximum complete victim cacheinfos advertised per edge.
    pub peredge_synced_victimcnt: usize,
    /// Maximum per-key popularity entries retained in the top-k list.
    pub topk_edgecnt: usize,
    /// Byte budget for aggregated uncached popularity metadata.
    pub popularity_aggregation_capacity_bytes: u64,
    /// Fraction of cache capacity granted to local-uncached tracking.
    pub local_uncached_cap_ratio: f64,
    /// Absolute cap for local-uncached tracking.
    pub local_uncached_cap_bytes: u64,
    /// Weight of local cached popularity in the local reward (w1).
    pub local_cached_weight: f32,
    /// Weight of redirected cached popularity in the local reward (w2).
    pub redirected_cached_weight: f32,
    /// Benefit per unit popularity of turning a miss into a local hit.
    pub local_hit_gain: f32,
    /// Benefit per unit popularity of turning a global miss into a
    /// cooperative hit.
    pub cooperative_hit_gain: f32,
    /// Placements whose benefit minus cost falls at or below this are
    /// dropped.
    pub min_admission_benefit: f32,
    /// Whether beacons hand out fast-path hints for untracked keys.
    pub fast_path_enabled: bool,
    /// Whether beacons deploy read-path placements in the background.
    pub background_placement_enabled: bool,
    pub invalidation_timeout_ms: u64,
    pub invalidation_max_retries: u32,
    pub lookup_backoff_ms: u64,
    pub lookup_max_retries: u32,
    pub writelock_backoff_ms: u64,
    pub writelock_max_retries: u32,
    /// How long a placement edge waits on a cooperative fetch before
    /// falling back to the cloud.
    pub cooperative_fetch_timeout_ms: u64,
}

impl Default for CoveredConfig {
    fn default() -> Self {
        Self {
            cache_capacity_bytes: 256 * MIB,
            max_object_size_bytes: (16 * MIB) as u32,
            peredge_synced_victimcnt: 16,
            topk_edgecnt: 8,
            popularity_aggregation_capacity_bytes: 4 * MIB,
            local_uncached_cap_ratio: 0.01,
            local_uncached_cap_bytes: MIB,
            local_cached_weight: 1.0,
            redirected_cached_weight: 1.0,
            local_hit_gain: 1.0,
            cooperative_hit_gain: 0.5,
            min_admission_benefit: 0.0,
            fast_path_enabled: true,
            background_placement_enabled: true,
            invalidation_timeout_ms: 500,
            invalidation_max_retries: 3,
            lookup_backoff_ms: 5,
            lookup_max_retries: 64,
            writelock_backoff_ms: 5,
            writelock_max_retries: 64,
            cooperative_fetch_timeout_ms: 200,
        }
    }
}

impl CoveredConfig {
    /// Small caps and fast timeouts for unit and integration tests.
    pub fn for_testing() -> Self {
        Self {
            cache_capacity_bytes: MIB,
            max_object_size_bytes: (MIB / 2) as u32,
            popularity_aggregation_capacity_bytes: 64 * 1024,
            background_placement_enabled: false,
            invalidation_timeout_ms: 50,
            invalidation_max_retries: 1,
            lookup_backoff_ms: 1,
            writelock_backoff_ms: 1,
            cooperative_fetch_timeout_ms: 20,
            ..Self::default()
        }
    }

    /// Effective byte cap for local-uncached popularity metadata:
    /// `min(ratio × capacity, absolute cap)`.
    pub fn local_uncached_metadata_cap(&self) -> u64 {
        let from_ratio = (self.cache_capacity_bytes as f64 * self.local_uncached_cap_ratio) as u64;
        from_ratio.min(self.local_uncached_cap_bytes)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| CoveredError::InvalidArgument(format!("config: {e}")))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CoveredError::InvalidArgument(format!("config file: {e}")))?;
        Self::from_toml_str(&raw)
    }
}
