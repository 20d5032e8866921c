//! The per-edge cache facade with MSI semantics.
//!
//! Composes the local KV engine, the validity map, and the per-key lock
//! registry behind one thread-safe interface. Read paths take the shared
//! per-key lock, mutators the exclusive one; admission and eviction are
//! additionally serialized edge-wide.

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::local::LocalCache;
use crate::cache::uncached::UncachedPopularityTable;
use crate::cache::validity::ValidityMap;
use crate::cluster::RewardWeights;
use crate::config::CoveredConfig;
use crate::error::{CoveredError, Result};
use crate::popularity::collected::CollectedPopularity;
use crate::primitives::keylock::PerkeyRwlock;
use crate::types::{EdgeIndex, Key, ObjectSize, Value};
use crate::victim::cacheinfo::VictimCacheinfo;

/// Outcome of a cache read.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheLookup {
    pub cached: bool,
    pub valid: bool,
    pub value: Option<Value>,
}

impl CacheLookup {
    pub fn hit(&self) -> bool {
        self.cached && self.valid
    }
}

pub struct CacheWrapper {
    edge_idx: EdgeIndex,
    local: Box<dyn LocalCache>,
    validity: ValidityMap,
    keylocks: PerkeyRwlock,
    uncached: UncachedPopularityTable,
    admission: Mutex<()>,
    weights: RewardWeights,
    synced_victimcnt: usize,
    max_object_size: ObjectSize,
}

impl CacheWrapper {
    pub fn new(
        edge_idx: EdgeIndex,
        local: Box<dyn LocalCache>,
        cfg: &CoveredConfig,
        weights: RewardWeights,
    ) -> Self {
        Self {
            edge_idx,
            local,
            validity: ValidityMap::new(),
            keylocks: PerkeyRwlock::new(),
            uncached: UncachedPopularityTable::new(cfg.local_uncached_metadata_cap()),
            admission: Mutex::new(()),
            weights,
            synced_victimcnt: cfg.peredge_synced_victimcnt,
            max_object_size: cfg.max_object_size_bytes,
        }
    }

    pub fn edge_idx(&self) -> EdgeIndex {
        self.edge_idx
    }

    /// Serves `key` locally when it is cached and valid; never mutates
    /// contents, but bumps the engine's popularity counters.
    pub fn get(&self, key: &Key, is_redirected: bool) -> CacheLookup {
        let _guard = self.keylocks.read(key);
        match self.local.get(key, is_redirected) {
            Some(value) => {
                let (_, valid) = self.validity.is_valid(key);
                CacheLookup {
                    cached: true,
                    valid,
                    value: valid.then_some(value),
                }
            }
            None => CacheLookup {
                cached: false,
                valid: false,
                value: None,
            },
        }
    }

    pub fn is_locally_cached(&self, key: &Key) -> bool {
        let _guard = self.keylocks.read(key);
        self.local.is_cached(key)
    }

    pub fn is_valid_locally_cached(&self, key: &Key) -> bool {
        let _guard = self.keylocks.read(key);
        self.local.is_cached(key) && self.validity.is_valid(key).1
    }

    /// Write path after the writelock is granted: overwrites a cached copy
    /// and marks it valid; leaves the cache untouched otherwise.
    pub fn update(&self, key: &Key, value: Value) -> bool {
        let _guard = self.keylocks.write(key);
        if self.local.update(key, value) {
            self.validity.validate(key);
            true
        } else {
            false
        }
    }

    /// Write path for deletions: tombstones a cached copy in place.
    pub fn remove(&self, key: &Key) -> bool {
        self.update(key, Value::tombstone())
    }

    /// Folds a fetched response into a locally-cached-but-invalid entry.
    pub fn update_if_invalid_for_getrsp(&self, key: &Key, value: Value) -> bool {
        let _guard = self.keylocks.write(key);
        let (present, valid) = self.validity.is_valid(key);
        if present && !valid && self.local.is_cached(key) {
            self.local.update(key, value);
            self.validity.validate(key);
            true
        } else {
            false
        }
    }

    pub fn remove_if_invalid_for_getrsp(&self, key: &Key) -> bool {
        self.update_if_invalid_for_getrsp(key, Value::tombstone())
    }

    /// MSI invalidation entry point; inserts an invalid entry even when the
    /// key is not cached so a later admission starts stale.
    pub fn invalidate_key_for_local_cached_object(&self, key: &Key) {
        let _guard = self.keylocks.write(key);
        self.validity.invalidate(key);
    }

    /// Admits an object, evicting as needed to fit; oversized objects are
    /// rejected and marked invalid.
    pub fn admit(&self, key: &Key, value: Value, is_valid: bool) -> Result<Vec<(Key, Value)>> {
        let size = value.size();
        if size > self.max_object_size {
            {
                let _guard = self.keylocks.write(key);
                self.validity.invalidate(key);
            }
            warn!(edge = self.edge_idx, %key, size, "admission rejected: object too large");
            return Err(CoveredError::Capacity(format!(
                "object of {size} bytes exceeds the {}-byte limit",
                self.max_object_size
            )));
        }
        let _admission = self.admission.lock();
        let needed = (self.local.size_for_capacity() + u64::from(size) + key.len() as u64)
            .saturating_sub(self.local.capacity_bytes());
        let evicted = if needed > 0 {
            self.evict_locked(needed)
        } else {
            Vec::new()
        };
        {
            let _guard = self.keylocks.write(key);
            self.local.admit(key, value);
            if is_valid {
                self.validity.validate(key);
            } else {
                self.validity.invalidate(key);
            }
        }
        self.uncached.forget(key);
        debug!(edge = self.edge_idx, %key, size, evicted = evicted.len(), "admitted object");
        Ok(evicted)
    }

    /// Frees at least `required_size` bytes. Callers must not run two
    /// mutating capacity operations concurrently on one edge; the internal
    /// admission mutex enforces that.
    pub fn evict(&self, required_size: u64) -> Vec<(Key, Value)> {
        let _admission = self.admission.lock();
        self.evict_locked(required_size)
    }

    fn evict_locked(&self, required_size: u64) -> Vec<(Key, Value)> {
        let victims = if self.local.has_fine_grained_management() {
            match self.local.get_victim_keys(&[], required_size) {
                Some(keys) => keys
                    .into_iter()
                    .filter_map(|key| {
                        let value = self.local.evict_with_given_key(&key)?;
                        Some((key, value))
                    })
                    .collect(),
                // The engine cannot name enough victims; fall back to its
                // bulk eviction.
                None => self.local.evict_no_given_key(required_size),
            }
        } else {
            self.local.evict_no_given_key(required_size)
        };
        for (key, _) in &victims {
            let _guard = self.keylocks.write(key);
            self.validity.erase(key);
        }
        victims
    }

    /// The edge's advertised victim set: up to `peredge_synced_victimcnt`
    /// complete summaries ascending by local reward.
    pub fn get_local_synced_victim_cacheinfos(&self) -> Vec<VictimCacheinfo> {
        self.local
            .victim_candidates(self.synced_victimcnt, &[], &self.weights)
    }

    /// Drains extra victims beyond the synced set until their sizes cover
    /// `required_size`; returns whether enough were found.
    pub fn fetch_victim_cacheinfos_for_required_size(
        &self,
        out: &mut Vec<VictimCacheinfo>,
        required_size: u64,
    ) -> bool {
        let synced: Vec<Key> = self
            .get_local_synced_victim_cacheinfos()
            .into_iter()
            .map(|v| v.key)
            .collect();
        let extras = self
            .local
            .victim_candidates(usize::MAX, &synced, &self.weights);
        let mut covered = 0u64;
        for info in extras {
            covered += u64::from(info.object_size);
            out.push(info);
            if covered >= required_size {
                return true;
            }
        }
        false
    }

    /// Bumps local-uncached popularity after a miss.
    pub fn record_local_miss(&self, key: &Key) {
        if !self.is_locally_cached(key) {
            self.uncached.record_miss(key);
        }
    }

    /// The piggyback fragment for `key`: untracked when the key is locally
    /// cached or the capped table dropped it.
    pub fn collected_popularity(&self, key: &Key) -> CollectedPopularity {
        if self.is_locally_cached(key) {
            return CollectedPopularity::untracked();
        }
        match self.uncached.collected(key) {
            Some(popularity) => CollectedPopularity::tracked(popularity),
            None => CollectedPopularity::untracked(),
        }
    }

    pub fn cache_margin_bytes(&self) -> u64 {
        self.local
            .capacity_bytes()
            .saturating_sub(self.local.size_for_capacity())
    }

    pub fn size_for_capacity(&self) -> u64 {
        self.local.size_for_capacity()
            + self.validity.size_for_capacity()
            + self.uncached.size_for_capacity()
    }

    pub fn local_cache(&self) -> &dyn LocalCache {
        self.local.as_ref()
    }
}
