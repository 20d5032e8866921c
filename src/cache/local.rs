//! The pluggable per-edge KV engine and its reference LRU implementation.

use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::cluster::RewardWeights;
use crate::types::{Key, Value};
use crate::victim::cacheinfo::{sort_by_reward, VictimCacheinfo};

/// Policy-specific extension calls, named by a closed enumeration rather
/// than further trait surface.
#[derive(Clone, Debug, PartialEq)]
pub enum CustomFunction {
    /// Tells the cache whether a cooperative copy of `key` exists
    /// elsewhere, for policies that partition metadata accordingly.
    SetCooperativeCached { key: Key, cached: bool },
    /// Transfers a virtual-time sample between edges (BestGuess-style
    /// policies).
    VtimeTransfer { vtime: f64 },
}

/// Capability set the core requires from a local cache engine.
///
/// Implementations manage their own thread safety; the wrapper adds the
/// per-key lock discipline on top.
pub trait LocalCache: Send + Sync {
    /// Looks the key up and bumps its popularity counters.
    fn get(&self, key: &Key, is_redirected: bool) -> Option<Value>;

    /// Whether the key is cached, without popularity side effects.
    fn is_cached(&self, key: &Key) -> bool;

    /// Overwrites the value if cached; never admits.
    fn update(&self, key: &Key, value: Value) -> bool;

    /// Inserts the object; the caller has already freed enough space.
    fn admit(&self, key: &Key, value: Value);

    /// Evicts one specific object.
    fn evict_with_given_key(&self, key: &Key) -> Option<Value>;

    /// Evicts objects of the engine's choosing until at least
    /// `required_size` bytes are freed.
    fn evict_no_given_key(&self, required_size: u64) -> Vec<(Key, Value)>;

    /// Candidate victim keys beyond `existing` covering `required_size`;
    /// `None` when the engine cannot free that much.
    fn get_victim_keys(&self, existing: &[Key], required_size: u64) -> Option<Vec<Key>>;

    /// Up to `limit` victim summaries ascending by local reward, skipping
    /// the listed keys.
    fn victim_candidates(
        &self,
        limit: usize,
        skip: &[Key],
        weights: &RewardWeights,
    ) -> Vec<VictimCacheinfo>;

    /// Whether the engine supports per-object eviction decisions.
    fn has_fine_grained_management(&self) -> bool;

    /// Bytes of data plus engine metadata charged against capacity.
    fn size_for_capacity(&self) -> u64;

    fn capacity_bytes(&self) -> u64;

    /// Policy-specific extension hook; returns a scalar when the function
    /// produces one.
    fn invoke_custom_function(&self, func: &CustomFunction) -> Option<f64>;
}

struct LruEntry {
    value: Value,
    local_popularity: f32,
    redirected_popularity: f32,
    cooperative_cached: bool,
}

struct LruState {
    entries: LruCache<Key, LruEntry>,
    used_bytes: u64,
}

/// Reference LRU engine with byte accounting and per-object popularity
/// counters.
pub struct LruLocalCache {
    capacity_bytes: u64,
    state: Mutex<LruState>,
}

fn charged_size(key: &Key, value: &Value) -> u64 {
    key.len() as u64 + u64::from(value.size())
}

impl LruLocalCache {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            state: Mutex::new(LruState {
                entries: LruCache::unbounded(),
                used_bytes: 0,
            }),
        }
    }

    fn remove_entry(state: &mut LruState, key: &Key) -> Option<Value> {
        let entry = state.entries.pop(key)?;
        state.used_bytes -= charged_size(key, &entry.value);
        Some(entry.value)
    }

    /// Whether a metadata update marked `key` as cooperatively cached
    /// elsewhere.
    pub fn is_cooperative_cached(&self, key: &Key) -> bool {
        self.state
            .lock()
            .entries
            .peek(key)
            .is_some_and(|e| e.cooperative_cached)
    }
}

impl LocalCache for LruLocalCache {
    fn get(&self, key: &Key, is_redirected: bool) -> Option<Value> {
        let mut state = self.state.lock();
        let entry = state.entries.get_mut(key)?;
        if is_redirected {
            entry.redirected_popularity += 1.0;
        } else {
            entry.local_popularity += 1.0;
        }
        Some(entry.value.clone())
    }

    fn is_cached(&self, key: &Key) -> bool {
        self.state.lock().entries.contains(key)
    }

    fn update(&self, key: &Key, value: Value) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.entries.get_mut(key) {
            Some(entry) => {
                let old = charged_size(key, &entry.value);
                entry.value = value;
                let new = charged_size(key, &entry.value);
                state.used_bytes = state.used_bytes - old + new;
                true
            }
            None => false,
        }
    }

    fn admit(&self, key: &Key, value: Value) {
        let mut state = self.state.lock();
        if let Some(prior) = state.entries.pop(key) {
            state.used_bytes -= charged_size(key, &prior.value);
        }
        state.used_bytes += charged_size(key, &value);
        state.entries.put(
            key.clone(),
            LruEntry {
                value,
                local_popularity: 0.0,
                redirected_popularity: 0.0,
                cooperative_cached: false,
            },
        );
    }

    fn evict_with_given_key(&self, key: &Key) -> Option<Value> {
        Self::remove_entry(&mut self.state.lock(), key)
    }

    fn evict_no_given_key(&self, required_size: u64) -> Vec<(Key, Value)> {
        let mut state = self.state.lock();
        let mut freed = 0u64;
        let mut evicted = Vec::new();
        while freed < required_size {
            let Some((key, entry)) = state.entries.pop_lru() else {
                break;
            };
            let size = charged_size(&key, &entry.value);
            state.used_bytes -= size;
            freed += size;
            evicted.push((key, entry.value));
        }
        evicted
    }

    fn get_victim_keys(&self, existing: &[Key], required_size: u64) -> Option<Vec<Key>> {
        let state = self.state.lock();
        let skip: FxHashSet<&Key> = existing.iter().collect();
        let mut found = 0u64;
        let mut keys = Vec::new();
        // LRU end first.
        for (key, entry) in state.entries.iter().collect::<Vec<_>>().into_iter().rev() {
            if skip.contains(key) {
                continue;
            }
            found += charged_size(key, &entry.value);
            keys.push(key.clone());
            if found >= required_size {
                return Some(keys);
            }
        }
        None
    }

    fn victim_candidates(
        &self,
        limit: usize,
        skip: &[Key],
        weights: &RewardWeights,
    ) -> Vec<VictimCacheinfo> {
        let state = self.state.lock();
        let skip: FxHashSet<&Key> = skip.iter().collect();
        let mut candidates: Vec<VictimCacheinfo> = state
            .entries
            .iter()
            .filter(|(key, _)| !skip.contains(key))
            .map(|(key, entry)| VictimCacheinfo {
                key: key.clone(),
                object_size: entry.value.size(),
                local_cached_popularity: entry.local_popularity,
                redirected_cached_popularity: entry.redirected_popularity,
            })
            .collect();
        sort_by_reward(&mut candidates, weights);
        candidates.truncate(limit);
        candidates
    }

    fn has_fine_grained_management(&self) -> bool {
        false
    }

    fn size_for_capacity(&self) -> u64 {
        self.state.lock().used_bytes
    }

    fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    fn invoke_custom_function(&self, func: &CustomFunction) -> Option<f64> {
        match func {
            CustomFunction::SetCooperativeCached { key, cached } => {
                let mut state = self.state.lock();
                if let Some(entry) = state.entries.peek_mut(key) {
                    entry.cooperative_cached = *cached;
                }
                None
            }
            CustomFunction::VtimeTransfer { vtime } => Some(*vtime),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(len: usize) -> Value {
        Value::new(vec![0u8; len])
    }

    #[test]
    fn admit_get_update_account_bytes() {
        let cache = LruLocalCache::new(1024);
        let key = Key::from("k");
        cache.admit(&key, value(10));
        assert_eq!(cache.size_for_capacity(), 11);
        assert!(cache.update(&key, value(20)));
        assert_eq!(cache.size_for_capacity(), 21);
        assert!(cache.get(&key, false).is_some());
        assert!(!cache.update(&Key::from("missing"), value(1)));
    }

    #[test]
    fn eviction_frees_lru_objects_first() {
        let cache = LruLocalCache::new(1024);
        cache.admit(&Key::from("old"), value(10));
        cache.admit(&Key::from("new"), value(10));
        cache.get(&Key::from("old"), false);
        let evicted = cache.evict_no_given_key(1);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0, Key::from("new"));
    }

    #[test]
    fn victim_candidates_sort_by_reward() {
        let cache = LruLocalCache::new(1024);
        let weights = RewardWeights::default();
        cache.admit(&Key::from("cold"), value(4));
        cache.admit(&Key::from("warm"), value(4));
        cache.admit(&Key::from("hot"), value(4));
        for _ in 0..3 {
            cache.get(&Key::from("hot"), false);
        }
        cache.get(&Key::from("warm"), true);
        let victims = cache.victim_candidates(2, &[], &weights);
        assert_eq!(victims[0].key, Key::from("cold"));
        assert_eq!(victims[1].key, Key::from("warm"));
    }

    #[test]
    fn victim_keys_cover_required_size_or_none() {
        let cache = LruLocalCache::new(1024);
        cache.admit(&Key::from("a"), value(10));
        cache.admit(&Key::from("b"), value(10));
        let keys = cache.get_victim_keys(&[], 15).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(cache.get_victim_keys(&[], 1_000_000).is_none());
    }

    #[test]
    fn cooperative_flag_is_settable() {
        let cache = LruLocalCache::new(1024);
        let key = Key::from("k");
        cache.admit(&key, value(1));
        assert!(!cache.is_cooperative_cached(&key));
        assert!(cache
            .invoke_custom_function(&CustomFunction::SetCooperativeCached {
                key: key.clone(),
                cached: true,
            })
            .is_none());
        assert!(cache.is_cooperative_cached(&key));
    }
}
