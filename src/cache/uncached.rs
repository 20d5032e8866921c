//! Capped tracking of local-uncached popularity.
//!
//! Each edge counts accesses to keys it does not cache so beacons can
//! aggregate demand. The table is bounded; once full, tracking a new key
//! evicts the least popular entry, and a key dropped this way reports
//! `is_tracked == false` on the next piggyback so the beacon releases its
//! stale contribution.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::types::{Key, Popularity};

struct TableState {
    size_bytes: u64,
    entries: FxHashMap<Key, Popularity>,
}

pub struct UncachedPopularityTable {
    cap_bytes: u64,
    state: RwLock<TableState>,
}

fn entry_size(key: &Key) -> u64 {
    key.len() as u64 + 4
}

impl UncachedPopularityTable {
    pub fn new(cap_bytes: u64) -> Self {
        Self {
            cap_bytes,
            state: RwLock::new(TableState {
                size_bytes: 0,
                entries: FxHashMap::default(),
            }),
        }
    }

    /// Bumps the popularity of `key` after a local miss, returning the new
    /// value.
    pub fn record_miss(&self, key: &Key) -> Popularity {
        let mut state = self.state.write();
        if let Some(pop) = state.entries.get_mut(key) {
            *pop += 1.0;
            return *pop;
        }
        state.size_bytes += entry_size(key);
        state.entries.insert(key.clone(), 1.0);
        while state.size_bytes > self.cap_bytes {
            let Some(coldest) = state
                .entries
                .iter()
                .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            state.size_bytes -= entry_size(&coldest);
            state.entries.remove(&coldest);
        }
        state.entries.get(key).copied().unwrap_or(0.0)
    }

    /// Current tracked popularity, `None` when the cap dropped the key.
    pub fn collected(&self, key: &Key) -> Option<Popularity> {
        self.state.read().entries.get(key).copied()
    }

    /// Stops tracking `key` (it became locally cached); returns whether it
    /// was tracked.
    pub fn forget(&self, key: &Key) -> bool {
        let mut state = self.state.write();
        if state.entries.remove(key).is_some() {
            state.size_bytes -= entry_size(key);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_for_capacity(&self) -> u64 {
        self.state.read().size_bytes
    }
}
