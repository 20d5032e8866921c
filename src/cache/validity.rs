//! Per-key validity flags for the local edge cache.
//!
//! Because writes are written through to the cloud, MSI coherence here
//! collapses to a single validity bit per key: entry absent means the key
//! is untracked, `false` means a stale copy that must refresh on the next
//! read, `true` means the copy may be served locally.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::types::Key;

#[derive(Default)]
pub struct ValidityMap {
    entries: RwLock<FxHashMap<Key, bool>>,
}

impl ValidityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(present, valid)`.
    pub fn is_valid(&self, key: &Key) -> (bool, bool) {
        match self.entries.read().get(key) {
            Some(valid) => (true, *valid),
            None => (false, false),
        }
    }

    /// Marks `key` valid, inserting the entry if absent; returns whether it
    /// existed.
    pub fn validate(&self, key: &Key) -> bool {
        self.entries.write().insert(key.clone(), true).is_some()
    }

    /// Marks `key` invalid, inserting the entry if absent; returns whether
    /// it existed.
    pub fn invalidate(&self, key: &Key) -> bool {
        self.entries.write().insert(key.clone(), false).is_some()
    }

    /// Drops the entry; returns whether it existed.
    pub fn erase(&self, key: &Key) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Only the flag is charged: key bytes are already accounted by the
    /// local cache that stores the object.
    pub fn size_for_capacity(&self) -> u64 {
        self.entries.read().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_absent_valid_invalid_erased() {
        let map = ValidityMap::new();
        let key = Key::from("k");
        assert_eq!(map.is_valid(&key), (false, false));
        assert!(!map.validate(&key));
        assert_eq!(map.is_valid(&key), (true, true));
        assert!(map.invalidate(&key));
        assert_eq!(map.is_valid(&key), (true, false));
        assert!(map.erase(&key));
        assert!(!map.erase(&key));
        assert_eq!(map.is_valid(&key), (false, false));
    }

    #[test]
    fn invalidate_inserts_for_unseen_keys() {
        let map = ValidityMap::new();
        assert!(!map.invalidate(&Key::from("new")));
        assert_eq!(map.is_valid(&Key::from("new")), (true, false));
        assert_eq!(map.size_for_capacity(), 1);
    }
}
