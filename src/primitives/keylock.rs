//! Per-key read-write locks.
//!
//! Lock slots are allocated on first use and freed when the last guard for
//! the key drops, so the registry only ever holds keys with live holders or
//! waiters. The registry itself is sharded; shard mutexes are released
//! before blocking on a key lock, preserving the structural-then-per-key
//! lock order.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use rustc_hash::{FxHashMap, FxHasher};

use crate::types::Key;

const SHARD_COUNT: usize = 64;

type Slot = Arc<RwLock<()>>;

struct SlotEntry {
    lock: Slot,
    refs: usize,
}

/// A registry of independent per-key read-write locks.
///
/// Locks for distinct keys never contend; a writer excludes readers of the
/// same key; parking_lot's fair queueing keeps readers from starving
/// writers. Misuse (dropping an unheld lock) is unrepresentable because
/// release happens only from guard drops.
pub struct PerkeyRwlock {
    shards: Box<[Mutex<FxHashMap<Key, SlotEntry>>]>,
}

impl Default for PerkeyRwlock {
    fn default() -> Self {
        Self::new()
    }
}

impl PerkeyRwlock {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(FxHashMap::default()))
            .collect::<Vec<_>>();
        Self {
            shards: shards.into_boxed_slice(),
        }
    }

    fn shard(&self, key: &Key) -> &Mutex<FxHashMap<Key, SlotEntry>> {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    fn acquire_slot(&self, key: &Key) -> Slot {
        let mut shard = self.shard(key).lock();
        let entry = shard.entry(key.clone()).or_insert_with(|| SlotEntry {
            lock: Arc::new(RwLock::new(())),
            refs: 0,
        });
        entry.refs += 1;
        entry.lock.clone()
    }

    fn release_slot(&self, key: &Key) {
        let mut shard = self.shard(key).lock();
        let entry = shard.get_mut(key).expect("released key has a slot");
        assert!(entry.refs > 0, "per-key lock released below zero holders");
        entry.refs -= 1;
        if entry.refs == 0 {
            shard.remove(key);
        }
    }

    /// Acquires the shared lock for `key`, blocking.
    pub fn read(&self, key: &Key) -> KeyReadGuard<'_> {
        let slot = self.acquire_slot(key);
        let guard = slot.read_arc();
        KeyReadGuard {
            owner: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Acquires the exclusive lock for `key`, blocking.
    pub fn write(&self, key: &Key) -> KeyWriteGuard<'_> {
        let slot = self.acquire_slot(key);
        let guard = slot.write_arc();
        KeyWriteGuard {
            owner: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Non-blocking shared acquisition.
    pub fn try_read(&self, key: &Key) -> Option<KeyReadGuard<'_>> {
        let slot = self.acquire_slot(key);
        match slot.try_read_arc() {
            Some(guard) => Some(KeyReadGuard {
                owner: self,
                key: key.clone(),
                guard: Some(guard),
            }),
            None => {
                self.release_slot(key);
                None
            }
        }
    }

    /// Non-blocking exclusive acquisition.
    pub fn try_write(&self, key: &Key) -> Option<KeyWriteGuard<'_>> {
        let slot = self.acquire_slot(key);
        match slot.try_write_arc() {
            Some(guard) => Some(KeyWriteGuard {
                owner: self,
                key: key.clone(),
                guard: Some(guard),
            }),
            None => {
                self.release_slot(key);
                None
            }
        }
    }

    /// Number of keys with live lock state, for tests and capacity checks.
    pub fn live_keys(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}

pub struct KeyReadGuard<'a> {
    owner: &'a PerkeyRwlock,
    key: Key,
    guard: Option<ArcRwLockReadGuard<RawRwLock, ()>>,
}

impl Drop for KeyReadGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.owner.release_slot(&self.key);
    }
}

pub struct KeyWriteGuard<'a> {
    owner: &'a PerkeyRwlock,
    key: Key,
    guard: Option<ArcRwLockWriteGuard<RawRwLock, ()>>,
}

impl Drop for KeyWriteGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.owner.release_slot(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn readers_share_writers_exclude() {
        let locks = PerkeyRwlock::new();
        let key = Key::from("k");
        let r1 = locks.read(&key);
        let _r2 = locks.read(&key);
        assert!(locks.try_write(&key).is_none());
        drop(r1);
        assert!(locks.try_write(&key).is_none());
        drop(_r2);
        assert!(locks.try_write(&key).is_some());
    }

    #[test]
    fn distinct_keys_never_contend() {
        let locks = PerkeyRwlock::new();
        let _w = locks.write(&Key::from("a"));
        assert!(locks.try_write(&Key::from("b")).is_some());
    }

    #[test]
    fn slots_are_freed_when_last_holder_drops() {
        let locks = PerkeyRwlock::new();
        let key = Key::from("transient");
        {
            let _g = locks.write(&key);
            assert_eq!(locks.live_keys(), 1);
        }
        assert_eq!(locks.live_keys(), 0);
    }

    #[test]
    fn writer_blocks_until_readers_leave() {
        let locks = Arc::new(PerkeyRwlock::new());
        let key = Key::from("contended");
        let entered = Arc::new(AtomicUsize::new(0));

        let guard = locks.read(&key);
        let locks2 = Arc::clone(&locks);
        let entered2 = Arc::clone(&entered);
        let key2 = key.clone();
        let handle = thread::spawn(move || {
            let _w = locks2.write(&key2);
            entered2.store(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(30));
        assert_eq!(entered.load(Ordering::SeqCst), 0);
        drop(guard);
        handle.join().unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
        assert_eq!(locks.live_keys(), 0);
    }
}
