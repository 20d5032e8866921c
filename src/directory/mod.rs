//! Beacon-side per-key directory and write-lock state machine.
//!
//! For each key it beacons, a node tracks the sharer set, the write-lock
//! state, and the last successful writer. Writes follow
//! Unlocked → Blocking → AcquiredBy → Unlocked; invalidation acks drive
//! Blocking forward and remove the acked sharers. The per-key lock is never
//! held across the invalidation round trips, only around each transition.

use std::collections::BTreeSet;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::error::Result;
use crate::primitives::bytes::{put_u32_be, Reader};
use crate::primitives::keylock::PerkeyRwlock;
use crate::types::{EdgeIndex, Key};

/// One sharer named by a directory lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DirectoryInfo {
    pub target_edge: EdgeIndex,
}

impl DirectoryInfo {
    pub fn payload_size(&self) -> usize {
        4
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u32_be(out, self.target_edge);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            target_edge: r.u32_be()?,
        })
    }
}

/// Write-lock state of one key at its beacon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteLockState {
    Unlocked,
    Blocking {
        holder: EdgeIndex,
        pending: BTreeSet<EdgeIndex>,
    },
    AcquiredBy(EdgeIndex),
}

impl WriteLockState {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, WriteLockState::Unlocked)
    }
}

#[derive(Clone, Debug)]
struct DirectoryEntry {
    cached_edges: BTreeSet<EdgeIndex>,
    write_lock: WriteLockState,
    last_writer: Option<EdgeIndex>,
}

impl DirectoryEntry {
    fn new() -> Self {
        Self {
            cached_edges: BTreeSet::new(),
            write_lock: WriteLockState::Unlocked,
            last_writer: None,
        }
    }

    fn is_prunable(&self) -> bool {
        self.cached_edges.is_empty() && self.write_lock.is_unlocked()
    }
}

/// Result of a directory lookup.
#[derive(Clone, Debug, PartialEq)]
pub enum LookupResult {
    /// The key is under a write; the requester must back off and retry.
    BeingWritten,
    /// A sharer holds a valid copy.
    Valid(DirectoryInfo),
    /// No sharer anywhere.
    Missing,
}

/// Instruction to tell one sharer whether a cooperative copy now exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetadataNotify {
    pub target: EdgeIndex,
    pub is_cooperative_cached: bool,
}

/// Outcome of a write-lock acquisition attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum WritelockStart {
    /// No sharers to invalidate; the lock is held immediately.
    Granted,
    /// Invalidations must be delivered to these edges before the grant.
    Blocking(Vec<EdgeIndex>),
    /// Another writer holds or is acquiring the lock.
    Busy,
}

pub struct DirectoryTable {
    node_idx: EdgeIndex,
    entries: RwLock<FxHashMap<Key, DirectoryEntry>>,
    keylocks: PerkeyRwlock,
}

impl DirectoryTable {
    pub fn new(node_idx: EdgeIndex) -> Self {
        Self {
            node_idx,
            entries: RwLock::new(FxHashMap::default()),
            keylocks: PerkeyRwlock::new(),
        }
    }

    /// Chooses a sharer for `requester`, preferring a different edge and
    /// breaking ties toward the last writer. Returns `BeingWritten` while
    /// any write is in flight.
    pub fn lookup(&self, key: &Key, requester: EdgeIndex) -> LookupResult {
        let _guard = self.keylocks.read(key);
        let entries = self.entries.read();
        let Some(entry) = entries.get(key) else {
            return LookupResult::Missing;
        };
        if !entry.write_lock.is_unlocked() {
            return LookupResult::BeingWritten;
        }
        if entry.cached_edges.is_empty() {
            return LookupResult::Missing;
        }
        let chosen = entry
            .last_writer
            .filter(|w| *w != requester && entry.cached_edges.contains(w))
            .or_else(|| entry.cached_edges.iter().copied().find(|e| *e != requester))
            .or_else(|| entry.cached_edges.iter().copied().next())
            .expect("non-empty sharer set");
        LookupResult::Valid(DirectoryInfo {
            target_edge: chosen,
        })
    }

    /// Adds `edge` to the sharer set. Sharers cannot join while a write is
    /// in flight; such admissions are rejected so the edge can invalidate
    /// its possibly stale copy.
    pub fn admit(&self, key: &Key, edge: EdgeIndex) -> (bool, SmallVec<[MetadataNotify; 2]>) {
        let _guard = self.keylocks.write(key);
        let mut entries = self.entries.write();
        let entry = entries.entry(key.clone()).or_insert_with(DirectoryEntry::new);
        let mut notifies = SmallVec::new();
        if !entry.write_lock.is_unlocked() {
            warn!(beacon = self.node_idx, %key, edge, "directory admit rejected during write");
            return (false, notifies);
        }
        if !entry.cached_edges.insert(edge) {
            return (true, notifies);
        }
        match entry.cached_edges.len() {
            1 => notifies.push(MetadataNotify {
                target: edge,
                is_cooperative_cached: false,
            }),
            2 => {
                let other = entry
                    .cached_edges
                    .iter()
                    .copied()
                    .find(|e| *e != edge)
                    .expect("two sharers");
                notifies.push(MetadataNotify {
                    target: other,
                    is_cooperative_cached: true,
                });
            }
            _ => {}
        }
        debug!(beacon = self.node_idx, %key, edge, sharers = entry.cached_edges.len(), "directory admit");
        (true, notifies)
    }

    /// Removes `edge` from the sharer set.
    pub fn evict(&self, key: &Key, edge: EdgeIndex) -> SmallVec<[MetadataNotify; 2]> {
        let _guard = self.keylocks.write(key);
        let mut entries = self.entries.write();
        let mut notifies = SmallVec::new();
        let Some(entry) = entries.get_mut(key) else {
            return notifies;
        };
        if !entry.cached_edges.remove(&edge) {
            return notifies;
        }
        if entry.cached_edges.len() == 1 {
            let remaining = entry
                .cached_edges
                .iter()
                .copied()
                .next()
                .expect("one sharer");
            notifies.push(MetadataNotify {
                target: remaining,
                is_cooperative_cached: false,
            });
        }
        if entry.is_prunable() {
            entries.remove(key);
        }
        notifies
    }

    /// Starts a write-lock acquisition for `requester`.
    pub fn begin_writelock(&self, key: &Key, requester: EdgeIndex) -> WritelockStart {
        let _guard = self.keylocks.write(key);
        let mut entries = self.entries.write();
        let entry = entries.entry(key.clone()).or_insert_with(DirectoryEntry::new);
        match &entry.write_lock {
            WriteLockState::Unlocked => {
                let pending: BTreeSet<EdgeIndex> = entry
                    .cached_edges
                    .iter()
                    .copied()
                    .filter(|e| *e != requester)
                    .collect();
                if pending.is_empty() {
                    entry.write_lock = WriteLockState::AcquiredBy(requester);
                    debug!(beacon = self.node_idx, %key, requester, "writelock granted directly");
                    WritelockStart::Granted
                } else {
                    let targets: Vec<EdgeIndex> = pending.iter().copied().collect();
                    entry.write_lock = WriteLockState::Blocking {
                        holder: requester,
                        pending,
                    };
                    debug!(beacon = self.node_idx, %key, requester, ?targets, "writelock blocking on invalidations");
                    WritelockStart::Blocking(targets)
                }
            }
            _ => WritelockStart::Busy,
        }
    }

    /// Records one invalidation ack; the acked edge leaves the sharer set.
    /// Returns true when this was the last pending ack and the lock moved
    /// to `AcquiredBy(holder)`.
    pub fn ack_invalidation(&self, key: &Key, holder: EdgeIndex, acked: EdgeIndex) -> bool {
        let _guard = self.keylocks.write(key);
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        let WriteLockState::Blocking {
            holder: blocked_by,
            pending,
        } = &mut entry.write_lock
        else {
            return false;
        };
        assert_eq!(*blocked_by, holder, "invalidation ack for a foreign writelock");
        pending.remove(&acked);
        let all_acked = pending.is_empty();
        entry.cached_edges.remove(&acked);
        if all_acked {
            entry.write_lock = WriteLockState::AcquiredBy(holder);
            debug!(beacon = self.node_idx, %key, holder, "writelock granted after invalidations");
            return true;
        }
        false
    }

    /// Aborts an acquisition whose invalidations timed out; un-acked
    /// sharers are dropped from the directory so a later lookup cannot
    /// hand them out as valid.
    pub fn abort_writelock(&self, key: &Key, holder: EdgeIndex) {
        let _guard = self.keylocks.write(key);
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if let WriteLockState::Blocking {
            holder: blocked_by,
            pending,
        } = &entry.write_lock
        {
            assert_eq!(*blocked_by, holder, "abort of a foreign writelock");
            for edge in pending.clone() {
                entry.cached_edges.remove(&edge);
            }
            entry.write_lock = WriteLockState::Unlocked;
            warn!(beacon = self.node_idx, %key, holder, "writelock aborted after invalidation timeout");
            if entry.is_prunable() {
                entries.remove(key);
            }
        }
    }

    /// Completes a write: the writer becomes the only sharer when it holds
    /// a valid copy, the sole record of the write otherwise.
    pub fn release_writelock(&self, key: &Key, holder: EdgeIndex, writer_cached: bool) {
        let _guard = self.keylocks.write(key);
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(key)
            .expect("release of a writelock that was never acquired");
        assert_eq!(
            entry.write_lock,
            WriteLockState::AcquiredBy(holder),
            "release of a writelock held elsewhere"
        );
        entry.cached_edges.clear();
        if writer_cached {
            entry.cached_edges.insert(holder);
        }
        entry.last_writer = Some(holder);
        entry.write_lock = WriteLockState::Unlocked;
        debug!(beacon = self.node_idx, %key, holder, writer_cached, "writelock released");
    }

    pub fn cached_edges(&self, key: &Key) -> BTreeSet<EdgeIndex> {
        self.entries
            .read()
            .get(key)
            .map(|e| e.cached_edges.clone())
            .unwrap_or_default()
    }

    pub fn is_global_cached(&self, key: &Key) -> bool {
        !self.cached_edges(key).is_empty()
    }

    pub fn write_lock_state(&self, key: &Key) -> WriteLockState {
        self.entries
            .read()
            .get(key)
            .map(|e| e.write_lock.clone())
            .unwrap_or(WriteLockState::Unlocked)
    }

    pub fn node_idx(&self) -> EdgeIndex {
        self.node_idx
    }
}
