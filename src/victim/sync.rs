//! Outbound victim-sync bookkeeping.
//!
//! Every syncset sent to a destination carries a per-destination generation
//! number. A compressed syncset is only valid against the state the
//! previous generation left behind; when a receiver reports a gap, the
//! sender falls back to a complete syncset.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{CoveredError, Result};
use crate::primitives::bytes::{put_u32_be, Reader};
use crate::types::EdgeIndex;
use crate::victim::syncset::VictimSyncset;

/// A generation-tagged syncset as carried on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct VictimSync {
    pub generation: u32,
    pub syncset: VictimSyncset,
}

impl VictimSync {
    pub fn payload_size(&self) -> usize {
        4 + self.syncset.payload_size()
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u32_be(out, self.generation);
        self.syncset.encode(out);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            generation: r.u32_be()?,
            syncset: VictimSyncset::decode(r)?,
        })
    }
}

struct DestState {
    generation: u32,
    last_complete: VictimSyncset,
    need_complete: bool,
}

/// Per-destination sender state for victim synchronization.
pub struct SyncOutbox {
    dests: Mutex<FxHashMap<EdgeIndex, DestState>>,
}

impl Default for SyncOutbox {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncOutbox {
    pub fn new() -> Self {
        Self {
            dests: Mutex::new(FxHashMap::default()),
        }
    }

    /// Prepares the outbound sync for `dst` from the current complete
    /// snapshot: a delta when the destination is known to hold the previous
    /// snapshot, a complete syncset otherwise.
    pub fn prepare(&self, dst: EdgeIndex, current: VictimSyncset) -> VictimSync {
        assert!(current.is_complete(), "outbox snapshots must be complete");
        let mut dests = self.dests.lock();
        match dests.get_mut(&dst) {
            Some(state) if !state.need_complete => {
                let delta = VictimSyncset::compress(&current, &state.last_complete);
                state.generation = state.generation.wrapping_add(1);
                state.last_complete = current;
                VictimSync {
                    generation: state.generation,
                    syncset: delta,
                }
            }
            Some(state) => {
                state.generation = state.generation.wrapping_add(1);
                state.last_complete = current.clone();
                state.need_complete = false;
                debug!(dst, generation = state.generation, "victim sync fell back to complete");
                VictimSync {
                    generation: state.generation,
                    syncset: current,
                }
            }
            None => {
                dests.insert(
                    dst,
                    DestState {
                        generation: 1,
                        last_complete: current.clone(),
                        need_complete: false,
                    },
                );
                VictimSync {
                    generation: 1,
                    syncset: current,
                }
            }
        }
    }

    /// Records that `dst` dropped our last delta; the next prepared syncset
    /// for it will be complete.
    pub fn mark_stale(&self, dst: EdgeIndex) {
        if let Some(state) = self.dests.lock().get_mut(&dst) {
            state.need_complete = true;
        }
    }
}

/// Receiver-side check that a generation continues the sequence.
pub fn check_generation(expected_prev: u32, incoming: u32) -> Result<()> {
    if incoming == expected_prev.wrapping_add(1) {
        Ok(())
    } else {
        Err(CoveredError::StaleVictimSync(format!(
            "generation {incoming} does not extend {expected_prev}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::RewardWeights;
    use crate::types::Key;
    use crate::victim::cacheinfo::VictimCacheinfo;

    fn snapshot(margin: u64, keys: &[(&str, f32)]) -> VictimSyncset {
        let mut victims: Vec<VictimCacheinfo> = keys
            .iter()
            .map(|(k, pop)| VictimCacheinfo {
                key: Key::from(*k),
                object_size: 16,
                local_cached_popularity: *pop,
                redirected_cached_popularity: 0.0,
            })
            .collect();
        crate::victim::cacheinfo::sort_by_reward(&mut victims, &RewardWeights::default());
        VictimSyncset::complete(margin, victims, vec![])
    }

    #[test]
    fn first_send_is_complete_then_deltas() {
        let outbox = SyncOutbox::new();
        let first = outbox.prepare(1, snapshot(100, &[("a", 1.0)]));
        assert_eq!(first.generation, 1);
        assert!(first.syncset.is_complete());

        let second = outbox.prepare(1, snapshot(90, &[("a", 1.0), ("b", 2.0)]));
        assert_eq!(second.generation, 2);
        assert!(second.syncset.is_compressed());
    }

    #[test]
    fn destinations_are_independent() {
        let outbox = SyncOutbox::new();
        outbox.prepare(1, snapshot(100, &[]));
        let other = outbox.prepare(2, snapshot(100, &[]));
        assert_eq!(other.generation, 1);
        assert!(other.syncset.is_complete());
    }

    #[test]
    fn stale_mark_forces_complete_fallback() {
        let outbox = SyncOutbox::new();
        outbox.prepare(3, snapshot(100, &[("a", 1.0)]));
        outbox.mark_stale(3);
        let next = outbox.prepare(3, snapshot(100, &[("a", 1.0)]));
        assert!(next.syncset.is_complete());
        let after = outbox.prepare(3, snapshot(100, &[("a", 1.0)]));
        assert!(after.syncset.is_compressed());
    }

    #[test]
    fn generation_gaps_are_detected() {
        assert!(check_generation(4, 5).is_ok());
        assert!(check_generation(4, 6).is_err());
        assert!(check_generation(4, 4).is_err());
        assert!(check_generation(u32::MAX, 0).is_ok());
    }
}
