//! Complete and delta-compressed victim syncsets.
//!
//! A complete syncset snapshots one edge's advertised victim state: its
//! cache margin, its synced victim summaries, and the sharer sets of the
//! victims it beacons. A compressed syncset carries only what changed since
//! the previous syncset sent to the same destination; applying it to that
//! previous state recovers the snapshot exactly.

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cluster::RewardWeights;
use crate::error::{CoveredError, Result};
use crate::primitives::bytes::{put_bytes, put_i32_be, put_u32_be, put_u64_be, put_u8, Reader};
use crate::types::Key;
use crate::victim::cacheinfo::{sort_by_reward, VictimCacheinfo, VictimDelta};
use crate::victim::dirinfo::{DirinfoSet, WireDirinfoSet};

const COMPRESSED_FLAG: u8 = 0b00_0001;
const MARGIN_DELTA: u8 = 0b00_0010;
const VICTIMS_DEDUP: u8 = 0b00_0100;
const VICTIMS_EMPTY: u8 = 0b00_1000;
const BEACONED_DEDUP: u8 = 0b01_0000;
const BEACONED_EMPTY: u8 = 0b10_0000;

/// Remaining local cache space, absolute or as a 32-bit delta when the
/// change since the last sync fits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheMargin {
    Bytes(u64),
    Delta(i32),
}

#[derive(Clone, Debug, PartialEq)]
pub struct VictimSyncset {
    compressed: bool,
    margin: CacheMargin,
    victims: Vec<VictimDelta>,
    beaconed: Vec<(Key, WireDirinfoSet)>,
}

impl VictimSyncset {
    /// Builds a complete syncset. `victims` must already be sorted
    /// ascending by local reward; beaconed keys must name synced victims.
    pub fn complete(
        cache_margin_bytes: u64,
        victims: Vec<VictimCacheinfo>,
        beaconed: Vec<(Key, DirinfoSet)>,
    ) -> Self {
        #[cfg(debug_assertions)]
        {
            let keys: FxHashSet<&Key> = victims.iter().map(|v| &v.key).collect();
            for (key, _) in &beaconed {
                debug_assert!(keys.contains(key), "beaconed key {key} is not a victim");
            }
        }
        // An empty sharer set carries no information; absent and empty are
        // the same state on both ends.
        let mut beaconed: Vec<(Key, WireDirinfoSet)> = beaconed
            .into_iter()
            .filter(|(_, s)| !s.is_empty())
            .map(|(k, s)| (k, WireDirinfoSet::Complete(s)))
            .collect();
        beaconed.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            compressed: false,
            margin: CacheMargin::Bytes(cache_margin_bytes),
            victims: victims.iter().map(VictimDelta::complete).collect(),
            beaconed,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.compressed
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn cache_margin(&self) -> CacheMargin {
        self.margin
    }

    pub fn victims(&self) -> &[VictimDelta] {
        &self.victims
    }

    pub fn beaconed(&self) -> &[(Key, WireDirinfoSet)] {
        &self.beaconed
    }

    /// Materializes the victim list of a complete syncset.
    pub fn complete_victims(&self) -> Result<Vec<VictimCacheinfo>> {
        if self.compressed {
            return Err(CoveredError::InvalidArgument(
                "compressed syncset has no complete victim list".into(),
            ));
        }
        self.victims.iter().map(|d| d.apply(None)).collect()
    }

    /// Materializes the beaconed sharer sets of a complete syncset.
    pub fn complete_beaconed(&self) -> Result<Vec<(Key, DirinfoSet)>> {
        if self.compressed {
            return Err(CoveredError::InvalidArgument(
                "compressed syncset has no complete dirinfo sets".into(),
            ));
        }
        self.beaconed
            .iter()
            .map(|(k, w)| Ok((k.clone(), w.recover(None)?)))
            .collect()
    }

    pub fn complete_margin_bytes(&self) -> Result<u64> {
        match self.margin {
            CacheMargin::Bytes(b) => Ok(b),
            CacheMargin::Delta(_) => Err(CoveredError::InvalidArgument(
                "compressed syncset carries a margin delta".into(),
            )),
        }
    }

    /// Computes the smallest syncset that recovers `cur` given that the
    /// destination holds `prev`. Both inputs must be complete.
    pub fn compress(cur: &VictimSyncset, prev: &VictimSyncset) -> VictimSyncset {
        assert!(cur.is_complete() && prev.is_complete());
        let cur_margin = match cur.margin {
            CacheMargin::Bytes(b) => b,
            CacheMargin::Delta(_) => unreachable!(),
        };
        let prev_margin = match prev.margin {
            CacheMargin::Bytes(b) => b,
            CacheMargin::Delta(_) => unreachable!(),
        };
        let diff = cur_margin as i128 - prev_margin as i128;
        let margin = if let Ok(delta) = i32::try_from(diff) {
            CacheMargin::Delta(delta)
        } else {
            CacheMargin::Bytes(cur_margin)
        };

        let prev_victims: FxHashMap<Key, VictimCacheinfo> = prev
            .complete_victims()
            .expect("complete syncset")
            .into_iter()
            .map(|v| (v.key.clone(), v))
            .collect();
        let cur_keys: FxHashSet<Key> = cur.victims.iter().map(|d| d.key.clone()).collect();

        let mut victims = Vec::new();
        for delta in &cur.victims {
            let info = delta.apply(None).expect("complete syncset");
            match prev_victims.get(&info.key) {
                Some(prev_info) => {
                    if let Some(diff) = VictimDelta::diff(&info, prev_info) {
                        victims.push(diff);
                    }
                }
                None => victims.push(VictimDelta::complete(&info)),
            }
        }
        for delta in &prev.victims {
            if !cur_keys.contains(&delta.key) {
                victims.push(VictimDelta::stale(delta.key.clone()));
            }
        }

        let prev_beaconed: FxHashMap<Key, DirinfoSet> = prev
            .complete_beaconed()
            .expect("complete syncset")
            .into_iter()
            .collect();
        let empty = DirinfoSet::new();
        let mut beaconed = Vec::new();
        for (key, wire) in &cur.beaconed {
            let cur_set = wire.recover(None).expect("complete syncset");
            match prev_beaconed.get(key) {
                Some(prev_set) if *prev_set == cur_set => {}
                other => {
                    let base = other.unwrap_or(&empty);
                    beaconed.push((key.clone(), WireDirinfoSet::compress(&cur_set, base)));
                }
            }
        }
        // Keys the sender stopped beaconing while they stayed victims are
        // announced as now-empty sharer sets.
        let cur_beaconed_keys: FxHashSet<&Key> = cur.beaconed.iter().map(|(k, _)| k).collect();
        for (key, _) in &prev.beaconed {
            if cur_keys.contains(key) && !cur_beaconed_keys.contains(key) {
                beaconed.push((key.clone(), WireDirinfoSet::Complete(DirinfoSet::new())));
            }
        }

        VictimSyncset {
            compressed: true,
            margin,
            victims,
            beaconed,
        }
    }

    /// Applies a compressed syncset to the complete state it was computed
    /// against, yielding the sender's current complete syncset. A complete
    /// input simply replaces the prior state.
    pub fn recover(
        delta: &VictimSyncset,
        prev: &VictimSyncset,
        weights: &RewardWeights,
    ) -> Result<VictimSyncset> {
        assert!(prev.is_complete(), "recovery base must be complete");
        if delta.is_complete() {
            return Ok(delta.clone());
        }

        let margin_bytes = match delta.margin {
            CacheMargin::Bytes(b) => b,
            CacheMargin::Delta(d) => {
                let base = prev.complete_margin_bytes()?;
                let applied = base as i128 + i128::from(d);
                u64::try_from(applied.max(0)).unwrap_or(0)
            }
        };

        let mut victims: BTreeMap<Key, VictimCacheinfo> = prev
            .complete_victims()?
            .into_iter()
            .map(|v| (v.key.clone(), v))
            .collect();
        for entry in &delta.victims {
            if entry.is_stale() {
                if victims.remove(&entry.key).is_none() {
                    return Err(CoveredError::StaleVictimSync(format!(
                        "stale marker for unknown victim {}",
                        entry.key
                    )));
                }
            } else {
                let info = entry.apply(victims.get(&entry.key))?;
                victims.insert(info.key.clone(), info);
            }
        }
        let mut victim_list: Vec<VictimCacheinfo> = victims.into_values().collect();
        sort_by_reward(&mut victim_list, weights);

        let prev_beaconed: FxHashMap<Key, DirinfoSet> =
            prev.complete_beaconed()?.into_iter().collect();
        let delta_beaconed: FxHashMap<&Key, &WireDirinfoSet> =
            delta.beaconed.iter().map(|(k, w)| (k, w)).collect();
        let mut beaconed = Vec::new();
        for info in &victim_list {
            if let Some(wire) = delta_beaconed.get(&info.key) {
                let set = wire.recover(prev_beaconed.get(&info.key))?;
                if !set.is_empty() {
                    beaconed.push((info.key.clone(), set));
                }
            } else if let Some(prev_set) = prev_beaconed.get(&info.key) {
                beaconed.push((info.key.clone(), prev_set.clone()));
            }
        }

        Ok(VictimSyncset::complete(margin_bytes, victim_list, beaconed))
    }

    fn bitmap(&self) -> u8 {
        let mut bitmap = 0;
        if self.compressed {
            bitmap |= COMPRESSED_FLAG;
        }
        if matches!(self.margin, CacheMargin::Delta(_)) {
            bitmap |= MARGIN_DELTA;
        }
        if self.victims.iter().any(|v| !v.is_complete()) {
            bitmap |= VICTIMS_DEDUP;
        }
        if self.victims.is_empty() {
            bitmap |= VICTIMS_EMPTY;
        }
        if self.beaconed.iter().any(|(_, w)| !w.is_complete()) {
            bitmap |= BEACONED_DEDUP;
        }
        if self.beaconed.is_empty() {
            bitmap |= BEACONED_EMPTY;
        }
        bitmap
    }

    pub fn payload_size(&self) -> usize {
        let margin = match self.margin {
            CacheMargin::Bytes(_) => 8,
            CacheMargin::Delta(_) => 4,
        };
        1 + margin
            + 4
            + self.victims.iter().map(VictimDelta::payload_size).sum::<usize>()
            + 4
            + self
                .beaconed
                .iter()
                .map(|(k, w)| k.payload_size() + w.payload_size())
                .sum::<usize>()
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u8(out, self.bitmap());
        match self.margin {
            CacheMargin::Bytes(b) => put_u64_be(out, b),
            CacheMargin::Delta(d) => put_i32_be(out, d),
        }
        put_u32_be(out, self.victims.len() as u32);
        for victim in &self.victims {
            victim.encode(out);
        }
        put_u32_be(out, self.beaconed.len() as u32);
        for (key, wire) in &self.beaconed {
            put_u32_be(out, key.len() as u32);
            put_bytes(out, key.as_bytes());
            wire.encode(out);
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let bitmap = r.u8()?;
        let compressed = bitmap & COMPRESSED_FLAG != 0;
        let margin = if bitmap & MARGIN_DELTA != 0 {
            if !compressed {
                return Err(CoveredError::Codec(
                    "margin delta on a complete syncset".into(),
                ));
            }
            CacheMargin::Delta(r.i32_be()?)
        } else {
            CacheMargin::Bytes(r.u64_be()?)
        };
        let n_victims = r.u32_be()? as usize;
        let mut victims = Vec::with_capacity(n_victims.min(4096));
        for _ in 0..n_victims {
            victims.push(VictimDelta::decode(r)?);
        }
        let n_beaconed = r.u32_be()? as usize;
        let mut beaconed = Vec::with_capacity(n_beaconed.min(4096));
        for _ in 0..n_beaconed {
            let key_len = r.u32_be()? as usize;
            let key = Key::new(r.take(key_len)?.to_vec());
            beaconed.push((key, WireDirinfoSet::decode(r)?));
        }
        if !compressed {
            if victims.iter().any(|v| !v.is_complete()) {
                return Err(CoveredError::Codec(
                    "deduplicated victim in a complete syncset".into(),
                ));
            }
            if beaconed.iter().any(|(_, w)| !w.is_complete()) {
                return Err(CoveredError::Codec(
                    "compressed dirinfo set in a complete syncset".into(),
                ));
            }
        }
        Ok(Self {
            compressed,
            margin,
            victims,
            beaconed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(key: &str, size: u32, local: f32, redirected: f32) -> VictimCacheinfo {
        VictimCacheinfo {
            key: Key::from(key),
            object_size: size,
            local_cached_popularity: local,
            redirected_cached_popularity: redirected,
        }
    }

    fn sorted(mut victims: Vec<VictimCacheinfo>) -> Vec<VictimCacheinfo> {
        sort_by_reward(&mut victims, &RewardWeights::default());
        victims
    }

    fn dirinfo(edges: &[u32]) -> DirinfoSet {
        edges.iter().copied().collect()
    }

    #[test]
    fn compress_then_recover_is_identity() {
        let prev = VictimSyncset::complete(
            4096,
            sorted(vec![info("a", 100, 1.0, 0.0), info("b", 200, 2.0, 0.5)]),
            vec![(Key::from("a"), dirinfo(&[0, 2]))],
        );
        let cur = VictimSyncset::complete(
            4096 - 128,
            sorted(vec![
                info("a", 100, 1.0, 0.0),
                info("c", 50, 0.25, 0.0),
            ]),
            vec![(Key::from("a"), dirinfo(&[0, 2, 3]))],
        );
        let delta = VictimSyncset::compress(&cur, &prev);
        assert!(delta.is_compressed());
        assert_eq!(delta.cache_margin(), CacheMargin::Delta(-128));
        let recovered =
            VictimSyncset::recover(&delta, &prev, &RewardWeights::default()).unwrap();
        assert_eq!(recovered, cur);
    }

    #[test]
    fn unchanged_state_compresses_to_nearly_nothing() {
        let cur = VictimSyncset::complete(
            1024,
            sorted(vec![info("a", 100, 1.0, 0.0)]),
            vec![(Key::from("a"), dirinfo(&[1]))],
        );
        let delta = VictimSyncset::compress(&cur, &cur);
        assert!(delta.victims().is_empty());
        assert!(delta.beaconed().is_empty());
        assert_eq!(delta.cache_margin(), CacheMargin::Delta(0));
    }

    #[test]
    fn complete_input_replaces_prior_state() {
        let prev = VictimSyncset::complete(10, sorted(vec![info("x", 1, 1.0, 0.0)]), vec![]);
        let cur = VictimSyncset::complete(20, sorted(vec![info("y", 2, 2.0, 0.0)]), vec![]);
        let recovered = VictimSyncset::recover(&cur, &prev, &RewardWeights::default()).unwrap();
        assert_eq!(recovered, cur);
    }

    #[test]
    fn stale_marker_for_unknown_victim_is_rejected() {
        let prev = VictimSyncset::complete(10, vec![], vec![]);
        let delta = VictimSyncset {
            compressed: true,
            margin: CacheMargin::Delta(0),
            victims: vec![VictimDelta::stale(Key::from("ghost"))],
            beaconed: vec![],
        };
        assert!(matches!(
            VictimSyncset::recover(&delta, &prev, &RewardWeights::default()),
            Err(CoveredError::StaleVictimSync(_))
        ));
    }

    #[test]
    fn wire_roundtrip_complete_and_compressed() {
        let prev = VictimSyncset::complete(
            1 << 40,
            sorted(vec![info("a", 100, 1.0, 0.0)]),
            vec![(Key::from("a"), dirinfo(&[7]))],
        );
        let cur = VictimSyncset::complete(
            1 << 20,
            sorted(vec![info("a", 100, 3.0, 0.0), info("b", 10, 0.5, 0.5)]),
            vec![(Key::from("a"), dirinfo(&[7, 8]))],
        );
        for syncset in [&prev, &cur, &VictimSyncset::compress(&cur, &prev)] {
            let mut out = Vec::new();
            syncset.encode(&mut out);
            assert_eq!(out.len(), syncset.payload_size());
            let back = VictimSyncset::decode(&mut Reader::new(&out)).unwrap();
            assert_eq!(&back, syncset);
        }
    }

    #[test]
    fn margin_wider_than_i32_stays_absolute() {
        let prev = VictimSyncset::complete(0, vec![], vec![]);
        let cur = VictimSyncset::complete(1 << 40, vec![], vec![]);
        let delta = VictimSyncset::compress(&cur, &prev);
        assert_eq!(delta.cache_margin(), CacheMargin::Bytes(1 << 40));
    }
}
