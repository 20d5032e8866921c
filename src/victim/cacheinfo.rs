//! Per-object victim summaries and their deduplicated transit form.

use std::cmp::Ordering;

use crate::cluster::RewardWeights;
use crate::error::{CoveredError, Result};
use crate::primitives::bytes::{put_bytes, put_f32_be, put_u32_be, put_u8, Reader};
use crate::types::{DeltaReward, Key, ObjectSize, Popularity};

/// Summary of one cached object considered a cheap eviction candidate at
/// its hosting edge. Stored state is always complete; only the transit form
/// ([`VictimDelta`]) omits fields.
#[derive(Clone, Debug, PartialEq)]
pub struct VictimCacheinfo {
    pub key: Key,
    pub object_size: ObjectSize,
    pub local_cached_popularity: Popularity,
    pub redirected_cached_popularity: Popularity,
}

impl VictimCacheinfo {
    pub fn local_reward(&self, weights: &RewardWeights) -> DeltaReward {
        weights.local_reward(self.local_cached_popularity, self.redirected_cached_popularity)
    }

    /// Metadata bytes this summary charges against tracker capacity.
    pub fn size_for_capacity(&self) -> u64 {
        // dedup bitmap byte + key + size + two popularity scalars
        1 + self.key.len() as u64 + 4 + 4 + 4
    }
}

/// Sorts ascending by local reward; key order breaks ties so synchronized
/// victim lists are deterministic.
pub fn sort_by_reward(list: &mut [VictimCacheinfo], weights: &RewardWeights) {
    list.sort_by(|a, b| {
        a.local_reward(weights)
            .partial_cmp(&b.local_reward(weights))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
}

const DEDUP_FLAG: u8 = 0b0000_0001;
const OBJECT_SIZE_MASK: u8 = 0b0000_0011;
const LOCAL_POP_MASK: u8 = 0b0000_0101;
const REDIRECTED_POP_MASK: u8 = 0b0000_1001;
const STALE_BITMAP: u8 = 0b0000_1111;

/// Transit form of a victim summary.
///
/// Each optional field is present on the wire iff its dedup bit is clear.
/// The fully-deduplicated bitmap is the stale marker: the victim vanished
/// at the sender and must be dropped by the receiver. Unchanged victims are
/// never transmitted at all.
#[derive(Clone, Debug, PartialEq)]
pub struct VictimDelta {
    pub key: Key,
    pub object_size: Option<ObjectSize>,
    pub local_cached_popularity: Option<Popularity>,
    pub redirected_cached_popularity: Option<Popularity>,
}

impl VictimDelta {
    pub fn complete(info: &VictimCacheinfo) -> Self {
        Self {
            key: info.key.clone(),
            object_size: Some(info.object_size),
            local_cached_popularity: Some(info.local_cached_popularity),
            redirected_cached_popularity: Some(info.redirected_cached_popularity),
        }
    }

    pub fn stale(key: Key) -> Self {
        Self {
            key,
            object_size: None,
            local_cached_popularity: None,
            redirected_cached_popularity: None,
        }
    }

    /// Difference of `cur` against the last synced `prev`; `None` when the
    /// two are identical and nothing needs transmitting.
    pub fn diff(cur: &VictimCacheinfo, prev: &VictimCacheinfo) -> Option<Self> {
        debug_assert_eq!(cur.key, prev.key);
        let delta = Self {
            key: cur.key.clone(),
            object_size: (cur.object_size != prev.object_size).then_some(cur.object_size),
            local_cached_popularity: (cur.local_cached_popularity != prev.local_cached_popularity)
                .then_some(cur.local_cached_popularity),
            redirected_cached_popularity: (cur.redirected_cached_popularity
                != prev.redirected_cached_popularity)
                .then_some(cur.redirected_cached_popularity),
        };
        if delta.is_stale() {
            None
        } else {
            Some(delta)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.object_size.is_some()
            && self.local_cached_popularity.is_some()
            && self.redirected_cached_popularity.is_some()
    }

    pub fn is_stale(&self) -> bool {
        self.object_size.is_none()
            && self.local_cached_popularity.is_none()
            && self.redirected_cached_popularity.is_none()
    }

    /// Materializes a complete cacheinfo, filling deduplicated fields from
    /// the receiver's prior copy. Deduplication against a key the receiver
    /// never synced is a stale-sync condition.
    pub fn apply(&self, prev: Option<&VictimCacheinfo>) -> Result<VictimCacheinfo> {
        assert!(!self.is_stale(), "stale markers carry no cacheinfo");
        if self.is_complete() {
            return Ok(VictimCacheinfo {
                key: self.key.clone(),
                object_size: self.object_size.unwrap(),
                local_cached_popularity: self.local_cached_popularity.unwrap(),
                redirected_cached_popularity: self.redirected_cached_popularity.unwrap(),
            });
        }
        let prev = prev.ok_or_else(|| {
            CoveredError::StaleVictimSync(format!("deduplicated victim {} has no base", self.key))
        })?;
        Ok(VictimCacheinfo {
            key: self.key.clone(),
            object_size: self.object_size.unwrap_or(prev.object_size),
            local_cached_popularity: self
                .local_cached_popularity
                .unwrap_or(prev.local_cached_popularity),
            redirected_cached_popularity: self
                .redirected_cached_popularity
                .unwrap_or(prev.redirected_cached_popularity),
        })
    }

    fn bitmap(&self) -> u8 {
        if self.is_complete() {
            return 0;
        }
        if self.is_stale() {
            return STALE_BITMAP;
        }
        let mut bitmap = DEDUP_FLAG;
        if self.object_size.is_none() {
            bitmap |= OBJECT_SIZE_MASK;
        }
        if self.local_cached_popularity.is_none() {
            bitmap |= LOCAL_POP_MASK;
        }
        if self.redirected_cached_popularity.is_none() {
            bitmap |= REDIRECTED_POP_MASK;
        }
        bitmap
    }

    pub fn payload_size(&self) -> usize {
        1 + self.key.payload_size()
            + self.object_size.map_or(0, |_| 4)
            + self.local_cached_popularity.map_or(0, |_| 4)
            + self.redirected_cached_popularity.map_or(0, |_| 4)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u8(out, self.bitmap());
        put_u32_be(out, self.key.len() as u32);
        put_bytes(out, self.key.as_bytes());
        if let Some(size) = self.object_size {
            put_u32_be(out, size);
        }
        if let Some(pop) = self.local_cached_popularity {
            put_f32_be(out, pop);
        }
        if let Some(pop) = self.redirected_cached_popularity {
            put_f32_be(out, pop);
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let bitmap = r.u8()?;
        if bitmap != 0 && (bitmap & DEDUP_FLAG) == 0 {
            return Err(CoveredError::Codec(format!(
                "victim dedup bitmap {bitmap:#010b} missing dedup flag"
            )));
        }
        let key_len = r.u32_be()? as usize;
        let key = Key::new(r.take(key_len)?.to_vec());
        let object_size = if bitmap & OBJECT_SIZE_MASK != OBJECT_SIZE_MASK {
            Some(r.u32_be()?)
        } else {
            None
        };
        let local_cached_popularity = if bitmap & LOCAL_POP_MASK != LOCAL_POP_MASK {
            Some(r.f32_be()?)
        } else {
            None
        };
        let redirected_cached_popularity = if bitmap & REDIRECTED_POP_MASK != REDIRECTED_POP_MASK {
            Some(r.f32_be()?)
        } else {
            None
        };
        Ok(Self {
            key,
            object_size,
            local_cached_popularity,
            redirected_cached_popularity,
        })
    }
}
