//! Piggybacked popularity fragments and the beacon's fast-path hint.

use crate::error::Result;
use crate::primitives::bytes::{put_f32_be, put_u8, Reader};
use crate::types::{DeltaReward, Popularity};

/// One edge's reported local-uncached popularity for a key.
///
/// `is_tracked == false` signals that the sender's capped uncached-metadata
/// table holds no entry for the key (either the key is locally cached or
/// the cap dropped it); the receiver then releases that edge's prior
/// contribution from the aggregator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollectedPopularity {
    pub is_tracked: bool,
    pub local_uncached_popularity: Popularity,
}

impl CollectedPopularity {
    pub fn untracked() -> Self {
        Self {
            is_tracked: false,
            local_uncached_popularity: 0.0,
        }
    }

    pub fn tracked(popularity: Popularity) -> Self {
        Self {
            is_tracked: true,
            local_uncached_popularity: popularity,
        }
    }

    pub fn payload_size(&self) -> usize {
        1 + 4
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u8(out, u8::from(self.is_tracked));
        put_f32_be(out, self.local_uncached_popularity);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let is_tracked = r.u8()? != 0;
        let local_uncached_popularity = r.f32_be()?;
        Ok(Self {
            is_tracked,
            local_uncached_popularity,
        })
    }
}

/// Beacon-provided hint letting a requester decide a single-edge placement
/// without another round trip, handed out when selective aggregation holds
/// no slot for the key.
///
/// The popularity sum excludes the requester's own contribution; a smallest
/// max-admission-benefit of zero means the aggregator still has budget
/// headroom, so any positive benefit wins a slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FastPathHint {
    pub sum_local_uncached_popularity: Popularity,
    pub smallest_max_admission_benefit: DeltaReward,
}

impl FastPathHint {
    pub fn payload_size(&self) -> usize {
        4 + 4
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        put_f32_be(out, self.sum_local_uncached_popularity);
        put_f32_be(out, self.smallest_max_admission_benefit);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            sum_local_uncached_popularity: r.f32_be()?,
            smallest_max_admission_benefit: r.f32_be()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collected_roundtrips() {
        for value in [CollectedPopularity::untracked(), CollectedPopularity::tracked(2.5)] {
            let mut out = Vec::new();
            value.encode(&mut out);
            assert_eq!(out.len(), value.payload_size());
            assert_eq!(
                CollectedPopularity::decode(&mut Reader::new(&out)).unwrap(),
                value
            );
        }
    }

    #[test]
    fn hint_roundtrips() {
        let hint = FastPathHint {
            sum_local_uncached_popularity: 4.0,
            smallest_max_admission_benefit: 0.5,
        };
        let mut out = Vec::new();
        hint.encode(&mut out);
        assert_eq!(FastPathHint::decode(&mut Reader::new(&out)).unwrap(), hint);
    }
}
