//! Per-key sharer sets beaconed alongside victim summaries.

use std::collections::BTreeSet;

use crate::error::{CoveredError, Result};
use crate::primitives::bytes::{put_u32_be, put_u8, Reader};
use crate::types::EdgeIndex;

/// The set of edges holding a copy of one beaconed victim key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirinfoSet {
    sharers: BTreeSet<EdgeIndex>,
}

impl DirinfoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, edge: EdgeIndex) -> bool {
        self.sharers.insert(edge)
    }

    pub fn remove(&mut self, edge: EdgeIndex) -> bool {
        self.sharers.remove(&edge)
    }

    pub fn contains(&self, edge: EdgeIndex) -> bool {
        self.sharers.contains(&edge)
    }

    pub fn toggle(&mut self, edge: EdgeIndex) {
        if !self.sharers.insert(edge) {
            self.sharers.remove(&edge);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.sharers.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.sharers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sharers.is_empty()
    }

    pub fn size_for_capacity(&self) -> u64 {
        self.sharers.len() as u64 * 4
    }
}

impl FromIterator<EdgeIndex> for DirinfoSet {
    fn from_iter<T: IntoIterator<Item = EdgeIndex>>(iter: T) -> Self {
        Self {
            sharers: iter.into_iter().collect(),
        }
    }
}

const COMPLETE_FLAG: u8 = 0;
const COMPRESSED_FLAG: u8 = 1;

/// Wire form of a [`DirinfoSet`].
///
/// The compressed variant lists the edges whose membership flipped relative
/// to the receiver's prior copy; applying it toggles each listed edge, so
/// complete and compressed forms share one frame layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireDirinfoSet {
    Complete(DirinfoSet),
    Compressed(DirinfoSet),
}

impl WireDirinfoSet {
    pub fn is_complete(&self) -> bool {
        matches!(self, WireDirinfoSet::Complete(_))
    }

    /// Picks the smaller of the complete and toggle encodings.
    pub fn compress(cur: &DirinfoSet, prev: &DirinfoSet) -> Self {
        let toggles: DirinfoSet = cur
            .iter()
            .filter(|e| !prev.contains(*e))
            .chain(prev.iter().filter(|e| !cur.contains(*e)))
            .collect();
        if toggles.len() < cur.len() {
            WireDirinfoSet::Compressed(toggles)
        } else {
            WireDirinfoSet::Complete(cur.clone())
        }
    }

    pub fn recover(&self, prev: Option<&DirinfoSet>) -> Result<DirinfoSet> {
        match self {
            WireDirinfoSet::Complete(set) => Ok(set.clone()),
            WireDirinfoSet::Compressed(toggles) => {
                let prev = prev.ok_or_else(|| {
                    CoveredError::StaleVictimSync("compressed dirinfo set has no base".into())
                })?;
                let mut set = prev.clone();
                for edge in toggles.iter() {
                    set.toggle(edge);
                }
                Ok(set)
            }
        }
    }

    pub fn payload_size(&self) -> usize {
        let set = match self {
            WireDirinfoSet::Complete(s) | WireDirinfoSet::Compressed(s) => s,
        };
        1 + 4 + set.len() * 4
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let (flag, set) = match self {
            WireDirinfoSet::Complete(s) => (COMPLETE_FLAG, s),
            WireDirinfoSet::Compressed(s) => (COMPRESSED_FLAG, s),
        };
        put_u8(out, flag);
        put_u32_be(out, set.len() as u32);
        for edge in set.iter() {
            put_u32_be(out, edge);
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let flag = r.u8()?;
        let count = r.u32_be()? as usize;
        let mut set = DirinfoSet::new();
        for _ in 0..count {
            set.insert(r.u32_be()?);
        }
        match flag {
            COMPLETE_FLAG => Ok(WireDirinfoSet::Complete(set)),
            COMPRESSED_FLAG => Ok(WireDirinfoSet::Compressed(set)),
            other => Err(CoveredError::Codec(format!(
                "unknown dirinfo set flag {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(edges: &[EdgeIndex]) -> DirinfoSet {
        edges.iter().copied().collect()
    }

    #[test]
    fn toggle_compression_recovers_exactly() {
        let prev = set(&[0, 1, 2]);
        let cur = set(&[1, 2, 3]);
        let wire = WireDirinfoSet::compress(&cur, &prev);
        assert!(!wire.is_complete());
        assert_eq!(wire.recover(Some(&prev)).unwrap(), cur);
    }

    #[test]
    fn compression_falls_back_to_complete_when_mostly_changed() {
        let prev = set(&[0]);
        let cur = set(&[1, 2, 3]);
        let wire = WireDirinfoSet::compress(&cur, &prev);
        assert!(wire.is_complete());
        assert_eq!(wire.recover(None).unwrap(), cur);
    }

    #[test]
    fn compressed_without_base_is_stale() {
        let wire = WireDirinfoSet::Compressed(set(&[1]));
        assert!(matches!(
            wire.recover(None),
            Err(CoveredError::StaleVictimSync(_))
        ));
    }

    #[test]
    fn frame_roundtrips() {
        for wire in [
            WireDirinfoSet::Complete(set(&[4, 9])),
            WireDirinfoSet::Compressed(set(&[2])),
        ] {
            let mut out = Vec::new();
            wire.encode(&mut out);
            assert_eq!(out.len(), wire.payload_size());
            assert_eq!(WireDirinfoSet::decode(&mut Reader::new(&out)).unwrap(), wire);
        }
    }
}
