//! Wire-serializable sets of edge indices used to carry placements.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::Result;
use crate::primitives::bytes::{put_u32_be, Reader};
use crate::types::EdgeIndex;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Edgeset {
    edges: BTreeSet<EdgeIndex>,
}

impl Edgeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, edge: EdgeIndex) -> bool {
        self.edges.insert(edge)
    }

    pub fn remove(&mut self, edge: EdgeIndex) -> bool {
        self.edges.remove(&edge)
    }

    pub fn contains(&self, edge: EdgeIndex) -> bool {
        self.edges.contains(&edge)
    }

    pub fn iter(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.edges.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn payload_size(&self) -> usize {
        4 + self.edges.len() * 4
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        put_u32_be(out, self.edges.len() as u32);
        for edge in &self.edges {
            put_u32_be(out, *edge);
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let count = r.u32_be()? as usize;
        let mut edges = BTreeSet::new();
        for _ in 0..count {
            edges.insert(r.u32_be()?);
        }
        Ok(Self { edges })
    }
}

impl FromIterator<EdgeIndex> for Edgeset {
    fn from_iter<T: IntoIterator<Item = EdgeIndex>>(iter: T) -> Self {
        Self {
            edges: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Edgeset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, edge) in self.edges.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{edge}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_on_the_wire() {
        let set: Edgeset = [3, 1, 4].into_iter().collect();
        let mut out = Vec::new();
        set.encode(&mut out);
        assert_eq!(out.len(), set.payload_size());
        assert_eq!(Edgeset::decode(&mut Reader::new(&out)).unwrap(), set);
    }

    #[test]
    fn displays_sorted() {
        let set: Edgeset = [2, 0].into_iter().collect();
        assert_eq!(set.to_string(), "{0,2}");
    }
}
