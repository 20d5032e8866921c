//! Per-key aggregated uncached popularity: sum + top-k + bitmap.

use smallvec::SmallVec;

use crate::cluster::{local_uncached_reward, BenefitParams};
use crate::popularity::edgeset::Edgeset;
use crate::types::{DeltaReward, EdgeIndex, Key, ObjectSize, Popularity};

/// Fixed-width bitmap over the edge set with a cached popcount.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeBitmap {
    bits: Vec<u64>,
    len: u32,
    ones: u32,
}

impl EdgeBitmap {
    pub fn new(len: u32) -> Self {
        Self {
            bits: vec![0; (len as usize + 63) / 64],
            len,
            ones: 0,
        }
    }

    pub fn get(&self, idx: EdgeIndex) -> bool {
        assert!(idx < self.len, "edge index {idx} out of range");
        self.bits[(idx / 64) as usize] & (1 << (idx % 64)) != 0
    }

    pub fn set(&mut self, idx: EdgeIndex) -> bool {
        assert!(idx < self.len, "edge index {idx} out of range");
        let slot = &mut self.bits[(idx / 64) as usize];
        let mask = 1 << (idx % 64);
        if *slot & mask == 0 {
            *slot |= mask;
            self.ones += 1;
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self, idx: EdgeIndex) -> bool {
        assert!(idx < self.len, "edge index {idx} out of range");
        let slot = &mut self.bits[(idx / 64) as usize];
        let mask = 1 << (idx % 64);
        if *slot & mask != 0 {
            *slot &= !mask;
            self.ones -= 1;
            true
        } else {
            false
        }
    }

    pub fn popcount(&self) -> u32 {
        self.ones
    }

    pub fn iter_ones(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        (0..self.len).filter(|&i| self.get(i))
    }

    pub fn size_for_capacity(&self) -> u64 {
        (self.len as u64 + 7) / 8
    }
}

/// Aggregated local-uncached popularity of one key across the cluster.
///
/// The top-k list stays sorted ascending by popularity; edges set in the
/// bitmap but absent from the list contribute only to the sum and are
/// approximated by the non-top-k mean when their exact value is needed.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregatedUncachedPopularity {
    key: Key,
    object_size: ObjectSize,
    sum: Popularity,
    topk: SmallVec<[(EdgeIndex, Popularity); 8]>,
    bitmap: EdgeBitmap,
    cooperative_cached: bool,
}

impl AggregatedUncachedPopularity {
    pub fn new(key: Key, edge_count: u32) -> Self {
        Self {
            key,
            object_size: 0,
            sum: 0.0,
            topk: SmallVec::new(),
            bitmap: EdgeBitmap::new(edge_count),
            cooperative_cached: false,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn object_size(&self) -> ObjectSize {
        self.object_size
    }

    pub fn sum(&self) -> Popularity {
        self.sum
    }

    pub fn topk(&self) -> &[(EdgeIndex, Popularity)] {
        &self.topk
    }

    pub fn bitmap(&self) -> &EdgeBitmap {
        &self.bitmap
    }

    pub fn exist_edgecnt(&self) -> u32 {
        self.bitmap.popcount()
    }

    pub fn is_cooperative_cached(&self) -> bool {
        self.cooperative_cached
    }

    pub fn set_cooperative_cached(&mut self, cached: bool) {
        self.cooperative_cached = cached;
    }

    pub fn has_edge(&self, edge: EdgeIndex) -> bool {
        self.bitmap.get(edge)
    }

    /// Folds a fresh report from `edge`, replacing its prior contribution.
    pub fn update(
        &mut self,
        edge: EdgeIndex,
        popularity: Popularity,
        topk_cap: usize,
        object_size: ObjectSize,
    ) {
        if self.bitmap.set(edge) {
            self.sum += popularity;
            self.try_insert_nontopk(edge, popularity, topk_cap);
        } else {
            let prior = self.contribution_of(edge);
            self.sum = (self.sum + popularity - prior).max(0.0);
            if let Some(pos) = self.topk.iter().position(|(e, _)| *e == edge) {
                self.topk.remove(pos);
                self.insert_sorted(edge, popularity);
            } else {
                self.try_insert_nontopk(edge, popularity, topk_cap);
            }
        }
        if object_size != 0 {
            self.object_size = object_size;
        }
    }

    /// Releases `edge`'s contribution; returns whether the entry is now
    /// empty and should be dropped.
    pub fn clear(&mut self, edge: EdgeIndex) -> bool {
        if self.bitmap.get(edge) {
            let prior = self.contribution_of(edge);
            self.sum = (self.sum - prior).max(0.0);
            if let Some(pos) = self.topk.iter().position(|(e, _)| *e == edge) {
                self.topk.remove(pos);
            }
            self.bitmap.clear(edge);
        }
        self.bitmap.popcount() == 0
    }

    /// Releases every edge that just received a cached copy.
    pub fn clear_for_placement(&mut self, placement: &Edgeset) -> bool {
        for edge in placement.iter() {
            self.clear(edge);
        }
        self.bitmap.popcount() == 0
    }

    /// The exact top-k contribution of `edge`, or the mean of non-top-k
    /// contributions when the edge reported but did not make the list.
    pub fn contribution_of(&self, edge: EdgeIndex) -> Popularity {
        assert!(self.bitmap.get(edge), "edge {edge} has no contribution");
        if let Some((_, pop)) = self.topk.iter().find(|(e, _)| *e == edge) {
            return *pop;
        }
        let topk_sum: Popularity = self.topk.iter().map(|(_, p)| p).sum();
        let exist = self.bitmap.popcount();
        let non_topk = exist.saturating_sub(self.topk.len() as u32);
        debug_assert!(non_topk > 0, "non-top-k edge with no non-top-k population");
        if non_topk == 0 {
            return 0.0;
        }
        ((self.sum - topk_sum).max(0.0)) / non_topk as Popularity
    }

    fn insert_sorted(&mut self, edge: EdgeIndex, popularity: Popularity) {
        let pos = self
            .topk
            .iter()
            .position(|(_, p)| *p > popularity)
            .unwrap_or(self.topk.len());
        self.topk.insert(pos, (edge, popularity));
    }

    fn try_insert_nontopk(&mut self, edge: EdgeIndex, popularity: Popularity, topk_cap: usize) {
        debug_assert!(self.topk.iter().all(|(e, _)| *e != edge));
        if self.topk.len() < topk_cap {
            self.insert_sorted(edge, popularity);
        } else if let Some((_, smallest)) = self.topk.first() {
            if popularity > *smallest {
                self.topk.remove(0);
                self.insert_sorted(edge, popularity);
            }
        }
    }

    /// Sum of the `top_i` highest top-k popularities plus the edges that
    /// carry them.
    pub fn topi_sum(&self, top_i: usize) -> (Popularity, Edgeset) {
        assert!(top_i <= self.topk.len(), "top-i exceeds top-k length");
        let mut edgeset = Edgeset::new();
        let mut sum = 0.0;
        for (edge, pop) in self.topk.iter().rev().take(top_i) {
            sum += *pop;
            edgeset.insert(*edge);
        }
        (sum, edgeset)
    }

    /// Admission benefit of placing copies at the `top_i` hottest
    /// reporting edges.
    pub fn admission_benefit(
        &self,
        top_i: usize,
        is_global_cached: bool,
        params: &BenefitParams,
    ) -> DeltaReward {
        let (topi, _) = self.topi_sum(top_i);
        local_uncached_reward(
            top_i,
            topi,
            is_global_cached,
            (self.sum - topi).max(0.0),
            params,
        )
    }

    /// The eviction priority used by the aggregator's sorted index.
    pub fn max_admission_benefit(
        &self,
        is_global_cached: bool,
        params: &BenefitParams,
    ) -> DeltaReward {
        self.admission_benefit(self.topk.len(), is_global_cached, params)
    }

    /// Candidate placement edges, hottest first: the top-k list from the
    /// top, then the remaining bitmap edges at the non-top-k mean.
    pub fn candidates_desc(&self) -> Vec<(EdgeIndex, Popularity)> {
        let mut out: Vec<(EdgeIndex, Popularity)> =
            self.topk.iter().rev().copied().collect();
        let in_topk: Vec<EdgeIndex> = self.topk.iter().map(|(e, _)| *e).collect();
        for edge in self.bitmap.iter_ones() {
            if !in_topk.contains(&edge) {
                out.push((edge, self.contribution_of(edge)));
            }
        }
        out
    }

    pub fn size_for_capacity(&self) -> u64 {
        self.key.len() as u64
            + 4
            + 4
            + self.topk.len() as u64 * 8
            + self.bitmap.size_for_capacity()
            + 4
    }
}
