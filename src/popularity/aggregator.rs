//! Beacon-wide selective popularity aggregation.
//!
//! One sorted index keyed by max admission benefit (the eviction priority)
//! plus a reverse key lookup, bounded by a byte budget; when the budget is
//! exceeded the entry with the smallest benefit is discarded.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::cluster::BenefitParams;
use crate::popularity::aggregated::AggregatedUncachedPopularity;
use crate::popularity::edgeset::Edgeset;
use crate::types::{DeltaReward, EdgeIndex, Key, ObjectSize, Popularity};

type BenefitKey = (OrderedFloat<DeltaReward>, Key);

#[derive(Default)]
struct AggState {
    size_bytes: u64,
    by_benefit: BTreeMap<BenefitKey, AggregatedUncachedPopularity>,
    lookup: FxHashMap<Key, OrderedFloat<DeltaReward>>,
}

impl AggState {
    fn take(&mut self, key: &Key) -> Option<AggregatedUncachedPopularity> {
        let benefit = self.lookup.remove(key)?;
        let entry = self
            .by_benefit
            .remove(&(benefit, key.clone()))
            .expect("lookup table names a sorted-index entry");
        self.size_bytes -= entry.size_for_capacity();
        Some(entry)
    }

    fn put(&mut self, entry: AggregatedUncachedPopularity, benefit: DeltaReward) {
        let key = entry.key().clone();
        self.size_bytes += entry.size_for_capacity();
        self.lookup.insert(key.clone(), OrderedFloat(benefit));
        self.by_benefit.insert((OrderedFloat(benefit), key), entry);
    }
}

pub struct PopularityAggregator {
    edge_count: u32,
    topk_edgecnt: usize,
    capacity_bytes: u64,
    params: BenefitParams,
    state: RwLock<AggState>,
}

impl PopularityAggregator {
    pub fn new(
        edge_count: u32,
        topk_edgecnt: usize,
        capacity_bytes: u64,
        params: BenefitParams,
    ) -> Self {
        Self {
            edge_count,
            topk_edgecnt,
            capacity_bytes,
            params,
            state: RwLock::new(AggState::default()),
        }
    }

    /// Folds one edge's reported local-uncached popularity for `key`,
    /// allocating a slot when the key is new and shrinking back under the
    /// byte budget afterwards.
    pub fn update(
        &self,
        key: &Key,
        source: EdgeIndex,
        popularity: Popularity,
        is_cooperative_cached: bool,
        object_size: ObjectSize,
    ) {
        let mut state = self.state.write();
        let mut entry = state
            .take(key)
            .unwrap_or_else(|| AggregatedUncachedPopularity::new(key.clone(), self.edge_count));
        entry.update(source, popularity, self.topk_edgecnt, object_size);
        entry.set_cooperative_cached(is_cooperative_cached);
        let benefit = entry.max_admission_benefit(is_cooperative_cached, &self.params);
        state.put(entry, benefit);
        self.shrink_to_budget(&mut state);
    }

    /// Releases `source`'s contribution for `key`, dropping the slot when
    /// no edge reports it anymore.
    pub fn clear(&self, key: &Key, source: EdgeIndex) {
        let mut state = self.state.write();
        let Some(mut entry) = state.take(key) else {
            return;
        };
        if entry.clear(source) {
            return;
        }
        let benefit =
            entry.max_admission_benefit(entry.is_cooperative_cached(), &self.params);
        state.put(entry, benefit);
    }

    /// Releases the contributions of every edge that just received a
    /// cached copy through a committed placement.
    pub fn clear_for_placement(&self, key: &Key, placement: &Edgeset) {
        let mut state = self.state.write();
        let Some(mut entry) = state.take(key) else {
            return;
        };
        if entry.clear_for_placement(placement) {
            debug!(%key, "aggregated popularity fully consumed by placement");
            return;
        }
        entry.set_cooperative_cached(true);
        let benefit = entry.max_admission_benefit(true, &self.params);
        state.put(entry, benefit);
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.state.read().lookup.contains_key(key)
    }

    pub fn snapshot(&self, key: &Key) -> Option<AggregatedUncachedPopularity> {
        let state = self.state.read();
        let benefit = state.lookup.get(key)?;
        state.by_benefit.get(&(*benefit, key.clone())).cloned()
    }

    /// Smallest max-admission-benefit currently holding a slot; zero while
    /// the byte budget still has headroom.
    pub fn smallest_max_admission_benefit(&self) -> DeltaReward {
        let state = self.state.read();
        if state.size_bytes < self.capacity_bytes {
            return 0.0;
        }
        state
            .by_benefit
            .keys()
            .next()
            .map_or(0.0, |(benefit, _)| benefit.into_inner())
    }

    pub fn len(&self) -> usize {
        self.state.read().lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_for_capacity(&self) -> u64 {
        self.state.read().size_bytes
    }

    fn shrink_to_budget(&self, state: &mut AggState) {
        while state.size_bytes > self.capacity_bytes && state.by_benefit.len() > 1 {
            let (benefit, key) = state
                .by_benefit
                .keys()
                .next()
                .cloned()
                .expect("non-empty index");
            let entry = state
                .by_benefit
                .remove(&(benefit, key.clone()))
                .expect("first key exists");
            state.lookup.remove(&key);
            state.size_bytes -= entry.size_for_capacity();
            debug!(%key, benefit = benefit.into_inner(), "discarded globally less popular object");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator(capacity: u64) -> PopularityAggregator {
        PopularityAggregator::new(5, 3, capacity, BenefitParams::default())
    }

    #[test]
    fn sum_topk_bitmap_accumulate_across_edges() {
        let agg = aggregator(64 * 1024);
        let key = Key::from("k3");
        for edge in 0..5 {
            agg.update(&key, edge, 1.0, false, 100);
        }
        let entry = agg.snapshot(&key).unwrap();
        assert_eq!(entry.sum(), 5.0);
        assert_eq!(entry.exist_edgecnt(), 5);
        assert_eq!(entry.topk().len(), 3);
        assert!(entry.max_admission_benefit(false, &BenefitParams::default()) > 0.0);
    }

    #[test]
    fn budget_discards_smallest_benefit_first() {
        // Each entry charges ~32 bytes; two fit in 70, three do not.
        let agg = aggregator(70);
        let hot = Key::from("hot-object");
        let cold = Key::from("cold-object");
        let warm = Key::from("warm-object");
        agg.update(&cold, 0, 0.1, false, 10);
        agg.update(&hot, 0, 50.0, false, 10);
        agg.update(&warm, 1, 5.0, false, 10);
        assert!(agg.contains(&hot));
        assert!(agg.contains(&warm));
        assert!(!agg.contains(&cold));
        assert!(agg.size_for_capacity() <= 70);
    }

    #[test]
    fn clear_releases_exactly_the_last_report() {
        let agg = aggregator(64 * 1024);
        let key = Key::from("k");
        agg.update(&key, 0, 2.0, false, 0);
        agg.update(&key, 1, 3.0, false, 0);
        agg.clear(&key, 0);
        let entry = agg.snapshot(&key).unwrap();
        assert_eq!(entry.sum(), 3.0);
        assert!(!entry.has_edge(0));
        agg.clear(&key, 1);
        assert!(!agg.contains(&key));
    }

    #[test]
    fn placement_clears_the_placed_edges() {
        let agg = aggregator(64 * 1024);
        let key = Key::from("k");
        for edge in 0..3 {
            agg.update(&key, edge, 1.0, false, 0);
        }
        let placement: Edgeset = [0, 1].into_iter().collect();
        agg.clear_for_placement(&key, &placement);
        let entry = agg.snapshot(&key).unwrap();
        assert_eq!(entry.exist_edgecnt(), 1);
        assert!(entry.is_cooperative_cached());
    }

    #[test]
    fn smallest_benefit_is_zero_under_budget() {
        let agg = aggregator(64 * 1024);
        assert_eq!(agg.smallest_max_admission_benefit(), 0.0);
        agg.update(&Key::from("k"), 0, 1.0, false, 0);
        assert_eq!(agg.smallest_max_admission_benefit(), 0.0);
    }
}
