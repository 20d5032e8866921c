//! Victim tracking: compact summaries of each edge's least-valuable cached
//! objects, synchronized across the cluster as piggyback payload and
//! consumed by the placement planner for eviction-cost estimates.

pub mod cacheinfo;
pub mod dirinfo;
pub mod sync;
pub mod syncset;
pub mod tracker;

pub use cacheinfo::{VictimCacheinfo, VictimDelta};
pub use dirinfo::{DirinfoSet, WireDirinfoSet};
pub use sync::{SyncOutbox, VictimSync};
pub use syncset::{CacheMargin, VictimSyncset};
pub use tracker::{PerEdgeVictims, VictimTracker};
