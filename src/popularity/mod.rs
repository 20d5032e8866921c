//! Selective popularity aggregation: per-key sum + top-k + bitmap
//! summaries of locally-uncached popularity, kept only for globally hot
//! keys under a byte budget.

pub mod aggregated;
pub mod aggregator;
pub mod collected;
pub mod edgeset;

pub use aggregated::{AggregatedUncachedPopularity, EdgeBitmap};
pub use aggregator::PopularityAggregator;
pub use collected::{CollectedPopularity, FastPathHint};
pub use edgeset::Edgeset;
