//! The per-edge cache stack: the pluggable local KV engine, MSI validity
//! flags, capped local-uncached popularity metadata, and the wrapper that
//! composes them under per-key locks.

pub mod local;
pub mod uncached;
pub mod validity;
pub mod wrapper;

pub use local::{CustomFunction, LocalCache, LruLocalCache};
pub use validity::ValidityMap;
pub use wrapper::{CacheLookup, CacheWrapper};
