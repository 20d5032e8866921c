//! # Covered - Cooperative Edge Cache Coordination Core
//!
//! Covered is the coordination core of a cooperative edge cache: a fixed
//! set of edge nodes jointly serving a key-value object store backed by a
//! cloud origin. On a local miss an edge may serve a request from a peer
//! (a cooperative hit) before falling back to the cloud (a global miss).
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use covered::{
//!     ClusterContext, CoveredConfig, EdgeNode, Key, LoopbackTransport, LruLocalCache,
//!     MemoryCloud,
//! };
//!
//! let cfg = Arc::new(CoveredConfig::for_testing());
//! let ctx = Arc::new(ClusterContext::new(2, &cfg));
//! let transport = LoopbackTransport::new(2);
//! let cloud = Arc::new(MemoryCloud::new());
//! let nodes: Vec<_> = (0..2)
//!     .map(|idx| {
//!         let node = EdgeNode::new(
//!             idx,
//!             Arc::clone(&ctx),
//!             Arc::clone(&cfg),
//!             Box::new(LruLocalCache::new(cfg.cache_capacity_bytes)),
//!             transport.clone(),
//!             cloud.clone(),
//!         );
//!         transport.register(node.clone());
//!         node
//!     })
//!     .collect();
//!
//! let key = Key::from("object-1");
//! nodes[0].put(&key, &b"payload"[..])?;
//! let outcome = nodes[1].get(&key)?;
//! assert!(outcome.value.is_some());
//! # Ok::<(), covered::CoveredError>(())
//! ```
//!
//! ## Architecture
//!
//! - **Cache layer**: a pluggable [`LocalCache`] engine composed with MSI
//!   validity flags under per-key locks ([`cache::CacheWrapper`]).
//! - **Directory layer**: per-key beacon nodes tracking sharers and
//!   coordinating writes through an invalidation-based write lock
//!   ([`directory::DirectoryTable`]).
//! - **Victim layer**: compact summaries of each edge's cheapest eviction
//!   candidates, shipped as delta-compressed piggyback payload
//!   ([`victim::VictimTracker`]).
//! - **Popularity layer**: selective sum + top-k + bitmap aggregation of
//!   uncached demand ([`popularity::PopularityAggregator`]).
//! - **Placement**: benefit-versus-eviction-cost planning over those
//!   signals ([`placement::plan_placement`]), deployed through the
//!   cooperation protocol ([`protocol::EdgeNode`]).

pub mod cache;
pub mod cluster;
pub mod config;
pub mod directory;
pub mod error;
pub mod logging;
pub mod placement;
pub mod popularity;
pub mod primitives;
pub mod protocol;
pub mod types;
pub mod victim;

pub use crate::cache::{CustomFunction, LocalCache, LruLocalCache};
pub use crate::cluster::{BenefitParams, ClusterContext, RewardWeights};
pub use crate::config::CoveredConfig;
pub use crate::error::{CoveredError, Result};
pub use crate::protocol::{
    CloudStore, EdgeNode, GetOutcome, HitSource, LoopbackTransport, MemoryCloud, Message,
    MessageTransport,
};
pub use crate::types::{DeltaReward, EdgeIndex, Key, ObjectSize, Popularity, Value};
