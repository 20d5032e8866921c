//! The cooperation protocol: wire messages, transport and cloud seams, and
//! the per-node request state machines that glue the directory, victim
//! tracker, popularity aggregator, and cache wrapper together.

pub mod cloud;
pub mod message;
pub mod node;
pub mod transport;

pub use cloud::{CloudStore, MemoryCloud};
pub use message::Message;
pub use node::{EdgeNode, GetOutcome, HitSource};
pub use transport::{LoopbackTransport, MessageTransport};
