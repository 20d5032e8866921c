//! The message transport seam and an in-process loopback implementation.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;

use crate::error::{CoveredError, Result};
use crate::protocol::message::Message;
use crate::protocol::node::EdgeNode;
use crate::types::EdgeIndex;

/// Synchronous request/response delivery between edges. Implementations
/// own timeouts; a timed-out or unreachable destination surfaces as
/// `Transport`.
pub trait MessageTransport: Send + Sync {
    fn request(&self, src: EdgeIndex, dst: EdgeIndex, message: Message) -> Result<Message>;
}

/// In-process transport that dispatches directly into the destination
/// node's handler. Every routed message is encoded and decoded, so the
/// full wire codec is exercised on every hop. Edges can be marked
/// unreachable to exercise timeout and retry paths.
pub struct LoopbackTransport {
    nodes: RwLock<Vec<Option<Arc<EdgeNode>>>>,
    unreachable: Mutex<FxHashSet<EdgeIndex>>,
}

impl LoopbackTransport {
    pub fn new(edge_count: u32) -> Arc<Self> {
        Arc::new(Self {
            nodes: RwLock::new(vec![None; edge_count as usize]),
            unreachable: Mutex::new(FxHashSet::default()),
        })
    }

    pub fn register(&self, node: Arc<EdgeNode>) {
        let idx = node.edge_idx() as usize;
        let mut nodes = self.nodes.write();
        assert!(idx < nodes.len(), "edge index out of range");
        nodes[idx] = Some(node);
    }

    pub fn set_unreachable(&self, edge: EdgeIndex, unreachable: bool) {
        let mut set = self.unreachable.lock();
        if unreachable {
            set.insert(edge);
        } else {
            set.remove(&edge);
        }
    }
}

impl MessageTransport for LoopbackTransport {
    fn request(&self, src: EdgeIndex, dst: EdgeIndex, message: Message) -> Result<Message> {
        if self.unreachable.lock().contains(&dst) {
            return Err(CoveredError::Transport(format!("edge {dst} unreachable")));
        }
        let node = self
            .nodes
            .read()
            .get(dst as usize)
            .and_then(|slot| slot.clone())
            .ok_or_else(|| CoveredError::Transport(format!("edge {dst} not registered")))?;
        let encoded = message.encode(src);
        let (decoded_src, decoded) = Message::decode(&encoded)?;
        debug_assert_eq!(decoded_src, src);
        let response = node.handle_message(decoded_src, decoded)?;
        let encoded_rsp = response.encode(dst);
        let (_, decoded_rsp) = Message::decode(&encoded_rsp)?;
        Ok(decoded_rsp)
    }
}
