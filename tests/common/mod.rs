//! Shared fixtures: an in-process cluster over the loopback transport.

use std::sync::Arc;

use covered::{
    ClusterContext, CoveredConfig, EdgeNode, Key, LoopbackTransport, LruLocalCache, MemoryCloud,
};

pub struct Cluster {
    pub nodes: Vec<Arc<EdgeNode>>,
    pub transport: Arc<LoopbackTransport>,
    pub cloud: Arc<MemoryCloud>,
    pub ctx: Arc<ClusterContext>,
}

pub fn cluster(edge_count: u32, cfg: CoveredConfig) -> Cluster {
    covered::logging::init();
    let cfg = Arc::new(cfg);
    let ctx = Arc::new(ClusterContext::new(edge_count, &cfg));
    let transport = LoopbackTransport::new(edge_count);
    let cloud = Arc::new(MemoryCloud::new());
    let nodes: Vec<Arc<EdgeNode>> = (0..edge_count)
        .map(|idx| {
            let node = EdgeNode::new(
                idx,
                Arc::clone(&ctx),
                Arc::clone(&cfg),
                Box::new(LruLocalCache::new(cfg.cache_capacity_bytes)),
                transport.clone(),
                cloud.clone(),
            );
            transport.register(node.clone());
            node
        })
        .collect();
    Cluster {
        nodes,
        transport,
        cloud,
        ctx,
    }
}

pub fn default_cluster(edge_count: u32) -> Cluster {
    cluster(edge_count, CoveredConfig::for_testing())
}

/// A key whose beacon is the given edge, found by brute force.
pub fn key_with_beacon(cluster: &Cluster, beacon: u32, tag: &str) -> Key {
    for nonce in 0..10_000u32 {
        let key = Key::from(format!("{tag}-{nonce}"));
        if cluster.ctx.beacon_of(&key) == beacon {
            return key;
        }
    }
    panic!("no key with beacon {beacon} found for tag {tag}");
}
