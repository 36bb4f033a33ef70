#![deny(missing_docs)]
//! Test fixtures and helpers for gridmesh crates.

use gridmesh_api::*;
use std::sync::Arc;

/// Enable tracing output in tests, filtered by the RUST_LOG environment
/// variable, defaulting to DEBUG.
pub fn enable_tracing() {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::DEBUG.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Generate some random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    use rand::Rng;
    let mut out = vec![0; len];
    rand::thread_rng().fill(&mut out[..]);
    out
}

/// A joined node fixture with a random id and the given join order.
pub fn test_node(order: u64) -> NodeInfo {
    NodeInfo::new(NodeId::new()).with_order(order)
}

/// A topology fixture of `count` joined data nodes, with join orders
/// `1..=count` and version equal to `count`.
pub fn test_topology(count: u64) -> Topology {
    let nodes = (1..=count).map(|o| Arc::new(test_node(o))).collect();
    Topology::new(count, nodes)
}
