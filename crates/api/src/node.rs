//! Node-related types.
//!
//! A [NodeInfo] is owned by the membership ring and referenced (never
//! owned) by the affinity and transaction mapping layers.

use crate::*;
use std::collections::BTreeMap;

/// Attribute marking a node as eligible to own cache partitions.
///
/// Nodes without this attribute are treated as data nodes. Setting it to
/// the literal string `"false"` excludes the node from partition
/// ownership (e.g. a pure compute or client node).
pub const ATTR_DATA_NODE: &str = "gridmesh.data";

/// Point-in-time metrics snapshot for one node.
///
/// Only the data needed for load-balancing decisions is carried here.
/// The reporting format is out of scope.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetrics {
    /// Current cpu load in [0.0, 1.0].
    pub cpu_load: f64,

    /// Jobs currently executing on the node.
    pub active_jobs: u32,

    /// Jobs queued on the node.
    pub waiting_jobs: u32,

    /// When this snapshot was taken.
    pub last_update: Timestamp,
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self {
            cpu_load: 0.0,
            active_jobs: 0,
            waiting_jobs: 0,
            last_update: Timestamp::from_micros(0),
        }
    }
}

/// A member (or prospective member) of the grid.
///
/// Created on a successful join handshake, marked failed/left on ring
/// consensus. `order` is the join sequence assigned by the coordinator;
/// zero means the node has not joined yet.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Globally unique node id.
    pub id: NodeId,

    /// Free-form node attributes.
    pub attributes: BTreeMap<String, String>,

    /// Latest metrics snapshot.
    pub metrics: NodeMetrics,

    /// Join sequence assigned by the coordinator. Zero until joined.
    pub order: u64,

    /// Ring listener address, if the node is network reachable.
    pub addr: Option<std::net::SocketAddr>,
}

impl NodeInfo {
    /// Construct a new, not-yet-joined node.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            attributes: BTreeMap::new(),
            metrics: NodeMetrics::default(),
            order: 0,
            addr: None,
        }
    }

    /// Set an attribute, builder style.
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set the ring listener address, builder style.
    pub fn with_addr(mut self, addr: std::net::SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    /// Set the join order, builder style.
    pub fn with_order(mut self, order: u64) -> Self {
        self.order = order;
        self
    }

    /// Get an attribute value.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Whether this node may own cache partitions.
    pub fn is_data_node(&self) -> bool {
        self.attribute(ATTR_DATA_NODE) != Some("false")
    }
}
