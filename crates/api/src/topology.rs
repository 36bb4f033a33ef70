//! Topology snapshot types.

use crate::*;
use std::sync::Arc;

/// An immutable, versioned snapshot of cluster membership.
///
/// A new Topology is produced on every membership change. All affinity
/// computations take a snapshot as input, never the live ring, so any
/// node can independently compute the same partition-to-node routing for
/// a given version.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    version: u64,
    nodes: Vec<Arc<NodeInfo>>,
}

impl Topology {
    /// Construct a snapshot from a node list.
    ///
    /// Nodes are ordered by join sequence (node id breaks ties, which can
    /// only happen for not-yet-joined fixtures in tests).
    pub fn new(version: u64, mut nodes: Vec<Arc<NodeInfo>>) -> Self {
        nodes.sort_by(|a, b| (a.order, a.id).cmp(&(b.order, b.id)));
        Self { version, nodes }
    }

    /// An empty, version-zero topology.
    pub fn empty() -> Self {
        Self {
            version: 0,
            nodes: Vec::new(),
        }
    }

    /// The monotonically increasing topology version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// All nodes, ordered by join sequence.
    pub fn nodes(&self) -> &[Arc<NodeInfo>] {
        &self.nodes
    }

    /// Nodes eligible to own cache partitions, ordered by join sequence.
    pub fn data_nodes(&self) -> Vec<Arc<NodeInfo>> {
        self.nodes
            .iter()
            .filter(|n| n.is_data_node())
            .cloned()
            .collect()
    }

    /// Look up a node by id.
    pub fn node(&self, id: &NodeId) -> Option<&Arc<NodeInfo>> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Whether the given node is a member of this snapshot.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Number of member nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` if the snapshot has no members.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Receives authoritative topology snapshots from discovery.
///
/// Events are monotonically increasing: a consumer is never handed a
/// lower version after a higher one.
pub trait TopologyListener: 'static + Send + Sync {
    /// A new topology snapshot became authoritative.
    fn on_topology_change(&self, topology: Arc<Topology>);
}

/// Trait-object [TopologyListener].
pub type DynTopologyListener = Arc<dyn TopologyListener>;

impl<F> TopologyListener for F
where
    F: Fn(Arc<Topology>) + 'static + Send + Sync,
{
    fn on_topology_change(&self, topology: Arc<Topology>) {
        self(topology)
    }
}
