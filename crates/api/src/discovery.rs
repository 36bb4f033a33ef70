//! Discovery-related types.
//!
//! Discovery establishes a consistent, ordered view of live nodes and
//! publishes immutable [Topology] snapshots as that view changes.

use crate::*;
use std::sync::Arc;

/// Represents the ability to discover and track grid members.
///
/// Topology events published through [Discovery::subscribe] are
/// authoritative and monotonically increasing: a consumer never sees a
/// lower version after a higher one.
pub trait Discovery: 'static + Send + Sync + std::fmt::Debug {
    /// The local node as currently known to the ring.
    fn local_node(&self) -> Arc<NodeInfo>;

    /// The current topology snapshot.
    fn topology(&self) -> Arc<Topology>;

    /// Look up a member node by id in the current topology.
    fn node(&self, id: &NodeId) -> Option<Arc<NodeInfo>>;

    /// Register a topology listener.
    ///
    /// The listener is invoked immediately with the current snapshot,
    /// then once per subsequent membership change.
    fn subscribe(&self, listener: DynTopologyListener);

    /// Join the grid, resolving once the local node is connected.
    ///
    /// Resolves with the first topology that includes the local node, or
    /// a [MeshError::Timeout] if the join did not complete in time.
    fn join(&self) -> BoxFut<'_, MeshResult<Arc<Topology>>>;

    /// Gracefully leave the grid.
    fn leave(&self) -> BoxFut<'_, MeshResult<()>>;
}

/// Trait-object [Discovery].
pub type DynDiscovery = Arc<dyn Discovery>;

/// A factory for constructing [Discovery] instances.
pub trait DiscoveryFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> MeshResult<()>;

    /// Validate configuration.
    fn validate_config(&self, config: &config::Config) -> MeshResult<()>;

    /// Construct a discovery instance for the given local node.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
        local: NodeInfo,
    ) -> BoxFut<'static, MeshResult<DynDiscovery>>;
}

/// Trait-object [DiscoveryFactory].
pub type DynDiscoveryFactory = Arc<dyn DiscoveryFactory>;
