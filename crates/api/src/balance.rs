//! Load-balancing SPI types.
//!
//! The core does not depend on any balancing algorithm, only on this
//! contract: given a session, a topology node list, and a job, return
//! exactly one node from the list or fail.

use crate::*;
use std::sync::Arc;

/// Picks a node to execute a remote job on.
pub trait LoadBalancer: 'static + Send + Sync + std::fmt::Debug {
    /// Select exactly one node from `topology` to run `job` for the
    /// given session, or fail if the list is empty.
    fn pick_node(
        &self,
        session: &str,
        topology: &[Arc<NodeInfo>],
        job: &str,
    ) -> MeshResult<Arc<NodeInfo>>;
}

/// Trait-object [LoadBalancer].
pub type DynLoadBalancer = Arc<dyn LoadBalancer>;

/// A factory for constructing [LoadBalancer] instances.
pub trait LoadBalancerFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> MeshResult<()>;

    /// Validate configuration.
    fn validate_config(&self, config: &config::Config) -> MeshResult<()>;

    /// Construct a load balancer instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, MeshResult<DynLoadBalancer>>;
}

/// Trait-object [LoadBalancerFactory].
pub type DynLoadBalancerFactory = Arc<dyn LoadBalancerFactory>;
