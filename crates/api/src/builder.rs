//! Builder-related types.

use crate::affinity::*;
use crate::balance::*;
use crate::discovery::*;
use crate::*;
use std::sync::Arc;

/// The general gridmesh builder.
///
/// Contains both configuration and factory instances, allowing
/// construction of runtime module instances. Configuration errors fail
/// fast here, before any module is partially initialized.
#[derive(Debug)]
pub struct Builder {
    /// The module configuration to be used when building modules.
    /// This can be loaded from disk or modified before freezing the
    /// builder.
    pub config: config::Config,

    /// The [AffinityMapperFactory] to be used for creating
    /// [AffinityMapper](crate::affinity::AffinityMapper) instances.
    pub affinity_mapper: DynAffinityMapperFactory,

    /// The [AffinityFunctionFactory] to be used for creating
    /// [AffinityFunction](crate::affinity::AffinityFunction) instances.
    pub affinity: DynAffinityFunctionFactory,

    /// The [DiscoveryFactory] to be used for creating
    /// [Discovery](crate::discovery::Discovery) instances.
    pub discovery: DynDiscoveryFactory,

    /// The [LoadBalancerFactory] to be used for creating
    /// [LoadBalancer](crate::balance::LoadBalancer) instances.
    pub load_balancer: DynLoadBalancerFactory,
}

impl Builder {
    /// Construct a default config given the configured module factories.
    /// Note, this should be called before freezing the Builder instance
    /// in an Arc<>.
    pub fn set_default_config(&mut self) -> MeshResult<()> {
        let Self {
            config,
            affinity_mapper,
            affinity,
            discovery,
            load_balancer,
        } = self;

        affinity_mapper.default_config(config)?;
        affinity.default_config(config)?;
        discovery.default_config(config)?;
        load_balancer.default_config(config)?;

        Ok(())
    }

    /// Validate the full config against all configured factories.
    pub fn validate_config(&self) -> MeshResult<()> {
        self.affinity_mapper.validate_config(&self.config)?;
        self.affinity.validate_config(&self.config)?;
        self.discovery.validate_config(&self.config)?;
        self.load_balancer.validate_config(&self.config)?;

        Ok(())
    }

    /// Freeze the builder for use by module factories.
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }
}
