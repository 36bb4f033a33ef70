//! Round-robin load balancer: the default job-routing policy.

use gridmesh_api::balance::*;
use gridmesh_api::builder::Builder;
use gridmesh_api::config::Config;
use gridmesh_api::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Factory for the round-robin load balancer.
#[derive(Debug)]
pub struct RoundRobinBalancerFactory {}

impl RoundRobinBalancerFactory {
    /// Construct a new RoundRobinBalancerFactory.
    pub fn create() -> DynLoadBalancerFactory {
        let out: DynLoadBalancerFactory = Arc::new(Self {});
        out
    }
}

impl LoadBalancerFactory for RoundRobinBalancerFactory {
    fn default_config(&self, _config: &mut Config) -> MeshResult<()> {
        Ok(())
    }

    fn validate_config(&self, _config: &Config) -> MeshResult<()> {
        Ok(())
    }

    fn create(
        &self,
        _builder: Arc<Builder>,
    ) -> BoxFut<'static, MeshResult<DynLoadBalancer>> {
        Box::pin(async move {
            let out: DynLoadBalancer = Arc::new(RoundRobinBalancer {
                cursor: AtomicUsize::new(0),
            });
            Ok(out)
        })
    }
}

/// Cycles through the supplied topology list, one pick per call.
///
/// The cursor is process-wide rather than per-session: jobs from all
/// sessions share one rotation, which keeps the spread even when
/// sessions are short-lived.
#[derive(Debug)]
struct RoundRobinBalancer {
    cursor: AtomicUsize,
}

impl LoadBalancer for RoundRobinBalancer {
    fn pick_node(
        &self,
        _session: &str,
        topology: &[Arc<NodeInfo>],
        job: &str,
    ) -> MeshResult<Arc<NodeInfo>> {
        if topology.is_empty() {
            return Err(MeshError::other(format!(
                "no nodes to balance job {job:?} onto"
            )));
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(topology[idx % topology.len()].clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use gridmesh_test_utils::test_topology;

    #[test]
    fn cycles_through_topology() {
        let balancer = RoundRobinBalancer {
            cursor: AtomicUsize::new(0),
        };
        let topo = test_topology(3);
        let nodes = topo.nodes();

        for round in 0..2 {
            for node in nodes {
                let picked = balancer
                    .pick_node("ses-1", nodes, "job")
                    .unwrap();
                assert_eq!(node.id, picked.id, "round {round}");
            }
        }
    }

    #[test]
    fn empty_topology_fails() {
        let balancer = RoundRobinBalancer {
            cursor: AtomicUsize::new(0),
        };
        assert!(balancer.pick_node("ses-1", &[], "job").is_err());
    }
}
