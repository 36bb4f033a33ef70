//! The partitioned affinity function: deterministic hash bucketing into
//! a fixed partition count, and rendezvous-hash owner selection against
//! a topology snapshot.

use gridmesh_api::affinity::*;
use gridmesh_api::builder::Builder;
use gridmesh_api::config::Config;
use gridmesh_api::*;
use std::sync::Arc;

/// PartitionedAffinity configuration types.
mod config {
    /// Configuration parameters for
    /// [PartitionedAffinityFactory](super::PartitionedAffinityFactory).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    #[serde(default)]
    pub struct PartitionedAffinityConfig {
        /// The fixed partition count for the cache. Must be a power of
        /// two or a prime, and is immutable for the cache's lifetime:
        /// changing it requires a new cache.
        ///
        /// Default: 1024.
        pub partitions: u32,

        /// How many backup owners to assign per partition in addition to
        /// the primary.
        ///
        /// Default: 1.
        pub backups: u32,
    }

    impl Default for PartitionedAffinityConfig {
        fn default() -> Self {
            Self {
                partitions: 1024,
                backups: 1,
            }
        }
    }

    /// Module-level configuration for PartitionedAffinity.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct PartitionedAffinityModConfig {
        /// PartitionedAffinity configuration.
        pub partitioned_affinity: PartitionedAffinityConfig,
    }

    impl gridmesh_api::config::ModConfig for PartitionedAffinityModConfig {}
}

pub use config::*;

/// The module name under which this factory stores its config.
pub const PARTITIONED_AFFINITY_MOD: &str = "partitionedAffinity";

/// Factory for the partitioned affinity function.
#[derive(Debug)]
pub struct PartitionedAffinityFactory {}

impl PartitionedAffinityFactory {
    /// Construct a new PartitionedAffinityFactory.
    pub fn create() -> DynAffinityFunctionFactory {
        let out: DynAffinityFunctionFactory = Arc::new(Self {});
        out
    }
}

impl AffinityFunctionFactory for PartitionedAffinityFactory {
    fn default_config(&self, config: &mut Config) -> MeshResult<()> {
        config.add_default_module_config::<PartitionedAffinityModConfig>(
            PARTITIONED_AFFINITY_MOD.into(),
        )
    }

    fn validate_config(&self, config: &Config) -> MeshResult<()> {
        let config: PartitionedAffinityModConfig =
            config.get_module_config(PARTITIONED_AFFINITY_MOD)?;
        validate(&config.partitioned_affinity)
    }

    fn create(
        &self,
        builder: Arc<Builder>,
    ) -> BoxFut<'static, MeshResult<DynAffinityFunction>> {
        Box::pin(async move {
            let config: PartitionedAffinityModConfig = builder
                .config
                .get_module_config(PARTITIONED_AFFINITY_MOD)?;
            let out: DynAffinityFunction = Arc::new(
                PartitionedAffinity::new(config.partitioned_affinity)?,
            );
            Ok(out)
        })
    }
}

fn validate(config: &PartitionedAffinityConfig) -> MeshResult<()> {
    let parts = config.partitions;
    if parts < 1 {
        return Err(MeshError::config("partition count must be positive"));
    }
    if !parts.is_power_of_two() && !is_prime(parts) {
        return Err(MeshError::config(format!(
            "partition count must be a power of two or a prime, got {parts}"
        )));
    }
    Ok(())
}

fn is_prime(n: u32) -> bool {
    if n < 2 {
        return false;
    }
    let mut d = 2_u32;
    while d.saturating_mul(d) <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

/// Stable 64-bit FNV-1a over arbitrary bytes.
///
/// The std Hasher is not stable across processes, and every node must
/// compute identical partition routing, so the hash is spelled out here.
fn fnv1a64(bytes: impl IntoIterator<Item = u8>) -> u64 {
    let mut hash = 0xcbf29ce484222325_u64;
    for b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Maps affinity keys to partitions and partitions to an ordered owner
/// list.
///
/// Owner selection is rendezvous (highest-random-weight) hashing over
/// `(partition, node id)`: deterministic for a given topology snapshot,
/// and when a single node joins or leaves, only partitions in which that
/// node ranks among the owners change hands.
#[derive(Debug)]
pub struct PartitionedAffinity {
    partitions: u32,
    backups: u32,
}

impl PartitionedAffinity {
    /// Construct from config, validating the partition count.
    pub fn new(config: PartitionedAffinityConfig) -> MeshResult<Self> {
        validate(&config)?;
        Ok(Self {
            partitions: config.partitions,
            backups: config.backups,
        })
    }

    fn score(partition: u32, node: &NodeInfo) -> u64 {
        let bytes = partition
            .to_le_bytes()
            .into_iter()
            .chain(node.id.0.into_bytes());
        fnv1a64(bytes)
    }
}

impl AffinityFunction for PartitionedAffinity {
    fn partition_count(&self) -> u32 {
        self.partitions
    }

    fn partition(&self, key: &AffinityKey) -> u32 {
        (fnv1a64(key.0.iter().copied()) % self.partitions as u64) as u32
    }

    fn nodes(
        &self,
        partition: u32,
        topology: &Topology,
    ) -> Vec<Arc<NodeInfo>> {
        let mut ranked: Vec<(u64, Arc<NodeInfo>)> = topology
            .data_nodes()
            .into_iter()
            .map(|n| (Self::score(partition, &n), n))
            .collect();

        // highest score first; node id disambiguates (a collision would
        // otherwise make the ranking depend on input order)
        ranked.sort_by(|a, b| (b.0, &b.1.id).cmp(&(a.0, &a.1.id)));

        ranked
            .into_iter()
            .take(self.backups as usize + 1)
            .map(|(_, n)| n)
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use gridmesh_test_utils::{test_node, test_topology};

    fn affinity(partitions: u32, backups: u32) -> PartitionedAffinity {
        PartitionedAffinity::new(PartitionedAffinityConfig {
            partitions,
            backups,
        })
        .unwrap()
    }

    #[test]
    fn partition_count_validation() {
        assert!(PartitionedAffinity::new(PartitionedAffinityConfig {
            partitions: 0,
            backups: 1,
        })
        .is_err());

        // 12 is neither a power of two nor a prime
        assert!(PartitionedAffinity::new(PartitionedAffinityConfig {
            partitions: 12,
            backups: 1,
        })
        .is_err());

        for parts in [1, 2, 64, 1024, 13, 7919] {
            assert!(
                PartitionedAffinity::new(PartitionedAffinityConfig {
                    partitions: parts,
                    backups: 1,
                })
                .is_ok(),
                "partition count {parts} should be accepted",
            );
        }
    }

    #[test]
    fn partition_is_stable() {
        let aff_a = affinity(1024, 1);
        let aff_b = affinity(1024, 2);

        for key in ["a", "hello", "some-much-longer-affinity-key"] {
            let akey = AffinityKey(bytes::Bytes::copy_from_slice(
                key.as_bytes(),
            ));
            let p = aff_a.partition(&akey);
            assert!(p < 1024);
            // stable across repeated calls and across instances
            assert_eq!(p, aff_a.partition(&akey));
            assert_eq!(p, aff_b.partition(&akey));
        }
    }

    #[test]
    fn empty_topology_empty_owners() {
        let aff = affinity(64, 1);
        assert!(aff.nodes(3, &Topology::empty()).is_empty());
    }

    #[test]
    fn owner_list_bounds() {
        let aff = affinity(128, 2);
        let topo = test_topology(5);

        for part in 0..128 {
            let owners = aff.nodes(part, &topo);
            assert_eq!(3, owners.len(), "backups+1 owners expected");

            let mut ids: Vec<_> = owners.iter().map(|n| n.id).collect();
            ids.dedup();
            ids.sort();
            ids.dedup();
            assert_eq!(3, ids.len(), "no duplicate owners");
        }

        // more backups requested than nodes available
        let aff = affinity(128, 9);
        let owners = aff.nodes(0, &topo);
        assert_eq!(5, owners.len());
    }

    #[test]
    fn non_data_nodes_excluded() {
        let aff = affinity(64, 3);
        let mut nodes = test_topology(3).nodes().to_vec();
        nodes.push(Arc::new(
            test_node(4).with_attribute(ATTR_DATA_NODE, "false"),
        ));
        let topo = Topology::new(4, nodes);

        for part in 0..64 {
            for owner in aff.nodes(part, &topo) {
                assert!(owner.is_data_node());
            }
        }
    }

    #[test]
    fn deterministic_across_instances() {
        let aff_a = affinity(256, 1);
        let aff_b = affinity(256, 1);
        let topo = test_topology(4);

        for part in 0..256 {
            let owners_a: Vec<_> =
                aff_a.nodes(part, &topo).iter().map(|n| n.id).collect();
            let owners_b: Vec<_> =
                aff_b.nodes(part, &topo).iter().map(|n| n.id).collect();
            assert_eq!(owners_a, owners_b);
        }
    }

    #[test]
    fn minimal_movement_on_join() {
        let aff = affinity(1024, 1);
        let before = test_topology(4);

        let mut nodes = before.nodes().to_vec();
        let joined = Arc::new(test_node(5));
        nodes.push(joined.clone());
        let after = Topology::new(before.version() + 1, nodes);

        for part in 0..1024 {
            let owners_before: Vec<_> =
                aff.nodes(part, &before).iter().map(|n| n.id).collect();
            let owners_after: Vec<_> =
                aff.nodes(part, &after).iter().map(|n| n.id).collect();

            if owners_before != owners_after {
                // the only permitted change is the new node displacing an
                // owner; every changed partition must now include it
                assert!(
                    owners_after.contains(&joined.id),
                    "partition {part} moved without involving the joined \
                     node",
                );
            }
        }
    }

    #[test]
    fn minimal_movement_on_leave() {
        let aff = affinity(1024, 1);
        let before = test_topology(5);
        let leaver = before.nodes()[2].clone();

        let nodes = before
            .nodes()
            .iter()
            .filter(|n| n.id != leaver.id)
            .cloned()
            .collect();
        let after = Topology::new(before.version() + 1, nodes);

        for part in 0..1024 {
            let owners_before: Vec<_> =
                aff.nodes(part, &before).iter().map(|n| n.id).collect();
            let owners_after: Vec<_> =
                aff.nodes(part, &after).iter().map(|n| n.id).collect();

            if !owners_before.contains(&leaver.id) {
                assert_eq!(
                    owners_before, owners_after,
                    "partition {part} moved though the leaver never owned \
                     it",
                );
            } else {
                assert!(!owners_after.contains(&leaver.id));
            }
        }
    }
}
