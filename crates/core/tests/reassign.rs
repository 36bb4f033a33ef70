//! Partition ownership across membership changes.

use gridmesh_api::affinity::*;
use gridmesh_api::*;
use gridmesh_core::factories::*;
use gridmesh_test_utils::{random_bytes, test_topology};
use std::collections::HashSet;

fn affinity() -> PartitionedAffinity {
    PartitionedAffinity::new(PartitionedAffinityConfig {
        partitions: 1024,
        backups: 1,
    })
    .unwrap()
}

fn without(topo: &Topology, id: &NodeId) -> Topology {
    Topology::new(
        topo.version() + 1,
        topo.nodes()
            .iter()
            .filter(|n| &n.id != id)
            .cloned()
            .collect(),
    )
}

#[test]
fn failover_promotes_former_backup() {
    let aff = affinity();
    let before = test_topology(5);
    let failed = before.nodes()[2].clone();
    let after = without(&before, &failed.id);

    let mut moved = 0;
    for part in 0..1024 {
        let owners_before = aff.nodes(part, &before);
        let owners_after = aff.nodes(part, &after);

        if owners_before[0].id == failed.id {
            // the failed primary's backup takes over
            assert_eq!(
                owners_before[1].id, owners_after[0].id,
                "partition {part}",
            );
            moved += 1;
        } else {
            // surviving primaries keep their partitions
            assert_eq!(
                owners_before[0].id, owners_after[0].id,
                "partition {part}",
            );
        }
    }
    assert!(moved > 0);
}

#[test]
fn keys_spread_and_remap_after_failure() {
    let aff = affinity();
    let before = test_topology(5);
    let failed = before.nodes()[0].clone();
    let after = without(&before, &failed.id);

    let keys: Vec<AffinityKey> = (0..10_000)
        .map(|_| AffinityKey::from(bytes::Bytes::from(random_bytes(16))))
        .collect();

    let primaries = |topo: &Topology| -> HashSet<NodeId> {
        keys.iter()
            .map(|k| {
                let part = aff.partition(k);
                assert!(part < 1024);
                aff.nodes(part, topo)[0].id
            })
            .collect()
    };

    let spread_before = primaries(&before);
    assert_eq!(5, spread_before.len());

    let spread_after = primaries(&after);
    assert_eq!(4, spread_after.len());
    assert!(!spread_after.contains(&failed.id));
}
