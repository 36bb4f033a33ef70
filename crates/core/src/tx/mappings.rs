//! Transaction mapping across the full owning node set.

use crate::tx::{TxEntry, TxMapping};
use gridmesh_api::affinity::{DynAffinityFunction, DynAffinityMapper};
use gridmesh_api::{MeshError, MeshResult, NodeId, Topology};
use std::sync::Arc;

/// All per-node mappings for one transaction.
///
/// Entries are grouped by primary owner; backup owners are recorded in a
/// separate map for replication. Pinned to the topology version captured
/// at transaction start: the mapping is never recomputed against a newer
/// snapshot mid-transaction, which would yield inconsistent partial
/// mappings.
///
/// Dropping this value is abrupt abandonment: all entries are released.
/// Timeout policy belongs to the transaction coordinator, not here.
pub struct TxMappings {
    topology_version: u64,
    primary: dashmap::DashMap<NodeId, Arc<TxMapping>>,
    backup: dashmap::DashMap<NodeId, Arc<TxMapping>>,
}

impl std::fmt::Debug for TxMappings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxMappings")
            .field("topology_version", &self.topology_version)
            .field("primary_nodes", &self.primary.len())
            .field("backup_nodes", &self.backup.len())
            .finish()
    }
}

impl TxMappings {
    /// Map a transaction's entry set onto the nodes that own each key.
    ///
    /// For every entry the owning nodes are computed via the affinity
    /// function against the supplied topology snapshot. An entry whose
    /// partition has no owners (empty topology, or no data nodes) fails
    /// the whole mapping: the caller must hold locally or fail.
    pub fn map(
        entries: impl IntoIterator<Item = TxEntry>,
        topology: &Topology,
        mapper: &DynAffinityMapper,
        affinity: &DynAffinityFunction,
    ) -> MeshResult<Self> {
        let out = Self {
            topology_version: topology.version(),
            primary: dashmap::DashMap::new(),
            backup: dashmap::DashMap::new(),
        };

        for mut entry in entries {
            let akey = mapper.affinity_key(&entry.key);
            entry.partition = affinity.partition(&akey);

            let owners = affinity.nodes(entry.partition, topology);
            let Some(primary) = owners.first() else {
                return Err(MeshError::other(format!(
                    "no owning nodes for partition {} at topology v{}",
                    entry.partition,
                    topology.version(),
                )));
            };

            for backup in &owners[1..] {
                out.backup
                    .entry(backup.id)
                    .or_insert_with(|| {
                        Arc::new(TxMapping::new(backup.clone()))
                    })
                    .add(entry.clone());
            }

            out.primary
                .entry(primary.id)
                .or_insert_with(|| Arc::new(TxMapping::new(primary.clone())))
                .add(entry);
        }

        tracing::debug!(
            topology_version = out.topology_version,
            primary_nodes = out.primary.len(),
            backup_nodes = out.backup.len(),
            "transaction mapped",
        );

        Ok(out)
    }

    /// The topology version this mapping was computed against.
    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    /// The primary mapping for a node, if the transaction touches keys
    /// it owns.
    pub fn primary(&self, node: &NodeId) -> Option<Arc<TxMapping>> {
        self.primary.get(node).map(|m| m.value().clone())
    }

    /// The backup (replication) mapping for a node, if any.
    pub fn backup(&self, node: &NodeId) -> Option<Arc<TxMapping>> {
        self.backup.get(node).map(|m| m.value().clone())
    }

    /// All primary mappings.
    pub fn primaries(&self) -> Vec<Arc<TxMapping>> {
        self.primary.iter().map(|m| m.value().clone()).collect()
    }

    /// All backup mappings.
    pub fn backups(&self) -> Vec<Arc<TxMapping>> {
        self.backup.iter().map(|m| m.value().clone()).collect()
    }

    /// Ids of nodes holding a primary mapping.
    pub fn primary_nodes(&self) -> Vec<NodeId> {
        self.primary.iter().map(|m| *m.key()).collect()
    }

    /// Total entries across primary mappings.
    pub fn len(&self) -> usize {
        self.primary.iter().map(|m| m.value().len()).sum()
    }

    /// `true` if no primary mapping holds any entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict the moved partitions from every mapping, dropping mappings
    /// that end up empty.
    pub fn evict_partitions(&self, parts: &[u32]) {
        if parts.is_empty() {
            return;
        }
        for map in [&self.primary, &self.backup] {
            for m in map.iter() {
                m.value().evict_partitions(parts);
            }
            map.retain(|_, m| !m.is_empty());
        }
    }

    /// Evict cached read-only entries for the given keys from every
    /// mapping, dropping mappings that end up empty.
    pub fn evict_readers(&self, keys: &[gridmesh_api::affinity::Key]) {
        if keys.is_empty() {
            return;
        }
        for map in [&self.primary, &self.backup] {
            for m in map.iter() {
                m.value().evict_readers(keys);
            }
            map.retain(|_, m| !m.is_empty());
        }
    }
}
