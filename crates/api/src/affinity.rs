//! Affinity-related types.
//!
//! Affinity answers "which nodes own this key": a cache key is first
//! translated to an affinity key, the affinity key is bucketed into a
//! partition, and the partition is resolved to an ordered owner list
//! against a topology snapshot.

use crate::*;
use std::sync::Arc;

/// A cache key.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct Key(pub bytes::Bytes);

impl std::ops::Deref for Key {
    type Target = bytes::Bytes;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<bytes::Bytes> for Key {
    fn from(b: bytes::Bytes) -> Self {
        Self(b)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(bytes::Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Key {
    fn from(v: Vec<u8>) -> Self {
        Self(bytes::Bytes::from(v))
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key({})", String::from_utf8_lossy(&self.0))
    }
}

/// The value used to decide which partition owns a cache key.
///
/// May differ from the key itself, e.g. to co-locate related entries on
/// one node.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct AffinityKey(pub bytes::Bytes);

impl std::ops::Deref for AffinityKey {
    type Target = bytes::Bytes;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<bytes::Bytes> for AffinityKey {
    fn from(b: bytes::Bytes) -> Self {
        Self(b)
    }
}

impl std::fmt::Debug for AffinityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AffinityKey({})", String::from_utf8_lossy(&self.0))
    }
}

/// Maps a cache key to its affinity key.
///
/// Must be a pure, deterministic function of the key. The one permitted
/// side effect is [AffinityMapper::reset], invoked after the mapper is
/// deserialized on a remote node so implementations can reinitialize any
/// transient derived state.
pub trait AffinityMapper: 'static + Send + Sync + std::fmt::Debug {
    /// Compute the affinity key for a cache key.
    fn affinity_key(&self, key: &Key) -> AffinityKey;

    /// Reinitialize transient derived state after deserialization on a
    /// remote node. Implementations with no such state treat this as a
    /// no-op.
    fn reset(&self);
}

/// Trait-object [AffinityMapper].
pub type DynAffinityMapper = Arc<dyn AffinityMapper>;

/// A factory for constructing [AffinityMapper] instances.
pub trait AffinityMapperFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> MeshResult<()>;

    /// Validate configuration.
    fn validate_config(&self, config: &config::Config) -> MeshResult<()>;

    /// Construct an affinity mapper instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, MeshResult<DynAffinityMapper>>;
}

/// Trait-object [AffinityMapperFactory].
pub type DynAffinityMapperFactory = Arc<dyn AffinityMapperFactory>;

/// Maps affinity keys to partitions and partitions to owning nodes.
///
/// For a fixed topology version and key the mapping is a deterministic
/// pure function, so any node can independently compute the same routing
/// without consensus round-trips.
pub trait AffinityFunction: 'static + Send + Sync + std::fmt::Debug {
    /// The fixed partition count. Immutable for the cache's lifetime.
    fn partition_count(&self) -> u32;

    /// Deterministically bucket an affinity key into a partition,
    /// independent of topology.
    fn partition(&self, key: &AffinityKey) -> u32;

    /// Select the ordered owner list for a partition given a topology
    /// snapshot. The first node is the primary, the rest are backups.
    ///
    /// Returns an empty list for an empty topology: the caller must treat
    /// that as "no mapping, hold locally or fail".
    fn nodes(
        &self,
        partition: u32,
        topology: &Topology,
    ) -> Vec<Arc<NodeInfo>>;
}

/// Trait-object [AffinityFunction].
pub type DynAffinityFunction = Arc<dyn AffinityFunction>;

/// A factory for constructing [AffinityFunction] instances.
pub trait AffinityFunctionFactory:
    'static + Send + Sync + std::fmt::Debug
{
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> MeshResult<()>;

    /// Validate configuration.
    fn validate_config(&self, config: &config::Config) -> MeshResult<()>;

    /// Construct an affinity function instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, MeshResult<DynAffinityFunction>>;
}

/// Trait-object [AffinityFunctionFactory].
pub type DynAffinityFunctionFactory = Arc<dyn AffinityFunctionFactory>;
