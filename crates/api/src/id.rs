//! Types dealing with node identity and causal versioning.

/// Identifies a node in the grid.
///
/// Assigned once at node startup and stable for the node's lifetime.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub uuid::Uuid);

impl NodeId {
    /// Generate a fresh random node id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for NodeId {
    fn from(u: uuid::Uuid) -> Self {
        Self(u)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Comparable, globally unique, causally-ordered identifier.
///
/// Used as a ring message id and as a transaction/entry version stamp.
/// Totally ordered by `(counter, node)` so that ids produced by a single
/// source are ordered by creation, and ids from different sources never
/// compare equal. Immutable once created.
///
/// The derived `Ord` gives the (counter, node-id tiebreak) ordering
/// because of field declaration order.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct VersionedId {
    /// Local counter value at creation time.
    pub counter: u64,

    /// The node that created this id.
    pub node: NodeId,
}

impl std::fmt::Display for VersionedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.counter, self.node)
    }
}

impl std::fmt::Debug for VersionedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.counter, self.node)
    }
}

/// Produces [VersionedId]s for a single node.
///
/// The counter only moves forward. `observe` folds in counters seen from
/// remote ids so that ids created after a remote id was observed always
/// compare greater than it.
#[derive(Debug)]
pub struct VersionSource {
    node: NodeId,
    counter: std::sync::atomic::AtomicU64,
}

impl VersionSource {
    /// Construct a new source for the given local node.
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// The local node this source stamps ids with.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Produce the next id.
    pub fn next(&self) -> VersionedId {
        VersionedId {
            counter: self
                .counter
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
                + 1,
            node: self.node,
        }
    }

    /// Fold a remotely created id into the local counter.
    pub fn observe(&self, id: &VersionedId) {
        self.counter
            .fetch_max(id.counter, std::sync::atomic::Ordering::Relaxed);
    }
}
