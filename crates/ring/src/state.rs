//! The ring membership state machine.
//!
//! [RingState] is pure: it consumes ring messages and emits
//! [RingEffect]s, leaving all io to the caller. This keeps the
//! protocol's ordering rules testable without sockets.
//!
//! Ordering rules:
//! - Only the coordinator (oldest live member) stamps topology changes,
//!   assigning each a contiguous topology version. Unverified change
//!   requests circulate until they reach a node that can stamp them.
//! - Admissions carry the full membership and are adopted as snapshots.
//! - Removals are deltas: a removal for version `v` is applied only
//!   when the local version is `v - 1`. Removals arriving early are
//!   held until the gap fills; removals at or below the local version
//!   are duplicates and are dropped.
//!
//! Together these give every member the same membership at every
//! version it passes through, regardless of message arrival order.

use crate::protocol::*;
use gridmesh_api::*;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

/// How many circulated message ids to remember for de-duplication.
const SEEN_CAP: usize = 4096;

/// The local node's ring lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Join requested, admission not yet confirmed.
    Joining,

    /// A live member of the grid.
    Connected,

    /// Gracefully left. Terminal.
    Left,

    /// Declared failed by the ring while locally alive. Terminal.
    Failed,

    /// Lost quorum and stopped serving. Terminal.
    Segmented,
}

/// An io action requested by [RingState::handle].
#[derive(Debug)]
pub enum RingEffect {
    /// Send this message to the current ring successor.
    Forward(RingMessage),

    /// A new topology snapshot became authoritative.
    Publish(Arc<Topology>),

    /// The local node's admission was confirmed.
    Connected,

    /// The local node stopped serving. Terminal.
    Segmented,
}

/// Pure ring membership state for one node.
#[derive(Debug)]
pub struct RingState {
    local: NodeInfo,
    status: NodeStatus,
    members: BTreeMap<u64, Arc<NodeInfo>>,
    suspects: HashSet<NodeId>,
    top_ver: u64,
    max_order: u64,
    max_connected_size: usize,
    seen: HashSet<VersionedId>,
    seen_order: VecDeque<VersionedId>,
    pending: BTreeMap<u64, RingMessage>,
    versions: VersionSource,
    quorum_fraction: f64,
}

impl RingState {
    /// Construct state for a node that has not joined anything yet.
    pub fn new(local: NodeInfo, quorum_fraction: f64) -> Self {
        let versions = VersionSource::new(local.id);
        Self {
            local,
            status: NodeStatus::Joining,
            members: BTreeMap::new(),
            suspects: HashSet::new(),
            top_ver: 0,
            max_order: 0,
            max_connected_size: 0,
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            pending: BTreeMap::new(),
            versions,
            quorum_fraction,
        }
    }

    /// Bootstrap a brand new single-node grid. The local node becomes
    /// coordinator with join order 1 at topology version 1.
    pub fn start_first(&mut self) -> Vec<RingEffect> {
        let mut effects = Vec::new();
        self.local.order = 1;
        self.members.insert(1, Arc::new(self.local.clone()));
        self.top_ver = 1;
        self.max_order = 1;
        self.max_connected_size = 1;
        self.status = NodeStatus::Connected;
        self.publish(&mut effects);
        effects.push(RingEffect::Connected);
        effects
    }

    /// The local node as currently known.
    pub fn local_node(&self) -> NodeInfo {
        self.local.clone()
    }

    /// The local ring lifecycle status.
    pub fn status(&self) -> NodeStatus {
        self.status
    }

    /// The current topology snapshot.
    pub fn topology(&self) -> Arc<Topology> {
        Arc::new(Topology::new(
            self.top_ver,
            self.members.values().cloned().collect(),
        ))
    }

    /// The current coordinator: oldest member not under suspicion.
    pub fn coordinator(&self) -> Option<Arc<NodeInfo>> {
        self.members
            .values()
            .find(|n| !self.suspects.contains(&n.id))
            .cloned()
    }

    /// The next live member after the local node, ring-wise.
    pub fn successor(&self) -> Option<Arc<NodeInfo>> {
        let live = |n: &&Arc<NodeInfo>| {
            !self.suspects.contains(&n.id) && n.id != self.local.id
        };
        self.members
            .range(self.local.order + 1..)
            .map(|(_, n)| n)
            .find(live)
            .or_else(|| self.members.values().find(live))
            .cloned()
    }

    /// Build a join request for the local node.
    pub fn join_request(&mut self) -> RingMessage {
        let msg = RingMessage {
            header: self.header(None, 0),
            body: RingBody::JoinRequest {
                node: self.local.clone(),
            },
        };
        self.mark_seen(msg.header.id);
        msg
    }

    /// Build the next heartbeat circulation.
    pub fn next_heartbeat(&mut self) -> RingMessage {
        let msg = RingMessage {
            header: self.header(None, 0),
            body: RingBody::Heartbeat,
        };
        self.mark_seen(msg.header.id);
        msg
    }

    /// Build a direct liveness probe.
    pub fn probe(&mut self) -> RingMessage {
        RingMessage {
            header: self.header(None, 0),
            body: RingBody::Ping,
        }
    }

    /// Build the answer to a direct liveness probe.
    pub fn probe_reply(&mut self) -> RingMessage {
        RingMessage {
            header: self.header(None, 0),
            body: RingBody::Pong,
        }
    }

    /// The sender-side failure path: the caller could not reach this
    /// member even with a direct probe. Routes a failure declaration to
    /// the coordinator, or stamps it directly if the local node is the
    /// acting coordinator once the suspect is excluded.
    pub fn suspect_failed(&mut self, node: NodeId) -> Vec<RingEffect> {
        let mut effects = Vec::new();
        if node == self.local.id || self.by_id(&node).is_none() {
            return effects;
        }
        self.suspects.insert(node);

        if self.is_acting_coordinator(Some(node)) {
            let version = self.top_ver + 1;
            let stamped = RingMessage {
                header: self.header(Some(self.local.id), version),
                body: RingBody::Fail { node },
            };
            self.mark_seen(stamped.header.id);
            self.apply_removal(node, version, true, &mut effects);
            effects.push(RingEffect::Forward(stamped));
        } else {
            let msg = RingMessage {
                header: self.header(None, 0),
                body: RingBody::Fail { node },
            };
            self.mark_seen(msg.header.id);
            effects.push(RingEffect::Forward(msg));
        }
        effects
    }

    /// Announce a graceful leave of the local node. The local status
    /// becomes [NodeStatus::Left] immediately; the returned effects
    /// carry the announcement into the ring.
    pub fn local_leave(&mut self) -> Vec<RingEffect> {
        let mut effects = Vec::new();
        if self.status != NodeStatus::Connected {
            self.status = NodeStatus::Left;
            return effects;
        }

        let stamp = self.is_acting_coordinator(None);
        self.status = NodeStatus::Left;

        let msg = if stamp {
            RingMessage {
                header: self.header(Some(self.local.id), self.top_ver + 1),
                body: RingBody::Leave {
                    node: self.local.id,
                },
            }
        } else {
            RingMessage {
                header: self.header(None, 0),
                body: RingBody::Leave {
                    node: self.local.id,
                },
            }
        };
        self.mark_seen(msg.header.id);
        effects.push(RingEffect::Forward(msg));
        effects
    }

    /// Process one inbound ring message.
    pub fn handle(&mut self, msg: RingMessage) -> Vec<RingEffect> {
        let mut effects = Vec::new();
        self.versions.observe(&msg.header.id);

        if self.seen.contains(&msg.header.id) {
            // completed a full circle back to its origin
            if matches!(msg.body, RingBody::NodeAdded { .. })
                && msg.header.verifier == Some(self.local.id)
            {
                // every member acknowledged the admission: confirm it,
                // which flips the joiner to connected
                let broadcast = RingMessage {
                    header: self.header(Some(self.local.id), self.top_ver),
                    body: RingBody::TopologyBroadcast {
                        version: self.top_ver,
                        ring: self.ring_nodes(),
                    },
                };
                self.mark_seen(broadcast.header.id);
                effects.push(RingEffect::Forward(broadcast));
            }
            return effects;
        }
        self.mark_seen(msg.header.id);

        match msg.body.clone() {
            // direct probes are answered inline by the io layer
            RingBody::Ping | RingBody::Pong => (),

            RingBody::Heartbeat => effects.push(RingEffect::Forward(msg)),

            RingBody::JoinRequest { node } => {
                self.handle_join(msg, node, &mut effects)
            }

            RingBody::NodeAdded { node: _, ring } => {
                if msg.header.verifier.is_none() {
                    return effects;
                }
                if self.adopt(msg.header.topology_version, &ring, &mut effects)
                {
                    self.drain_pending(&mut effects);
                    effects.push(RingEffect::Forward(msg));
                }
            }

            RingBody::TopologyBroadcast { version, ring } => {
                if msg.header.verifier.is_none() {
                    return effects;
                }
                self.adopt(version, &ring, &mut effects);
                if self.status == NodeStatus::Joining
                    && ring.iter().any(|n| n.id == self.local.id)
                {
                    self.status = NodeStatus::Connected;
                    effects.push(RingEffect::Connected);
                }
                effects.push(RingEffect::Forward(msg));
            }

            RingBody::Leave { node } => {
                self.handle_removal(msg, node, false, &mut effects)
            }

            RingBody::Fail { node } => {
                self.handle_removal(msg, node, true, &mut effects)
            }
        }

        effects
    }

    fn handle_join(
        &mut self,
        msg: RingMessage,
        node: NodeInfo,
        effects: &mut Vec<RingEffect>,
    ) {
        if !self.is_acting_coordinator(None) {
            effects.push(RingEffect::Forward(msg));
            return;
        }
        if self.by_id(&node.id).is_some() {
            // duplicate join request from an existing member
            return;
        }

        let order = self.max_order + 1;
        let version = self.top_ver + 1;
        let node = node.with_order(order);

        let mut ring = self.ring_nodes();
        ring.push(node.clone());

        let added = RingMessage {
            header: self.header(Some(self.local.id), version),
            body: RingBody::NodeAdded {
                node,
                ring: ring.clone(),
            },
        };
        self.mark_seen(added.header.id);
        self.adopt(version, &ring, effects);
        effects.push(RingEffect::Forward(added));
    }

    fn handle_removal(
        &mut self,
        msg: RingMessage,
        node: NodeId,
        failed: bool,
        effects: &mut Vec<RingEffect>,
    ) {
        match msg.header.verifier {
            None => {
                if !self.is_acting_coordinator(Some(node)) {
                    effects.push(RingEffect::Forward(msg));
                    return;
                }
                if self.by_id(&node).is_none() {
                    // already removed
                    return;
                }
                let version = self.top_ver + 1;
                let stamped = RingMessage {
                    header: self.header(Some(self.local.id), version),
                    body: msg.body.clone(),
                };
                self.mark_seen(stamped.header.id);
                self.apply_removal(node, version, failed, effects);
                effects.push(RingEffect::Forward(stamped));
            }
            Some(_) => {
                let version = msg.header.topology_version;
                if version <= self.top_ver {
                    return;
                }
                if version == self.top_ver + 1 {
                    self.apply_removal(node, version, failed, effects);
                    self.drain_pending(effects);
                    effects.push(RingEffect::Forward(msg));
                } else {
                    // a change in between has not arrived yet
                    self.pending.insert(version, msg);
                }
            }
        }
    }

    /// Adopt a full membership snapshot if it is newer than ours.
    fn adopt(
        &mut self,
        version: u64,
        ring: &[NodeInfo],
        effects: &mut Vec<RingEffect>,
    ) -> bool {
        if version <= self.top_ver {
            return false;
        }
        self.top_ver = version;
        self.members = ring
            .iter()
            .map(|n| (n.order, Arc::new(n.clone())))
            .collect();
        self.max_order =
            self.members.keys().next_back().copied().unwrap_or(0);
        self.max_connected_size =
            self.max_connected_size.max(self.members.len());
        if let Some(me) = ring.iter().find(|n| n.id == self.local.id) {
            self.local.order = me.order;
        }
        self.suspects
            .retain(|id| ring.iter().any(|n| &n.id == id));
        self.publish(effects);
        true
    }

    fn apply_removal(
        &mut self,
        node: NodeId,
        version: u64,
        failed: bool,
        effects: &mut Vec<RingEffect>,
    ) {
        self.top_ver = version;
        self.suspects.remove(&node);
        let order = self
            .members
            .iter()
            .find(|(_, n)| n.id == node)
            .map(|(o, _)| *o);
        if let Some(order) = order {
            self.members.remove(&order);
        }

        if node == self.local.id {
            // the ring declared us failed while we think we are alive;
            // stop serving
            if failed && self.status == NodeStatus::Connected {
                self.status = NodeStatus::Failed;
                effects.push(RingEffect::Segmented);
            }
            return;
        }

        self.publish(effects);

        if self.max_connected_size > 2
            && self.status == NodeStatus::Connected
        {
            let quorum =
                self.quorum_fraction * self.max_connected_size as f64;
            if (self.members.len() as f64) < quorum {
                tracing::error!(
                    remaining = self.members.len(),
                    max_connected = self.max_connected_size,
                    "lost quorum, segmenting",
                );
                self.status = NodeStatus::Segmented;
                effects.push(RingEffect::Segmented);
            }
        }
    }

    fn drain_pending(&mut self, effects: &mut Vec<RingEffect>) {
        while let Some((&version, _)) = self.pending.iter().next() {
            if version <= self.top_ver {
                self.pending.remove(&version);
                continue;
            }
            if version != self.top_ver + 1 {
                break;
            }
            if let Some(msg) = self.pending.remove(&version) {
                // only removals are ever held
                match msg.body {
                    RingBody::Leave { node } => {
                        self.apply_removal(node, version, false, effects);
                        effects.push(RingEffect::Forward(msg));
                    }
                    RingBody::Fail { node } => {
                        self.apply_removal(node, version, true, effects);
                        effects.push(RingEffect::Forward(msg));
                    }
                    _ => (),
                }
            }
        }
    }

    /// Whether the local node is the coordinator once `excluding` (and
    /// all current suspects) are disregarded.
    fn is_acting_coordinator(&self, excluding: Option<NodeId>) -> bool {
        self.members
            .values()
            .find(|n| {
                !self.suspects.contains(&n.id) && Some(n.id) != excluding
            })
            .map(|n| n.id == self.local.id)
            .unwrap_or(false)
    }

    fn by_id(&self, id: &NodeId) -> Option<&Arc<NodeInfo>> {
        self.members.values().find(|n| &n.id == id)
    }

    fn ring_nodes(&self) -> Vec<NodeInfo> {
        self.members.values().map(|n| (**n).clone()).collect()
    }

    fn header(
        &mut self,
        verifier: Option<NodeId>,
        topology_version: u64,
    ) -> RingHeader {
        RingHeader {
            id: self.versions.next(),
            sender: self.local.id,
            verifier,
            topology_version,
        }
    }

    fn mark_seen(&mut self, id: VersionedId) {
        if self.seen.insert(id) {
            self.seen_order.push_back(id);
            if self.seen_order.len() > SEEN_CAP {
                if let Some(old) = self.seen_order.pop_front() {
                    self.seen.remove(&old);
                }
            }
        }
    }

    fn publish(&self, effects: &mut Vec<RingEffect>) {
        effects.push(RingEffect::Publish(self.topology()));
    }
}
