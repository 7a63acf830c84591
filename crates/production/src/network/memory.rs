//! In-process network for multi-node tests and the demo binary.
//!
//! Every frame is encoded with the configured [`WireFormat`] and decoded again
//! on delivery, so the codec sits on the same path it would with sockets.
//! Nodes can be taken down and the network split into partitions.

use super::{Frame, InboundHandler, ReplicaRequest, Transport, WireFormat};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures::stream::{FuturesUnordered, StreamExt};
use palisade_messages::ConsensusMessage;
use palisade_types::NodeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Routes frames between registered in-process endpoints.
pub struct MemoryNetwork {
    format: WireFormat,
    endpoints: DashMap<NodeId, Arc<dyn InboundHandler>>,
    down: DashSet<NodeId>,
    /// Partition group per node; nodes without an entry are in group 0.
    groups: DashMap<NodeId, u32>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("format", &self.format)
            .field("endpoints", &self.endpoints.len())
            .field("down", &self.down.len())
            .finish()
    }
}

impl MemoryNetwork {
    pub fn new(format: WireFormat) -> Arc<Self> {
        Arc::new(Self {
            format,
            endpoints: DashMap::new(),
            down: DashSet::new(),
            groups: DashMap::new(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Attach a node's inbound handler. Replaces any earlier registration.
    pub fn register(&self, node: NodeId, handler: Arc<dyn InboundHandler>) {
        self.endpoints.insert(node, handler);
    }

    /// A transport that sends on behalf of `local`.
    pub fn transport_for(self: &Arc<Self>, local: NodeId) -> MemoryTransport {
        MemoryTransport {
            local,
            network: Arc::clone(self),
        }
    }

    /// Take a node off the network (`true`) or bring it back (`false`).
    /// A down node neither sends nor receives.
    pub fn set_down(&self, node: &NodeId, down: bool) {
        if down {
            self.down.insert(node.clone());
        } else {
            self.down.remove(node);
        }
    }

    pub fn is_down(&self, node: &NodeId) -> bool {
        self.down.contains(node)
    }

    /// Split the network: nodes in `groups[i]` can only reach each other.
    /// Nodes not listed stay in the default group.
    pub fn partition(&self, groups: &[&[NodeId]]) {
        self.groups.clear();
        for (index, group) in groups.iter().enumerate() {
            for node in group.iter() {
                self.groups.insert(node.clone(), index as u32 + 1);
            }
        }
    }

    /// Remove every partition.
    pub fn heal(&self) {
        self.groups.clear();
    }

    /// Frames handed to a handler so far.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames dropped by down nodes, partitions or codec failures.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn group_of(&self, node: &NodeId) -> u32 {
        self.groups.get(node).map(|g| *g).unwrap_or(0)
    }

    fn can_reach(&self, from: &NodeId, to: &NodeId) -> bool {
        !self.down.contains(from)
            && !self.down.contains(to)
            && self.group_of(from) == self.group_of(to)
    }

    fn peers_of(&self, local: &NodeId) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = self
            .endpoints
            .iter()
            .map(|e| e.key().clone())
            .filter(|id| id != local)
            .collect();
        peers.sort();
        peers
    }

    async fn deliver(&self, from: &NodeId, to: &NodeId, frame: &Frame) -> bool {
        if !self.can_reach(from, to) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(from = %from, to = %to, frame = frame.type_name(), "Frame dropped");
            return false;
        }
        let Some(handler) = self.endpoints.get(to).map(|h| Arc::clone(h.value())) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let decoded = match self
            .format
            .encode(frame)
            .and_then(|bytes| self.format.decode::<Frame>(&bytes))
        {
            Ok(decoded) => decoded,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(from = %from, to = %to, error = %e, "Frame failed to cross the wire");
                return false;
            }
        };

        self.delivered.fetch_add(1, Ordering::Relaxed);
        handler.on_frame(decoded).await
    }
}

/// One node's view of a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    local: NodeId,
    network: Arc<MemoryNetwork>,
}

impl MemoryTransport {
    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.network
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_node_id(&self) -> &NodeId {
        &self.local
    }

    async fn send(&self, peer: &NodeId, message: &ConsensusMessage) -> bool {
        let frame = Frame::Consensus(message.clone());
        self.network.deliver(&self.local, peer, &frame).await
    }

    async fn broadcast(&self, message: &ConsensusMessage, exclude: &[NodeId]) -> usize {
        let frame = Frame::Consensus(message.clone());
        let peers: Vec<NodeId> = self
            .network
            .peers_of(&self.local)
            .into_iter()
            .filter(|p| !exclude.contains(p))
            .collect();

        let frame = &frame;
        let mut deliveries: FuturesUnordered<_> = peers
            .iter()
            .map(|peer| self.network.deliver(&self.local, peer, frame))
            .collect();

        let mut acks = 0;
        while let Some(acked) = deliveries.next().await {
            if acked {
                acks += 1;
            }
        }
        acks
    }

    async fn send_replica(&self, peer: &NodeId, request: ReplicaRequest) -> bool {
        let frame = Frame::Replica {
            from: self.local.clone(),
            request,
        };
        self.network.deliver(&self.local, peer, &frame).await
    }
}
