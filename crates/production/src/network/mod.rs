//! Network layer: wire codec, transport seam and the in-memory network.
//!
//! The runner only talks to peers through [`Transport`]; inbound frames are
//! handed to an [`InboundHandler`] exactly once per received frame. Whether a
//! frame was accepted is the acknowledgement the sender sees.

mod codec;
mod memory;

pub use codec::{
    decode_binary, decode_json, encode_binary, encode_json, CodecError, Frame, ReplicaRequest,
    WireFormat, WIRE_VERSION,
};
pub use memory::{MemoryNetwork, MemoryTransport};

use async_trait::async_trait;
use palisade_messages::ConsensusMessage;
use palisade_types::NodeId;

/// Outbound side of the network, as consumed by the runner.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The node this transport sends for.
    fn local_node_id(&self) -> &NodeId;

    /// Deliver an envelope to one peer. Returns whether the peer acknowledged it.
    async fn send(&self, peer: &NodeId, message: &ConsensusMessage) -> bool;

    /// Deliver an envelope to every peer not in `exclude`, concurrently.
    /// Returns the number of acknowledgements.
    async fn broadcast(&self, message: &ConsensusMessage, exclude: &[NodeId]) -> usize;

    /// Deliver replica traffic to one peer.
    async fn send_replica(&self, peer: &NodeId, request: ReplicaRequest) -> bool;
}

/// Inbound side: receives every decoded frame addressed to a node.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Handle one frame. The return value is the acknowledgement.
    async fn on_frame(&self, frame: Frame) -> bool;
}
