//! Typed payloads carried by the consensus envelope.

use crate::ConsensusMessage;
use palisade_types::{Hash, LoadMetrics, ProposalId, SequenceNumber, ViewNumber};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Prepare,
    Promise,
    Accept,
    Commit,
    ViewChange,
    NewView,
    Heartbeat,
}

impl MessageType {
    /// Stable tag used in signing messages.
    pub fn tag(&self) -> u8 {
        match self {
            MessageType::Prepare => 0,
            MessageType::Promise => 1,
            MessageType::Accept => 2,
            MessageType::Commit => 3,
            MessageType::ViewChange => 4,
            MessageType::Heartbeat => 5,
            MessageType::NewView => 6,
        }
    }

    /// Human-readable name, used as a metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Prepare => "prepare",
            MessageType::Promise => "promise",
            MessageType::Accept => "accept",
            MessageType::Commit => "commit",
            MessageType::ViewChange => "view_change",
            MessageType::NewView => "new_view",
            MessageType::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leader's phase-one announcement of a new proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparePayload {
    pub proposal_id: ProposalId,
    pub payload: Vec<u8>,
    pub digest: Hash,
    pub priority: u8,
}

/// A proposal a node has acknowledged in phase two but not yet seen commit.
///
/// Carried in view-change votes so the next leader can finish it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedProposal {
    pub view: ViewNumber,
    pub sequence: SequenceNumber,
    pub digest: Hash,
    pub payload: Vec<u8>,
    pub priority: u8,
}

/// Vote to move the cluster to `new_view`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewChangePayload {
    pub new_view: ViewNumber,
    pub last_committed: SequenceNumber,
    pub highest_accepted: Option<AcceptedProposal>,
}

/// Message body. The variant always matches the envelope's [`MessageType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Phase one request from the leader.
    Prepare(PreparePayload),

    /// Follower's phase one reply.
    Promise { proposal_id: ProposalId, digest: Hash },

    /// Phase two. From the leader it is the accept request; from a follower it
    /// is the accept acknowledgement.
    Accept { proposal_id: ProposalId, digest: Hash },

    /// The accepted value with its certificate: the signed Accept messages
    /// of a quorum of members, the leader's own accept request included.
    Commit {
        proposal_id: ProposalId,
        digest: Hash,
        payload: Vec<u8>,
        priority: u8,
        certificate: Vec<ConsensusMessage>,
    },

    ViewChange(ViewChangePayload),

    /// The signed ViewChange votes that installed the envelope's view.
    NewView { votes: Vec<ConsensusMessage> },

    Heartbeat { load_metrics: LoadMetrics },
}

impl Payload {
    /// The message type this payload belongs to.
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Prepare(_) => MessageType::Prepare,
            Payload::Promise { .. } => MessageType::Promise,
            Payload::Accept { .. } => MessageType::Accept,
            Payload::Commit { .. } => MessageType::Commit,
            Payload::ViewChange(_) => MessageType::ViewChange,
            Payload::NewView { .. } => MessageType::NewView,
            Payload::Heartbeat { .. } => MessageType::Heartbeat,
        }
    }

    /// Content digest of the payload, covered by the envelope signature.
    pub fn digest(&self) -> Hash {
        // Serializing owned data into a Vec does not fail.
        let bytes = bincode::serialize(self).unwrap_or_default();
        Hash::from_bytes(&bytes)
    }
}
