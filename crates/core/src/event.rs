//! Event types for the deterministic state machine.

use crate::RequestId;
use palisade_messages::ConsensusMessage;
use palisade_types::{NodeId, SequenceNumber, ViewNumber};

/// Priority levels for events delivered at the same instant.
///
/// Lower values are processed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Timer events: scheduled by the node itself.
    Timer = 0,

    /// Membership signals from the failure detector.
    Membership = 1,

    /// Network events: envelopes from other nodes.
    Network = 2,

    /// Client events: proposals from the application.
    Client = 3,
}

/// All possible events the consensus state machine can receive.
///
/// Events are **passive data** - they describe something that happened.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Timers (priority: Timer)
    // ═══════════════════════════════════════════════════════════════════════
    /// The promise or accept phase of a proposal ran out of time.
    PhaseTimeout { sequence: SequenceNumber },

    /// A view change did not install in time; escalate to the next view.
    ViewChangeTimeout { view: ViewNumber },

    // ═══════════════════════════════════════════════════════════════════════
    // Membership (priority: Membership)
    // ═══════════════════════════════════════════════════════════════════════
    /// The current leader missed heartbeats or was declared failed.
    LeaderSuspected { leader: NodeId },

    // ═══════════════════════════════════════════════════════════════════════
    // Network (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// An envelope arrived from a peer. Signature not yet checked.
    MessageReceived { message: ConsensusMessage },

    // ═══════════════════════════════════════════════════════════════════════
    // Client (priority: Client)
    // ═══════════════════════════════════════════════════════════════════════
    /// The application asked this node to propose an operation.
    ProposalRequested {
        payload: Vec<u8>,
        priority: u8,
        request_id: RequestId,
    },
}

impl Event {
    /// Get the priority of this event.
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::PhaseTimeout { .. } | Event::ViewChangeTimeout { .. } => EventPriority::Timer,
            Event::LeaderSuspected { .. } => EventPriority::Membership,
            Event::MessageReceived { .. } => EventPriority::Network,
            Event::ProposalRequested { .. } => EventPriority::Client,
        }
    }

    /// Get a human-readable name for this event type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::PhaseTimeout { .. } => "PhaseTimeout",
            Event::ViewChangeTimeout { .. } => "ViewChangeTimeout",
            Event::LeaderSuspected { .. } => "LeaderSuspected",
            Event::MessageReceived { .. } => "MessageReceived",
            Event::ProposalRequested { .. } => "ProposalRequested",
        }
    }
}
