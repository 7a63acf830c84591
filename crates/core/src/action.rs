//! Action types for the deterministic state machine.

use crate::{ConsensusError, RequestId, TimerId};
use palisade_messages::ConsensusMessage;
use palisade_types::{NodeId, Proposal, ProposalId, ViewNumber};
use std::time::Duration;

/// Actions the state machine wants to perform.
///
/// Actions are **commands** - they describe something to do.
/// The runner executes actions and may convert results back into events.
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Send a message to every other member.
    Broadcast { message: ConsensusMessage },

    /// Send a message to one member.
    SendTo {
        peer: NodeId,
        message: ConsensusMessage,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Set a timer to fire after a duration. Replaces any timer with the same id.
    SetTimer { id: TimerId, duration: Duration },

    /// Cancel a previously set timer.
    CancelTimer { id: TimerId },

    // ═══════════════════════════════════════════════════════════════════════
    // Notifications
    // ═══════════════════════════════════════════════════════════════════════
    /// A proposal committed and was appended to the local log.
    EmitCommitted { proposal: Proposal },

    /// Report the outcome of a `propose()` call back to its caller.
    EmitProposalResult {
        request_id: RequestId,
        result: Result<ProposalId, ConsensusError>,
    },

    /// A new view was installed.
    EmitViewChanged {
        view: ViewNumber,
        leader: Option<NodeId>,
    },
}

impl Action {
    /// Get a human-readable name for this action type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Broadcast { .. } => "Broadcast",
            Action::SendTo { .. } => "SendTo",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::EmitCommitted { .. } => "EmitCommitted",
            Action::EmitProposalResult { .. } => "EmitProposalResult",
            Action::EmitViewChanged { .. } => "EmitViewChanged",
        }
    }

    /// Check if this action sends a network message.
    pub fn is_network(&self) -> bool {
        matches!(self, Action::Broadcast { .. } | Action::SendTo { .. })
    }
}
