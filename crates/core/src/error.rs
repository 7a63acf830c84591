//! Errors surfaced to `propose()` callers.

use palisade_types::{NodeId, SequenceNumber, ViewNumber};
use thiserror::Error;

/// Why a proposal did not commit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    /// Only the current leader may propose.
    #[error("not the leader for {view} (leader is {leader:?})")]
    NotLeader {
        view: ViewNumber,
        leader: Option<NodeId>,
    },

    /// Another proposal is still in flight.
    #[error("proposal {in_flight} still in flight")]
    Busy { in_flight: SequenceNumber },

    /// The membership table is empty.
    #[error("no cluster members")]
    NoMembers,

    /// A phase did not reach quorum before its deadline.
    #[error("{phase} phase timed out for {sequence}")]
    Timeout {
        phase: &'static str,
        sequence: SequenceNumber,
    },

    /// A higher view was adopted while the proposal was in flight.
    #[error("aborted by view change to {new_view}")]
    ViewChanged { new_view: ViewNumber },

    /// The sequence space is used up.
    #[error("no sequence numbers left after {last}")]
    SequenceExhausted { last: SequenceNumber },

    /// The node is shutting down.
    #[error("node shutting down")]
    Shutdown,
}
