//! Network messages for the consensus protocol.
//!
//! Every message travels in a [`ConsensusMessage`] envelope whose signature
//! covers the type, sender, view, sequence, payload digest and timestamp.

mod envelope;
mod payload;

pub use envelope::ConsensusMessage;
pub use payload::{AcceptedProposal, MessageType, Payload, PreparePayload, ViewChangePayload};
