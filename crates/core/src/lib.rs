//! Core types for Palisade consensus.
//!
//! - [`Event`]: All possible inputs to the consensus state machine
//! - [`Action`]: All possible outputs from it
//! - [`StateMachine`]: The trait the consensus engine implements
//! - [`Clock`]: Time source shared by the async components
//!
//! ```text
//! Events → StateMachine::handle() → Actions
//! ```
//!
//! The runner delivers events, executes the returned actions and turns
//! network input and timer expiry back into events.

mod action;
mod clock;
mod error;
mod event;
mod request;
mod traits;

pub use action::Action;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ConsensusError;
pub use event::{Event, EventPriority};
pub use request::RequestId;
pub use traits::StateMachine;

use palisade_types::{SequenceNumber, ViewNumber};

/// Timer identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Promise/accept deadline for the proposal at this sequence.
    Phase(SequenceNumber),
    /// Deadline for installing the given view.
    ViewChange(ViewNumber),
}
