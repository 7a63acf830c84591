//! PBFT consensus state machine.
//!
//! This crate provides a synchronous consensus implementation driven by a
//! runner. Rounds run in four phases:
//!
//! - `Event::ProposalRequested` → leader assigns the next sequence, broadcasts Prepare
//! - Prepare → followers check leader, digest and history, reply with Promise
//! - Promise quorum → leader broadcasts Accept, followers acknowledge
//! - Weighted accept quorum → leader broadcasts Commit, every node appends to its log
//!
//! `Event::PhaseTimeout` and `Event::LeaderSuspected` trigger a view change.
//! All I/O is performed by the runner via returned `Action`s.

mod committed;
mod config;
mod state;
mod view_change;
mod vote_set;

pub use committed::{AppendOutcome, CommitConflict, CommittedLog};
pub use config::BftConfig;
pub use state::{BftStats, PbftState};
pub use view_change::{InstalledView, ViewChangeProgress, ViewChangeState};
pub use vote_set::VoteSet;
