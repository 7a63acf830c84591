//! Node recovery.
//!
//! Once the failure detector flags a member, the [`RecoveryManager`] runs a
//! strategy chosen by failure type, up to `max_attempts` times per episode:
//!
//! ```text
//! Healthy ──(failure)──▶ Recovering ──▶ Healthy
//!                            │
//!                            └──(attempts exhausted)──▶ Failed (terminal)
//! ```
//!
//! The actual remediation (probing, resync, restart, load moves) is done by
//! a [`RecoveryActions`] collaborator so the manager can be tested on
//! virtual time.

mod actions;
mod config;
mod manager;

pub use actions::RecoveryActions;
pub use config::RecoveryConfig;
pub use manager::{RecoveryManager, RecoveryOutcome};
