//! Cluster membership and heartbeat failure detection.
//!
//! - [`MembershipTable`]: known members and their liveness state
//! - [`FailureDetector`]: turns heartbeat outcomes, silence and load reports
//!   into status transitions and [`MembershipSignal`]s
//! - [`FailureLog`]: append-only per-member failure history
//!
//! The heartbeat sender and timeout monitor loops live in the runner; this
//! crate holds the synchronous decision logic they drive.

mod detector;
mod log;
mod table;

pub use detector::{DetectorConfig, FailureDetector, MembershipSignal};
pub use log::FailureLog;
pub use table::{MembershipError, MembershipTable};
