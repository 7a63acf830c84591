//! Data replication.
//!
//! Every `store()` writes a new version of a key to a fresh set of `R`
//! replicas chosen from reachable members. Critical data goes to the most
//! reputable members; everything else is spread at random. A write
//! succeeds once the consistency level's acknowledgement count is met.
//!
//! Replicas resolve concurrent versions of a key by last-write-wins on
//! [`Version`](palisade_types::Version).

mod config;
mod manager;
mod store;

pub use config::ReplicationConfig;
pub use manager::{ReplicaTransport, ReplicationManager};
pub use store::{ApplyOutcome, ReplicaStore};
