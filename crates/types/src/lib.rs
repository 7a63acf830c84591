//! Core types for Palisade membership and consensus.
//!
//! This crate provides the foundational types used throughout the workspace:
//!
//! - **Primitives**: Hash, signing keys, signatures, the key directory
//! - **Identifiers**: NodeId, ViewNumber, SequenceNumber, ProposalId
//! - **Cluster types**: NodeRecord, Proposal, FailureEvent, DataEntry
//! - **Topology**: quorum arithmetic and leader selection
//!
//! It does not depend on any other workspace crate.

mod crypto;
mod hash;
mod identifiers;
mod signing;

mod data;
mod failure;
mod node;
mod proposal;
mod topology;

pub use crypto::{KeyDirectory, KeyError, KeyPair, PublicKey, Signature, SignatureVerifier};
pub use hash::{Hash, HexError};
pub use identifiers::{NodeId, ProposalId, SequenceNumber, ViewNumber};
pub use signing::{consensus_message, DOMAIN_CONSENSUS_MESSAGE};

pub use data::{ConsistencyLevel, DataEntry, Version};
pub use failure::{FailureEvent, FailureEventKind, FailureType, Severity};
pub use node::{LoadMetrics, NodeRecord, NodeStatus, PerformanceThresholds};
pub use proposal::{Proposal, ProposalStatus};
pub use topology::{ClusterQuorum, StaticTopology, Topology};

/// Milliseconds since the Unix epoch for a duration-since-epoch timestamp.
pub fn duration_to_millis(d: std::time::Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Deterministic keypair for a node name.
    pub fn test_keypair(name: &str) -> KeyPair {
        let seed = Hash::from_bytes(name.as_bytes());
        KeyPair::from_seed(seed.as_bytes())
    }

    /// A set of node IDs named `node-0 .. node-{n-1}`.
    pub fn test_node_ids(n: usize) -> Vec<NodeId> {
        (0..n).map(|i| NodeId::new(format!("node-{i}"))).collect()
    }
}
