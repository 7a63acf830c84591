//! Domain-specific identifier types.

use crate::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster member identifier.
///
/// Ordering is lexicographic on the string form; leader selection depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node ID from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the bytes of the string form.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// View number (leader epoch).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ViewNumber(pub u64);

impl ViewNumber {
    /// Initial view.
    pub const INITIAL: Self = ViewNumber(0);

    /// Get the next view, or None at `u64::MAX`.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(ViewNumber)
    }
}

impl fmt::Display for ViewNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "View({})", self.0)
    }
}

/// Position of a proposal in the agreed order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Nothing committed yet.
    pub const GENESIS: Self = SequenceNumber(0);

    /// Get the next sequence number, or None at `u64::MAX`.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(SequenceNumber)
    }

    /// Get the previous sequence number (returns None at genesis).
    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(SequenceNumber(self.0 - 1))
        } else {
            None
        }
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

/// Proposal identifier, derived from its proposer, view, sequence and content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(pub Hash);

impl ProposalId {
    /// Derive the identifier of a proposal.
    pub fn derive(
        proposer: &NodeId,
        view: ViewNumber,
        sequence: SequenceNumber,
        digest: &Hash,
    ) -> Self {
        ProposalId(Hash::from_parts(&[
            b"proposal:",
            proposer.as_bytes(),
            &view.0.to_le_bytes(),
            &sequence.0.to_le_bytes(),
            digest.as_bytes(),
        ]))
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proposal({})", &self.0.to_hex()[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_next_prev() {
        let seq = SequenceNumber(10);
        assert_eq!(seq.next(), Some(SequenceNumber(11)));
        assert_eq!(seq.prev(), Some(SequenceNumber(9)));

        assert_eq!(SequenceNumber::GENESIS.prev(), None);
        assert_eq!(SequenceNumber::GENESIS.next(), Some(SequenceNumber(1)));
    }

    #[test]
    fn test_next_stops_at_max() {
        assert_eq!(SequenceNumber(u64::MAX).next(), None);
        assert_eq!(ViewNumber(u64::MAX).next(), None);
        assert_eq!(ViewNumber(4).next(), Some(ViewNumber(5)));
    }

    #[test]
    fn test_node_id_ordering_is_lexicographic() {
        let mut ids = vec![NodeId::from("node-b"), NodeId::from("node-10"), NodeId::from("node-a")];
        ids.sort();
        assert_eq!(
            ids,
            vec![NodeId::from("node-10"), NodeId::from("node-a"), NodeId::from("node-b")]
        );
    }

    #[test]
    fn test_proposal_id_depends_on_every_field() {
        let proposer = NodeId::from("a");
        let digest = Hash::from_bytes(b"payload");
        let base = ProposalId::derive(&proposer, ViewNumber(0), SequenceNumber(1), &digest);

        assert_eq!(
            base,
            ProposalId::derive(&proposer, ViewNumber(0), SequenceNumber(1), &digest)
        );
        assert_ne!(
            base,
            ProposalId::derive(&proposer, ViewNumber(1), SequenceNumber(1), &digest)
        );
        assert_ne!(
            base,
            ProposalId::derive(&proposer, ViewNumber(0), SequenceNumber(2), &digest)
        );
        assert_ne!(
            base,
            ProposalId::derive(&NodeId::from("b"), ViewNumber(0), SequenceNumber(1), &digest)
        );
    }

    #[test]
    fn test_node_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&NodeId::from("node-1")).unwrap();
        assert_eq!(json, "\"node-1\"");
    }
}
