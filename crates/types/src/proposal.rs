//! Proposals: the unit of agreement.

use crate::{Hash, NodeId, ProposalId, SequenceNumber, ViewNumber};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle of a proposal.
///
/// `Pending → Preparing → Promised → Accepted → Committed`, or `Aborted` from
/// any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalStatus {
    Pending,
    Preparing,
    Promised,
    Accepted,
    Committed,
    Aborted,
}

impl ProposalStatus {
    /// Committed and Aborted proposals never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalStatus::Committed | ProposalStatus::Aborted)
    }
}

/// A proposed operation and its voting state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: ProposalId,
    pub proposer_id: NodeId,
    pub view_number: ViewNumber,
    pub sequence_number: SequenceNumber,
    pub payload: Vec<u8>,
    pub digest: Hash,
    pub status: ProposalStatus,
    /// Per-voter outcome: true for a positive vote.
    pub votes: BTreeMap<NodeId, bool>,
    pub priority: u8,
}

impl Proposal {
    /// Create a pending proposal. The digest and ID are derived from the payload.
    pub fn new(
        proposer_id: NodeId,
        view_number: ViewNumber,
        sequence_number: SequenceNumber,
        payload: Vec<u8>,
        priority: u8,
    ) -> Self {
        let digest = Hash::from_bytes(&payload);
        let proposal_id = ProposalId::derive(&proposer_id, view_number, sequence_number, &digest);
        Self {
            proposal_id,
            proposer_id,
            view_number,
            sequence_number,
            payload,
            digest,
            status: ProposalStatus::Pending,
            votes: BTreeMap::new(),
            priority,
        }
    }

    /// Record a vote. A voter's first vote stands; later votes are ignored.
    ///
    /// Returns true if the vote was new.
    pub fn record_vote(&mut self, voter: NodeId, positive: bool) -> bool {
        if self.votes.contains_key(&voter) {
            return false;
        }
        self.votes.insert(voter, positive);
        true
    }

    /// Voters that cast a positive vote.
    pub fn positive_voters(&self) -> impl Iterator<Item = &NodeId> {
        self.votes
            .iter()
            .filter_map(|(voter, positive)| positive.then_some(voter))
    }

    /// Number of positive votes.
    pub fn positive_count(&self) -> usize {
        self.positive_voters().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_proposal_derives_digest_and_id() {
        let p = Proposal::new(NodeId::from("a"), ViewNumber(0), SequenceNumber(1), b"op".to_vec(), 5);
        assert_eq!(p.digest, Hash::from_bytes(b"op"));
        assert_eq!(
            p.proposal_id,
            ProposalId::derive(&NodeId::from("a"), ViewNumber(0), SequenceNumber(1), &p.digest)
        );
        assert_eq!(p.status, ProposalStatus::Pending);
    }

    #[test]
    fn test_first_vote_stands() {
        let mut p = Proposal::new(NodeId::from("a"), ViewNumber(0), SequenceNumber(1), vec![], 0);
        assert!(p.record_vote(NodeId::from("b"), true));
        assert!(!p.record_vote(NodeId::from("b"), false));
        assert!(p.record_vote(NodeId::from("c"), false));
        assert_eq!(p.positive_count(), 1);
        assert_eq!(p.positive_voters().collect::<Vec<_>>(), vec![&NodeId::from("b")]);
    }
}
