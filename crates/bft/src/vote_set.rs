//! Vote tallies for one proposal phase.

use indexmap::IndexMap;
use palisade_types::NodeId;

/// Collects one vote per voter with its weight, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct VoteSet {
    votes: IndexMap<NodeId, f64>,
    total_weight: f64,
}

impl VoteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vote. Returns false if the voter already voted.
    pub fn add(&mut self, voter: NodeId, weight: f64) -> bool {
        if self.votes.contains_key(&voter) {
            return false;
        }
        self.votes.insert(voter, weight);
        self.total_weight += weight;
        true
    }

    pub fn contains(&self, voter: &NodeId) -> bool {
        self.votes.contains_key(voter)
    }

    pub fn count(&self) -> usize {
        self.votes.len()
    }

    pub fn weight(&self) -> f64 {
        self.total_weight
    }

    /// Voters in arrival order.
    pub fn voters(&self) -> impl Iterator<Item = &NodeId> {
        self.votes.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_votes_ignored() {
        let mut set = VoteSet::new();
        assert!(set.add(NodeId::from("a"), 1.0));
        assert!(set.add(NodeId::from("b"), 0.5));
        assert!(!set.add(NodeId::from("a"), 1.0));
        assert_eq!(set.count(), 2);
        assert!((set.weight() - 1.5).abs() < 1e-9);
        assert_eq!(
            set.voters().cloned().collect::<Vec<_>>(),
            vec![NodeId::from("a"), NodeId::from("b")]
        );
    }
}
