//! Cluster topology: ordered membership, quorum arithmetic and leader selection.

use crate::{NodeId, ViewNumber};

/// Quorum sizes for a cluster of `n` members.
///
/// `f = floor((n - 1) / 3)` faulty members are tolerated and `quorum = n - f`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterQuorum {
    /// Number of members.
    pub n: usize,
    /// Tolerated faulty members.
    pub f: usize,
    /// Votes (or vote weight) required to make progress.
    pub quorum: usize,
}

impl ClusterQuorum {
    /// Compute quorum sizes for `n` members.
    pub fn for_size(n: usize) -> Self {
        let f = n.saturating_sub(1) / 3;
        Self {
            n,
            f,
            quorum: n - f,
        }
    }

    /// Check if a vote count reaches quorum.
    pub fn has_quorum(&self, count: usize) -> bool {
        self.n > 0 && count >= self.quorum
    }

    /// Check if an accumulated reputation weight reaches quorum.
    pub fn has_weighted_quorum(&self, weight: f64) -> bool {
        self.n > 0 && weight + 1e-9 >= self.quorum as f64
    }

    /// Votes needed before a node joins a view change it did not start.
    pub fn join_threshold(&self) -> usize {
        self.f + 1
    }
}

/// Source of the cluster's current membership, as seen by consensus.
pub trait Topology: Send + Sync {
    /// The local node's ID.
    fn local_node_id(&self) -> &NodeId;

    /// All member IDs in lexicographic order.
    fn sorted_members(&self) -> Vec<NodeId>;

    // Derived methods

    /// Number of members.
    fn member_count(&self) -> usize {
        self.sorted_members().len()
    }

    /// Quorum sizes for the current membership.
    fn quorum(&self) -> ClusterQuorum {
        ClusterQuorum::for_size(self.member_count())
    }

    /// Leader of a view: `sorted_members[view mod n]`.
    fn leader_for(&self, view: ViewNumber) -> Option<NodeId> {
        let members = self.sorted_members();
        if members.is_empty() {
            return None;
        }
        let index = (view.0 % members.len() as u64) as usize;
        members.into_iter().nth(index)
    }

    /// Check if the local node leads the given view.
    fn is_local_leader(&self, view: ViewNumber) -> bool {
        self.leader_for(view).as_ref() == Some(self.local_node_id())
    }

    /// Check if a node is a member.
    fn is_member(&self, node_id: &NodeId) -> bool {
        self.sorted_members().iter().any(|m| m == node_id)
    }
}

/// A fixed membership list. Useful for tests and static deployments.
#[derive(Debug, Clone)]
pub struct StaticTopology {
    local: NodeId,
    members: Vec<NodeId>,
}

impl StaticTopology {
    /// Create a static topology. Members are sorted and deduplicated.
    pub fn new(local: NodeId, mut members: Vec<NodeId>) -> Self {
        members.sort();
        members.dedup();
        Self { local, members }
    }
}

impl Topology for StaticTopology {
    fn local_node_id(&self) -> &NodeId {
        &self.local
    }

    fn sorted_members(&self) -> Vec<NodeId> {
        self.members.clone()
    }

    fn member_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| NodeId::from(*n)).collect()
    }

    #[test]
    fn test_quorum_arithmetic() {
        assert_eq!(ClusterQuorum::for_size(4), ClusterQuorum { n: 4, f: 1, quorum: 3 });
        assert_eq!(ClusterQuorum::for_size(7), ClusterQuorum { n: 7, f: 2, quorum: 5 });
        assert_eq!(ClusterQuorum::for_size(10), ClusterQuorum { n: 10, f: 3, quorum: 7 });
        assert_eq!(ClusterQuorum::for_size(1), ClusterQuorum { n: 1, f: 0, quorum: 1 });
        assert_eq!(ClusterQuorum::for_size(0).quorum, 0);
    }

    #[test]
    fn test_empty_cluster_never_has_quorum() {
        let q = ClusterQuorum::for_size(0);
        assert!(!q.has_quorum(0));
        assert!(!q.has_weighted_quorum(10.0));
    }

    #[test]
    fn test_weighted_quorum() {
        let q = ClusterQuorum::for_size(4);
        assert!(!q.has_weighted_quorum(2.9));
        assert!(q.has_weighted_quorum(3.0));
        // Floating point sums of reputations.
        assert!(q.has_weighted_quorum(0.1 + 0.9 + 1.0 + 0.9999999999));
    }

    #[test]
    fn test_leader_rotation_is_lexicographic() {
        let topology = StaticTopology::new(NodeId::from("c"), ids(&["c", "a", "d", "b"]));
        assert_eq!(topology.leader_for(ViewNumber(0)), Some(NodeId::from("a")));
        assert_eq!(topology.leader_for(ViewNumber(1)), Some(NodeId::from("b")));
        assert_eq!(topology.leader_for(ViewNumber(2)), Some(NodeId::from("c")));
        assert_eq!(topology.leader_for(ViewNumber(5)), Some(NodeId::from("b")));
        assert!(topology.is_local_leader(ViewNumber(2)));
        assert!(!topology.is_local_leader(ViewNumber(0)));
    }

    #[test]
    fn test_empty_topology_has_no_leader() {
        let topology = StaticTopology::new(NodeId::from("a"), vec![]);
        assert_eq!(topology.leader_for(ViewNumber(0)), None);
    }
}
