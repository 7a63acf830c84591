//! The membership table: every known member and its liveness state.

use dashmap::DashMap;
use palisade_types::{LoadMetrics, NodeId, NodeRecord, NodeStatus, Topology};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors from membership changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipError {
    #[error("member {0} already registered")]
    AlreadyRegistered(NodeId),

    #[error("unknown member {0}")]
    UnknownMember(NodeId),
}

/// Known cluster members, sharded per member.
///
/// Records are created by [`register_member`](Self::register_member) and
/// removed only by [`remove_member`](Self::remove_member).
#[derive(Debug)]
pub struct MembershipTable {
    local: NodeId,
    members: DashMap<NodeId, NodeRecord>,
}

impl MembershipTable {
    /// Create a table owned by `local`. The local node is not registered
    /// implicitly.
    pub fn new(local: NodeId) -> Self {
        Self {
            local,
            members: DashMap::new(),
        }
    }

    /// Add a Healthy member with full reputation.
    pub fn register_member(
        &self,
        node_id: NodeId,
        address: impl Into<String>,
        capabilities: impl IntoIterator<Item = String>,
        now: Duration,
    ) -> Result<(), MembershipError> {
        use dashmap::mapref::entry::Entry;
        match self.members.entry(node_id.clone()) {
            Entry::Occupied(_) => Err(MembershipError::AlreadyRegistered(node_id)),
            Entry::Vacant(slot) => {
                let record = NodeRecord::new(node_id.clone(), address, capabilities, now);
                info!(node = %node_id, address = %record.address, "member registered");
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Administrative leave. Returns the removed record.
    pub fn remove_member(&self, node_id: &NodeId) -> Result<NodeRecord, MembershipError> {
        let (_, record) = self
            .members
            .remove(node_id)
            .ok_or_else(|| MembershipError::UnknownMember(node_id.clone()))?;
        info!(node = %node_id, "member left");
        Ok(record)
    }

    pub fn get(&self, node_id: &NodeId) -> Option<NodeRecord> {
        self.members.get(node_id).map(|r| r.clone())
    }

    pub fn status(&self, node_id: &NodeId) -> Option<NodeStatus> {
        self.members.get(node_id).map(|r| r.status)
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.members.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// All records, ordered by member ID.
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        let mut records: Vec<NodeRecord> = self.members.iter().map(|r| r.clone()).collect();
        records.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        records
    }

    /// Remote members currently Healthy or Degraded, ordered by ID.
    pub fn reachable_peers(&self) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = self
            .members
            .iter()
            .filter(|r| r.node_id != self.local && r.status.is_reachable())
            .map(|r| r.node_id.clone())
            .collect();
        peers.sort();
        peers
    }

    /// Apply a change to one record. Returns None for unknown members.
    pub fn update<R>(&self, node_id: &NodeId, f: impl FnOnce(&mut NodeRecord) -> R) -> Option<R> {
        self.members.get_mut(node_id).map(|mut r| f(&mut r))
    }

    /// Set a member's status, returning the previous one.
    pub fn set_status(&self, node_id: &NodeId, status: NodeStatus) -> Option<NodeStatus> {
        self.update(node_id, |r| std::mem::replace(&mut r.status, status))
    }

    /// Mirror a reputation score computed by the reputation tracker.
    pub fn set_reputation(&self, node_id: &NodeId, reputation: f64) {
        self.update(node_id, |r| r.reputation = reputation);
    }

    /// Store a load report and treat it as proof of life.
    pub fn record_load(&self, node_id: &NodeId, metrics: LoadMetrics, now: Duration) -> bool {
        self.update(node_id, |r| {
            r.load_metrics = metrics;
            r.last_heartbeat = r.last_heartbeat.max(now);
        })
        .is_some()
    }
}

impl Topology for MembershipTable {
    fn local_node_id(&self) -> &NodeId {
        &self.local
    }

    fn sorted_members(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.members.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    fn member_count(&self) -> usize {
        self.members.len()
    }

    fn is_member(&self, node_id: &NodeId) -> bool {
        self.members.contains_key(node_id)
    }
}
