//! Read-only views of a running node.

use palisade_membership::{FailureLog, MembershipTable};
use palisade_reputation::ReputationTracker;
use palisade_types::{
    FailureEvent, NodeId, NodeRecord, NodeStatus, SequenceNumber, ViewNumber,
};
use serde::Serialize;
use std::time::Duration;

/// Consensus position, published by the consensus task after every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsensusStatus {
    pub view: ViewNumber,
    pub leader: Option<NodeId>,
    pub view_change_pending: bool,
    pub committed_count: usize,
    pub last_committed: SequenceNumber,
    pub in_flight: Option<SequenceNumber>,
}

/// Result of `ClusterNode::status()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatusSnapshot {
    pub node_id: NodeId,
    pub current_view: ViewNumber,
    pub leader_id: Option<NodeId>,
    pub view_change_pending: bool,
    pub committed_count: usize,
    pub last_committed: SequenceNumber,
    /// Membership table as seen by this node, ordered by ID.
    pub node_table: Vec<NodeRecord>,
}

impl NodeStatusSnapshot {
    pub fn record(&self, node: &NodeId) -> Option<&NodeRecord> {
        self.node_table.iter().find(|r| &r.node_id == node)
    }
}

/// Health of one member, for the monitoring collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberHealth {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub reputation: f64,
    pub byzantine: bool,
    pub consecutive_failures: u32,
    pub active_failures: usize,
}

/// Periodic read-only snapshot for dashboards and alerting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringSnapshot {
    pub node_id: NodeId,
    pub taken_at: Duration,
    pub members: Vec<MemberHealth>,
    pub active_recoveries: usize,
    /// Critical events, such as exhausted recoveries, oldest first.
    pub critical_alerts: Vec<FailureEvent>,
}

impl MonitoringSnapshot {
    pub(crate) fn collect(
        node_id: NodeId,
        taken_at: Duration,
        membership: &MembershipTable,
        reputation: &ReputationTracker,
        log: &FailureLog,
        active_recoveries: usize,
    ) -> Self {
        let mut records = membership.snapshot();
        records.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        let members = records
            .into_iter()
            .map(|r| MemberHealth {
                reputation: reputation.reputation(&r.node_id),
                byzantine: reputation.is_byzantine(&r.node_id),
                active_failures: log.active_failures(&r.node_id),
                consecutive_failures: r.consecutive_failures,
                status: r.status,
                node_id: r.node_id,
            })
            .collect();
        Self {
            node_id,
            taken_at,
            members,
            active_recoveries,
            critical_alerts: log.critical_events(),
        }
    }

    pub fn member(&self, node: &NodeId) -> Option<&MemberHealth> {
        self.members.iter().find(|m| &m.node_id == node)
    }
}
