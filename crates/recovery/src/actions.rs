//! Remediation hooks used by recovery strategies.

use async_trait::async_trait;
use palisade_types::{FailureEvent, NodeId};

/// Operations the recovery manager asks the environment to perform.
///
/// Each returns whether the operation succeeded.
#[async_trait]
pub trait RecoveryActions: Send + Sync {
    /// Connectivity ping.
    async fn ping(&self, node: &NodeId) -> bool;

    /// Bring a restarted member's data back in line with the cluster.
    async fn resync_data(&self, node: &NodeId) -> bool;

    /// Ask orchestration to restart the member.
    async fn restart_node(&self, node: &NodeId) -> bool;

    /// Move work away from the member.
    async fn redistribute_load(&self, node: &NodeId) -> bool;

    /// Ask the member to release memory, caches or handles.
    async fn free_resources(&self, node: &NodeId) -> bool;

    /// Reconcile data versions written on both sides of a partition.
    async fn resolve_conflicts(&self, node: &NodeId) -> bool;

    /// Raise a critical alert for the monitoring collaborator.
    async fn alert(&self, _event: &FailureEvent) {}
}
