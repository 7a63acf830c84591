//! Network-backed implementations of the recovery and replication seams.

use crate::heartbeat::Pulse;
use crate::network::{ReplicaRequest, Transport};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use palisade_recovery::RecoveryActions;
use palisade_replication::{ReplicaTransport, ReplicationManager};
use palisade_types::{DataEntry, FailureEvent, NodeId, Version};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Sends replica writes and releases as replica frames.
pub struct NetworkReplicaTransport {
    transport: Arc<dyn Transport>,
}

impl NetworkReplicaTransport {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ReplicaTransport for NetworkReplicaTransport {
    async fn replicate(&self, peer: &NodeId, entry: &DataEntry) -> bool {
        self.transport
            .send_replica(peer, ReplicaRequest::Store(entry.clone()))
            .await
    }

    async fn release(&self, peer: &NodeId, key: &str, version: &Version) -> bool {
        self.transport
            .send_replica(
                peer,
                ReplicaRequest::Release {
                    key: key.to_string(),
                    version: version.clone(),
                },
            )
            .await
    }
}

/// Recovery remediation over the cluster transport.
///
/// Pings are signed heartbeats. Data resync and conflict resolution push
/// this node's copies of the entries the member should hold; the member keeps
/// the newer version of each. Restarting a process needs an orchestrator,
/// which an in-process cluster does not have.
pub struct NetworkRecoveryActions {
    transport: Arc<dyn Transport>,
    pulse: Arc<Pulse>,
    replication: Arc<ReplicationManager>,
}

impl NetworkRecoveryActions {
    pub fn new(
        transport: Arc<dyn Transport>,
        pulse: Arc<Pulse>,
        replication: Arc<ReplicationManager>,
    ) -> Self {
        Self {
            transport,
            pulse,
            replication,
        }
    }

    /// Entries `node` is listed as a replica of.
    fn entries_for(&self, node: &NodeId) -> Vec<DataEntry> {
        self.replication
            .replica_store()
            .entries()
            .into_iter()
            .filter(|e| e.replica_locations.contains(node))
            .collect()
    }

    /// Push entries to `node`. True when every push was acknowledged.
    async fn push_entries(&self, node: &NodeId) -> bool {
        let entries = self.entries_for(node);
        if entries.is_empty() {
            return true;
        }
        let total = entries.len();
        let mut pushes: FuturesUnordered<_> = entries
            .into_iter()
            .map(|entry| {
                self.transport
                    .send_replica(node, ReplicaRequest::Store(entry))
            })
            .collect();

        let mut acked = 0;
        while let Some(ok) = pushes.next().await {
            if ok {
                acked += 1;
            }
        }
        debug!(node = %node, acked, total, "Pushed replica entries");
        acked == total
    }
}

#[async_trait]
impl RecoveryActions for NetworkRecoveryActions {
    async fn ping(&self, node: &NodeId) -> bool {
        self.transport.send(node, &self.pulse.heartbeat()).await
    }

    async fn resync_data(&self, node: &NodeId) -> bool {
        self.push_entries(node).await
    }

    async fn restart_node(&self, node: &NodeId) -> bool {
        warn!(node = %node, "No orchestrator available to restart member");
        false
    }

    async fn redistribute_load(&self, node: &NodeId) -> bool {
        // Placement only picks reachable members, so new writes already
        // avoid the member while it is not Healthy or Degraded.
        info!(node = %node, "Load redistribution requested");
        true
    }

    async fn free_resources(&self, node: &NodeId) -> bool {
        info!(node = %node, "Resource release requested");
        true
    }

    async fn resolve_conflicts(&self, node: &NodeId) -> bool {
        self.push_entries(node).await
    }

    async fn alert(&self, event: &FailureEvent) {
        error!(
            node = %event.node_id,
            failure_type = %event.failure_type,
            attempts = event.recovery_attempt_index,
            detail = %event.detail,
            "CRITICAL: member permanently failed"
        );
    }
}
