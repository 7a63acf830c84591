//! Cluster member records.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Liveness state of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Responding to heartbeats within thresholds.
    Healthy,
    /// Responding, but over a performance threshold.
    Degraded,
    /// Missed heartbeats; recovery may be under way.
    Suspected,
    /// Declared failed. Terminal once recovery is exhausted.
    Failed,
    /// Recovery strategy in progress.
    Recovering,
    /// Administratively offline.
    Offline,
}

impl NodeStatus {
    /// Members in these states receive heartbeats and may hold replicas.
    pub fn is_reachable(&self) -> bool {
        matches!(self, NodeStatus::Healthy | NodeStatus::Degraded)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Healthy => "healthy",
            NodeStatus::Degraded => "degraded",
            NodeStatus::Suspected => "suspected",
            NodeStatus::Failed => "failed",
            NodeStatus::Recovering => "recovering",
            NodeStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Point-in-time resource snapshot reported with heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadMetrics {
    /// CPU usage fraction in [0, 1].
    pub cpu_usage: f64,
    /// Memory usage fraction in [0, 1].
    pub memory_usage: f64,
    /// Average request response time.
    pub avg_response_time: Duration,
}

impl LoadMetrics {
    /// Create a snapshot.
    pub fn new(cpu_usage: f64, memory_usage: f64, avg_response_time: Duration) -> Self {
        Self {
            cpu_usage,
            memory_usage,
            avg_response_time,
        }
    }
}

/// Limits above which a member is considered degraded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceThresholds {
    /// Maximum CPU fraction.
    pub cpu_usage: f64,
    /// Maximum memory fraction.
    pub memory_usage: f64,
    /// Maximum average response time.
    pub avg_response_time: Duration,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            cpu_usage: 0.9,
            memory_usage: 0.9,
            avg_response_time: Duration::from_secs(5),
        }
    }
}

impl PerformanceThresholds {
    /// Check whether a snapshot exceeds any threshold.
    pub fn is_exceeded_by(&self, metrics: &LoadMetrics) -> bool {
        metrics.cpu_usage > self.cpu_usage
            || metrics.memory_usage > self.memory_usage
            || metrics.avg_response_time > self.avg_response_time
    }
}

/// Everything the cluster knows about one member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Member identifier.
    pub node_id: NodeId,
    /// Network address (opaque to consensus).
    pub address: String,
    /// Current liveness state.
    pub status: NodeStatus,
    /// Time of the last successful heartbeat.
    pub last_heartbeat: Duration,
    /// Heartbeat failures since the last success.
    pub consecutive_failures: u32,
    /// Recovery attempts in the current episode.
    pub recovery_attempts: u32,
    /// Trust score in [0.1, 1.0].
    pub reputation: f64,
    /// Latest reported load.
    pub load_metrics: LoadMetrics,
    /// Capabilities announced at registration.
    pub capabilities: BTreeSet<String>,
}

impl NodeRecord {
    /// Create a fresh healthy record.
    pub fn new(
        node_id: NodeId,
        address: impl Into<String>,
        capabilities: impl IntoIterator<Item = String>,
        now: Duration,
    ) -> Self {
        Self {
            node_id,
            address: address.into(),
            status: NodeStatus::Healthy,
            last_heartbeat: now,
            consecutive_failures: 0,
            recovery_attempts: 0,
            reputation: 1.0,
            load_metrics: LoadMetrics::default(),
            capabilities: capabilities.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_healthy_with_full_reputation() {
        let record = NodeRecord::new(
            NodeId::from("a"),
            "10.0.0.1:7000",
            vec!["storage".to_string()],
            Duration::from_secs(1),
        );
        assert_eq!(record.status, NodeStatus::Healthy);
        assert_eq!(record.reputation, 1.0);
        assert_eq!(record.consecutive_failures, 0);
        assert!(record.capabilities.contains("storage"));
    }

    #[test]
    fn test_thresholds() {
        let thresholds = PerformanceThresholds::default();
        let ok = LoadMetrics::new(0.5, 0.5, Duration::from_millis(100));
        assert!(!thresholds.is_exceeded_by(&ok));

        // Exactly at the limit is not over it.
        let edge = LoadMetrics::new(0.9, 0.9, Duration::from_secs(5));
        assert!(!thresholds.is_exceeded_by(&edge));

        assert!(thresholds.is_exceeded_by(&LoadMetrics::new(0.95, 0.1, Duration::ZERO)));
        assert!(thresholds.is_exceeded_by(&LoadMetrics::new(0.1, 0.91, Duration::ZERO)));
        assert!(thresholds.is_exceeded_by(&LoadMetrics::new(0.1, 0.1, Duration::from_secs(6))));
    }

    #[test]
    fn test_reachable_statuses() {
        assert!(NodeStatus::Healthy.is_reachable());
        assert!(NodeStatus::Degraded.is_reachable());
        assert!(!NodeStatus::Suspected.is_reachable());
        assert!(!NodeStatus::Failed.is_reachable());
        assert!(!NodeStatus::Recovering.is_reachable());
        assert!(!NodeStatus::Offline.is_reachable());
    }
}
