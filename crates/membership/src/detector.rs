//! Heartbeat-driven failure detection.
//!
//! The detector is synchronous: the runner feeds it heartbeat outcomes and
//! periodic ticks, and routes the returned [`MembershipSignal`]s to the
//! recovery manager and the consensus engine.

use crate::{FailureLog, MembershipTable};
use dashmap::DashMap;
use palisade_types::{
    FailureEvent, FailureEventKind, FailureType, LoadMetrics, NodeId, NodeStatus,
    PerformanceThresholds, Severity, Topology,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Memory usage above which degradation is classed as resource exhaustion.
const RESOURCE_EXHAUSTION_MEMORY: f64 = 0.95;

/// Failure detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Interval between heartbeat rounds.
    pub heartbeat_interval: Duration,

    /// Interval between timeout sweeps.
    pub monitor_interval: Duration,

    /// Consecutive failed heartbeats before a member is suspected.
    pub failure_threshold: u32,

    /// Silence longer than this many heartbeat intervals forces Suspected.
    pub timeout_intervals: u32,

    /// Leader silence longer than this many heartbeat intervals triggers a view change.
    pub leader_timeout_intervals: u32,

    /// Share of peers timing out in one sweep that is read as a partition.
    pub partition_fraction: f64,

    pub thresholds: PerformanceThresholds,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            monitor_interval: Duration::from_millis(2500),
            failure_threshold: 3,
            timeout_intervals: 3,
            leader_timeout_intervals: 2,
            partition_fraction: 0.5,
            thresholds: PerformanceThresholds::default(),
        }
    }
}

impl DetectorConfig {
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_thresholds(mut self, thresholds: PerformanceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Silence after which a member is forced to Suspected.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * self.timeout_intervals
    }

    /// Silence after which the leader is considered gone.
    pub fn leader_timeout(&self) -> Duration {
        self.heartbeat_interval * self.leader_timeout_intervals
    }
}

/// A threshold-crossing transition, for the recovery manager and consensus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipSignal {
    /// Moved to Suspected; recovery should start.
    Suspected {
        node: NodeId,
        failure_type: FailureType,
    },
    /// Moved to Degraded; recovery should start.
    Degraded {
        node: NodeId,
        failure_type: FailureType,
    },
    /// Moved to Failed.
    Failed { node: NodeId },
    /// Returned to Healthy.
    Recovered { node: NodeId },
}

impl MembershipSignal {
    pub fn node(&self) -> &NodeId {
        match self {
            MembershipSignal::Suspected { node, .. }
            | MembershipSignal::Degraded { node, .. }
            | MembershipSignal::Failed { node }
            | MembershipSignal::Recovered { node } => node,
        }
    }

    /// The failure type recovery should address, if any.
    pub fn failure_type(&self) -> Option<FailureType> {
        match self {
            MembershipSignal::Suspected { failure_type, .. }
            | MembershipSignal::Degraded { failure_type, .. } => Some(*failure_type),
            _ => None,
        }
    }
}

/// Drives member status from heartbeat outcomes, silence and load reports.
#[derive(Debug)]
pub struct FailureDetector {
    config: DetectorConfig,
    table: Arc<MembershipTable>,
    log: Arc<FailureLog>,
    /// Extra silence tolerated per member, granted by Timeout recovery.
    extensions: DashMap<NodeId, Duration>,
}

impl FailureDetector {
    pub fn new(config: DetectorConfig, table: Arc<MembershipTable>, log: Arc<FailureLog>) -> Self {
        Self {
            config,
            table,
            log,
            extensions: DashMap::new(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<MembershipTable> {
        &self.table
    }

    pub fn log(&self) -> &Arc<FailureLog> {
        &self.log
    }

    /// Members that should receive the next heartbeat.
    pub fn heartbeat_targets(&self) -> Vec<NodeId> {
        self.table.reachable_peers()
    }

    /// A heartbeat to `node` was acknowledged.
    pub fn on_heartbeat_ack(&self, node: &NodeId, now: Duration) -> Vec<MembershipSignal> {
        let recovered = self.table.update(node, |r| {
            r.consecutive_failures = 0;
            r.last_heartbeat = r.last_heartbeat.max(now);
            if r.status == NodeStatus::Suspected {
                r.status = NodeStatus::Healthy;
                true
            } else {
                false
            }
        });
        self.extensions.remove(node);

        if recovered == Some(true) {
            info!(node = %node, "suspected member answered heartbeat");
            self.log.append(
                FailureEvent::detected(
                    node.clone(),
                    FailureType::Timeout,
                    Severity::Info,
                    now,
                    "heartbeat acknowledged",
                )
                .with_kind(FailureEventKind::Recovered, 0),
            );
            return vec![MembershipSignal::Recovered { node: node.clone() }];
        }
        vec![]
    }

    /// A heartbeat to `node` failed or went unanswered.
    pub fn on_heartbeat_failure(&self, node: &NodeId, now: Duration) -> Vec<MembershipSignal> {
        let threshold = self.config.failure_threshold;
        let transition = self.table.update(node, |r| {
            r.consecutive_failures = r.consecutive_failures.saturating_add(1);
            match r.status {
                NodeStatus::Healthy | NodeStatus::Degraded
                    if r.consecutive_failures >= threshold =>
                {
                    r.status = NodeStatus::Suspected;
                    Some((NodeStatus::Suspected, r.consecutive_failures))
                }
                NodeStatus::Suspected => {
                    r.status = NodeStatus::Failed;
                    Some((NodeStatus::Failed, r.consecutive_failures))
                }
                _ => None,
            }
        });

        match transition.flatten() {
            Some((NodeStatus::Suspected, failures)) => {
                warn!(node = %node, failures, "member suspected after missed heartbeats");
                self.log.append(FailureEvent::detected(
                    node.clone(),
                    FailureType::NodeCrash,
                    Severity::Warning,
                    now,
                    format!("{failures} consecutive heartbeat failures"),
                ));
                vec![MembershipSignal::Suspected {
                    node: node.clone(),
                    failure_type: FailureType::NodeCrash,
                }]
            }
            Some((_, failures)) => {
                warn!(node = %node, failures, "suspected member failed");
                self.log.append(FailureEvent::detected(
                    node.clone(),
                    FailureType::NodeCrash,
                    Severity::Error,
                    now,
                    format!("{failures} consecutive heartbeat failures"),
                ));
                vec![MembershipSignal::Failed { node: node.clone() }]
            }
            None => {
                debug!(node = %node, "heartbeat failure recorded");
                vec![]
            }
        }
    }

    /// A member reported its load; record it and re-check its thresholds.
    pub fn on_load_report(
        &self,
        node: &NodeId,
        metrics: LoadMetrics,
        now: Duration,
    ) -> Vec<MembershipSignal> {
        if !self.table.record_load(node, metrics, now) {
            return vec![];
        }
        self.check_performance(node, now)
    }

    /// Compare a member's last load report against the thresholds.
    ///
    /// Healthy members over a threshold become Degraded; Degraded members
    /// back under every threshold return to Healthy.
    pub fn check_performance(&self, node: &NodeId, now: Duration) -> Vec<MembershipSignal> {
        let thresholds = self.config.thresholds;
        let transition = self.table.update(node, |r| {
            let exceeded = thresholds.is_exceeded_by(&r.load_metrics);
            match r.status {
                NodeStatus::Healthy if exceeded => {
                    r.status = NodeStatus::Degraded;
                    Some((true, r.load_metrics))
                }
                NodeStatus::Degraded if !exceeded => {
                    r.status = NodeStatus::Healthy;
                    Some((false, r.load_metrics))
                }
                _ => None,
            }
        });

        match transition.flatten() {
            Some((true, metrics)) => {
                let failure_type = if metrics.memory_usage > RESOURCE_EXHAUSTION_MEMORY {
                    FailureType::ResourceExhaustion
                } else {
                    FailureType::PerformanceDegradation
                };
                warn!(
                    node = %node,
                    cpu = metrics.cpu_usage,
                    memory = metrics.memory_usage,
                    response_ms = metrics.avg_response_time.as_millis() as u64,
                    %failure_type,
                    "member degraded"
                );
                self.log.append(FailureEvent::detected(
                    node.clone(),
                    failure_type,
                    Severity::Warning,
                    now,
                    "performance threshold exceeded",
                ));
                vec![MembershipSignal::Degraded {
                    node: node.clone(),
                    failure_type,
                }]
            }
            Some((false, _)) => {
                info!(node = %node, "member back within performance thresholds");
                self.log.append(
                    FailureEvent::detected(
                        node.clone(),
                        FailureType::PerformanceDegradation,
                        Severity::Info,
                        now,
                        "performance thresholds met",
                    )
                    .with_kind(FailureEventKind::Recovered, 0),
                );
                vec![MembershipSignal::Recovered { node: node.clone() }]
            }
            None => vec![],
        }
    }

    /// Force silent members to Suspected.
    ///
    /// A member is silent when `now - last_heartbeat` exceeds the heartbeat
    /// timeout plus any granted extension. When at least `partition_fraction`
    /// of the remote members go silent in the same sweep the failure is
    /// classed as a network partition.
    pub fn check_timeouts(&self, now: Duration) -> Vec<MembershipSignal> {
        let local = self.table.local_node_id().clone();
        let timeout = self.config.heartbeat_timeout();

        let mut peers = 0usize;
        let mut silent = Vec::new();
        for record in self.table.snapshot() {
            if record.node_id == local {
                continue;
            }
            peers += 1;
            if !record.status.is_reachable() {
                continue;
            }
            let allowed = timeout + self.extension_for(&record.node_id);
            if now.saturating_sub(record.last_heartbeat) > allowed {
                silent.push(record.node_id);
            }
        }

        if silent.is_empty() {
            return vec![];
        }

        let partition = peers > 1
            && silent.len() as f64 >= peers as f64 * self.config.partition_fraction;
        let failure_type = if partition {
            FailureType::NetworkPartition
        } else {
            FailureType::Timeout
        };

        let mut signals = Vec::new();
        for node in silent {
            let moved = self.table.update(&node, |r| {
                if r.status.is_reachable() {
                    r.status = NodeStatus::Suspected;
                    true
                } else {
                    false
                }
            });
            if moved != Some(true) {
                continue;
            }
            warn!(node = %node, %failure_type, "member silent past heartbeat timeout");
            self.log.append(FailureEvent::detected(
                node.clone(),
                failure_type,
                Severity::Warning,
                now,
                format!("no heartbeat for more than {}ms", timeout.as_millis()),
            ));
            signals.push(MembershipSignal::Suspected { node, failure_type });
        }
        signals
    }

    /// Whether the leader has been silent for longer than the leader timeout.
    pub fn is_leader_silent(&self, leader: &NodeId, now: Duration) -> bool {
        if leader == self.table.local_node_id() {
            return false;
        }
        match self.table.get(leader) {
            Some(record) => now.saturating_sub(record.last_heartbeat) > self.config.leader_timeout(),
            None => true,
        }
    }

    /// Tolerate `extra` silence from `node` until its next acknowledged heartbeat.
    pub fn extend_timeout(&self, node: &NodeId, extra: Duration) {
        *self.extensions.entry(node.clone()).or_default() += extra;
        debug!(node = %node, extra_ms = extra.as_millis() as u64, "heartbeat timeout extended");
    }

    fn extension_for(&self, node: &NodeId) -> Duration {
        self.extensions.get(node).map(|d| *d).unwrap_or_default()
    }
}
