//! Recovery episodes.

use crate::{RecoveryActions, RecoveryConfig};
use dashmap::DashMap;
use palisade_core::Clock;
use palisade_membership::{FailureDetector, FailureLog, MembershipTable};
use palisade_types::{
    FailureEvent, FailureEventKind, FailureType, NodeId, NodeStatus, Severity, Topology,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// How a recovery episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The member is Healthy again after `attempts` attempts.
    Recovered { attempts: u32 },
    /// All attempts failed; the member is permanently Failed.
    Exhausted { attempts: u32 },
    /// Nothing to do: unknown member, already recovering or permanently Failed.
    Skipped,
}

/// Runs recovery strategies for failed members.
pub struct RecoveryManager {
    config: RecoveryConfig,
    table: Arc<MembershipTable>,
    log: Arc<FailureLog>,
    detector: Arc<FailureDetector>,
    actions: Arc<dyn RecoveryActions>,
    clock: Arc<dyn Clock>,
    /// Members with an episode in progress.
    active: DashMap<NodeId, FailureType>,
}

impl RecoveryManager {
    pub fn new(
        config: RecoveryConfig,
        detector: Arc<FailureDetector>,
        actions: Arc<dyn RecoveryActions>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            table: detector.table().clone(),
            log: detector.log().clone(),
            detector,
            actions,
            clock,
            active: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn is_recovering(&self, node: &NodeId) -> bool {
        self.active.contains_key(node)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Whether the member reached the terminal Failed state.
    pub fn is_exhausted(&self, node: &NodeId) -> bool {
        self.table.get(node).is_some_and(|r| {
            r.status == NodeStatus::Failed && r.recovery_attempts >= self.config.max_attempts
        })
    }

    /// Run an episode in the background.
    pub fn spawn(
        self: &Arc<Self>,
        node: NodeId,
        failure_type: FailureType,
    ) -> JoinHandle<RecoveryOutcome> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.recover(&node, failure_type).await })
    }

    /// Run one recovery episode to completion.
    #[instrument(skip_all, fields(node = %node, failure_type = %failure_type))]
    pub async fn recover(&self, node: &NodeId, failure_type: FailureType) -> RecoveryOutcome {
        if !self.table.contains(node)
            || node == self.table.local_node_id()
            || self.is_exhausted(node)
        {
            debug!("Recovery skipped");
            return RecoveryOutcome::Skipped;
        }
        {
            use dashmap::mapref::entry::Entry;
            match self.active.entry(node.clone()) {
                Entry::Occupied(_) => {
                    debug!("Recovery already in progress");
                    return RecoveryOutcome::Skipped;
                }
                Entry::Vacant(slot) => {
                    slot.insert(failure_type);
                }
            }
        }

        let outcome = self.run_episode(node, failure_type).await;
        self.active.remove(node);
        outcome
    }

    async fn run_episode(&self, node: &NodeId, failure_type: FailureType) -> RecoveryOutcome {
        info!("Starting recovery");
        self.table.update(node, |r| {
            r.status = NodeStatus::Recovering;
            r.recovery_attempts = 0;
        });

        for attempt in 1..=self.config.max_attempts {
            self.table.update(node, |r| r.recovery_attempts = attempt);
            let succeeded = self.attempt(node, failure_type).await;

            self.log.append(
                FailureEvent::detected(
                    node.clone(),
                    failure_type,
                    if succeeded {
                        Severity::Info
                    } else {
                        Severity::Warning
                    },
                    self.clock.now(),
                    if succeeded {
                        "recovery attempt succeeded"
                    } else {
                        "recovery attempt failed"
                    },
                )
                .with_kind(FailureEventKind::RecoveryAttempt, attempt),
            );

            if succeeded {
                self.mark_recovered(node, failure_type, attempt);
                return RecoveryOutcome::Recovered { attempts: attempt };
            }
            warn!(attempt, max = self.config.max_attempts, "Recovery attempt failed");
        }

        self.mark_exhausted(node, failure_type).await;
        RecoveryOutcome::Exhausted {
            attempts: self.config.max_attempts,
        }
    }

    /// One pass of the strategy for `failure_type`.
    async fn attempt(&self, node: &NodeId, failure_type: FailureType) -> bool {
        let actions = &self.actions;
        match failure_type {
            FailureType::NodeCrash => {
                tokio::time::sleep(self.config.crash_wait).await;
                if actions.ping(node).await {
                    actions.resync_data(node).await
                } else {
                    debug!("No answer, requesting restart");
                    actions.restart_node(node).await && actions.ping(node).await
                }
            }
            FailureType::NetworkPartition => {
                tokio::time::sleep(self.config.partition_wait).await;
                actions.ping(node).await && actions.resolve_conflicts(node).await
            }
            FailureType::PerformanceDegradation => {
                actions.redistribute_load(node).await;
                tokio::time::sleep(self.config.degradation_wait).await;
                let thresholds = self.detector.config().thresholds;
                self.table
                    .get(node)
                    .is_some_and(|r| !thresholds.is_exceeded_by(&r.load_metrics))
            }
            FailureType::ResourceExhaustion => {
                actions.free_resources(node).await;
                actions.redistribute_load(node).await;
                tokio::time::sleep(self.config.exhaustion_wait).await;
                actions.ping(node).await
            }
            FailureType::Timeout => {
                self.detector
                    .extend_timeout(node, self.config.timeout_extension);
                actions.ping(node).await
            }
        }
    }

    fn mark_recovered(&self, node: &NodeId, failure_type: FailureType, attempts: u32) {
        let now = self.clock.now();
        self.table.update(node, |r| {
            r.status = NodeStatus::Healthy;
            r.recovery_attempts = 0;
            r.consecutive_failures = 0;
            r.last_heartbeat = r.last_heartbeat.max(now);
        });
        self.log.append(
            FailureEvent::detected(
                node.clone(),
                failure_type,
                Severity::Info,
                now,
                format!("recovered after {attempts} attempt(s)"),
            )
            .with_kind(FailureEventKind::Recovered, attempts),
        );
        info!(attempts, "Member recovered");
    }

    async fn mark_exhausted(&self, node: &NodeId, failure_type: FailureType) {
        let attempts = self.config.max_attempts;
        self.table.update(node, |r| {
            r.status = NodeStatus::Failed;
            r.recovery_attempts = attempts;
        });
        let event = FailureEvent::detected(
            node.clone(),
            failure_type,
            Severity::Critical,
            self.clock.now(),
            format!("recovery exhausted after {attempts} attempts"),
        )
        .with_kind(FailureEventKind::Exhausted, attempts);
        self.log.append(event.clone());
        error!(attempts, "Recovery exhausted, member permanently failed");
        self.actions.alert(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use palisade_core::ManualClock;
    use palisade_membership::DetectorConfig;
    use palisade_types::test_utils::test_node_ids;
    use palisade_types::LoadMetrics;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tracing_test::traced_test;

    /// Scripted collaborator: `ping` answers are popped from a queue
    /// (false once empty), everything else returns `others`.
    struct Scripted {
        pings: Mutex<VecDeque<bool>>,
        others: bool,
        calls: Mutex<Vec<&'static str>>,
        alerts: Mutex<Vec<FailureEvent>>,
    }

    impl Scripted {
        fn new(pings: &[bool], others: bool) -> Arc<Self> {
            Arc::new(Self {
                pings: Mutex::new(pings.iter().copied().collect()),
                others,
                calls: Mutex::new(Vec::new()),
                alerts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl RecoveryActions for Scripted {
        async fn ping(&self, _node: &NodeId) -> bool {
            self.calls.lock().push("ping");
            self.pings.lock().pop_front().unwrap_or(false)
        }
        async fn resync_data(&self, _node: &NodeId) -> bool {
            self.calls.lock().push("resync");
            self.others
        }
        async fn restart_node(&self, _node: &NodeId) -> bool {
            self.calls.lock().push("restart");
            self.others
        }
        async fn redistribute_load(&self, _node: &NodeId) -> bool {
            self.calls.lock().push("redistribute");
            self.others
        }
        async fn free_resources(&self, _node: &NodeId) -> bool {
            self.calls.lock().push("free");
            self.others
        }
        async fn resolve_conflicts(&self, _node: &NodeId) -> bool {
            self.calls.lock().push("resolve");
            self.others
        }
        async fn alert(&self, event: &FailureEvent) {
            self.alerts.lock().push(event.clone());
        }
    }

    struct Fixture {
        ids: Vec<NodeId>,
        table: Arc<MembershipTable>,
        log: Arc<FailureLog>,
        detector: Arc<FailureDetector>,
    }

    fn fixture() -> Fixture {
        let ids = test_node_ids(3);
        let table = Arc::new(MembershipTable::new(ids[0].clone()));
        for id in &ids {
            table
                .register_member(id.clone(), "mem", Vec::new(), Duration::ZERO)
                .unwrap();
        }
        let log = Arc::new(FailureLog::new());
        let detector = Arc::new(FailureDetector::new(
            DetectorConfig::default(),
            table.clone(),
            log.clone(),
        ));
        Fixture {
            ids,
            table,
            log,
            detector,
        }
    }

    fn manager(fx: &Fixture, actions: Arc<Scripted>) -> Arc<RecoveryManager> {
        Arc::new(RecoveryManager::new(
            RecoveryConfig::default(),
            fx.detector.clone(),
            actions,
            Arc::new(ManualClock::new(Duration::from_secs(100))),
        ))
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_crash_recovered_by_resync() {
        let fx = fixture();
        let actions = Scripted::new(&[true], true);
        let manager = manager(&fx, actions.clone());
        let node = &fx.ids[1];
        fx.table.set_status(node, NodeStatus::Suspected);

        let started = tokio::time::Instant::now();
        let outcome = manager.recover(node, FailureType::NodeCrash).await;

        assert_eq!(outcome, RecoveryOutcome::Recovered { attempts: 1 });
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(actions.calls(), vec!["ping", "resync"]);

        let record = fx.table.get(node).unwrap();
        assert_eq!(record.status, NodeStatus::Healthy);
        assert_eq!(record.recovery_attempts, 0);
        assert_eq!(record.consecutive_failures, 0);

        let kinds: Vec<_> = fx.log.events_for(node).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![FailureEventKind::RecoveryAttempt, FailureEventKind::Recovered]
        );
        assert!(!manager.is_recovering(node));
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_crash_falls_back_to_restart() {
        let fx = fixture();
        // First ping fails, restart succeeds, second ping answers.
        let actions = Scripted::new(&[false, true], true);
        let manager = manager(&fx, actions.clone());

        let outcome = manager.recover(&fx.ids[1], FailureType::NodeCrash).await;
        assert_eq!(outcome, RecoveryOutcome::Recovered { attempts: 1 });
        assert_eq!(actions.calls(), vec!["ping", "restart", "ping"]);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_terminal() {
        let fx = fixture();
        let actions = Scripted::new(&[], false);
        let manager = manager(&fx, actions.clone());
        let node = &fx.ids[2];

        let started = tokio::time::Instant::now();
        let outcome = manager.recover(node, FailureType::NetworkPartition).await;

        assert_eq!(outcome, RecoveryOutcome::Exhausted { attempts: 3 });
        assert!(started.elapsed() >= Duration::from_secs(15));

        let record = fx.table.get(node).unwrap();
        assert_eq!(record.status, NodeStatus::Failed);
        assert_eq!(record.recovery_attempts, 3);

        let events = fx.log.events_for(node);
        let attempts = events
            .iter()
            .filter(|e| e.kind == FailureEventKind::RecoveryAttempt)
            .count();
        assert_eq!(attempts, 3);
        let last = events.last().unwrap();
        assert_eq!(last.kind, FailureEventKind::Exhausted);
        assert!(last.is_critical());
        assert_eq!(actions.alerts.lock().len(), 1);

        // No further attempts once exhausted.
        let calls_before = actions.calls().len();
        assert_eq!(
            manager.recover(node, FailureType::NodeCrash).await,
            RecoveryOutcome::Skipped
        );
        assert_eq!(actions.calls().len(), calls_before);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_degradation_rechecks_metrics() {
        let fx = fixture();
        let actions = Scripted::new(&[], true);
        let manager = manager(&fx, actions.clone());
        let node = fx.ids[1].clone();

        fx.table.record_load(
            &node,
            LoadMetrics::new(0.95, 0.5, Duration::from_millis(100)),
            Duration::ZERO,
        );
        fx.table.set_status(&node, NodeStatus::Degraded);

        // Load drops while the strategy waits.
        let table = fx.table.clone();
        let relief = node.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            table.record_load(
                &relief,
                LoadMetrics::new(0.2, 0.3, Duration::from_millis(50)),
                Duration::from_secs(15),
            );
        });

        let outcome = manager
            .recover(&node, FailureType::PerformanceDegradation)
            .await;
        assert_eq!(outcome, RecoveryOutcome::Recovered { attempts: 2 });
        assert_eq!(actions.calls(), vec!["redistribute", "redistribute"]);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_timeout_extends_window_and_pings() {
        let fx = fixture();
        let actions = Scripted::new(&[true], true);
        let manager = manager(&fx, actions.clone());
        let node = &fx.ids[1];

        let outcome = manager.recover(node, FailureType::Timeout).await;
        assert_eq!(outcome, RecoveryOutcome::Recovered { attempts: 1 });
        assert_eq!(actions.calls(), vec!["ping"]);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_local_and_unknown_nodes_skipped() {
        let fx = fixture();
        let actions = Scripted::new(&[], true);
        let manager = manager(&fx, actions.clone());

        assert_eq!(
            manager.recover(&fx.ids[0], FailureType::NodeCrash).await,
            RecoveryOutcome::Skipped
        );
        assert_eq!(
            manager
                .recover(&NodeId::from("stranger"), FailureType::NodeCrash)
                .await,
            RecoveryOutcome::Skipped
        );
        assert!(actions.calls().is_empty());
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_concurrent_episode_skipped() {
        let fx = fixture();
        let actions = Scripted::new(&[true], true);
        let manager = manager(&fx, actions.clone());
        let node = fx.ids[1].clone();

        let first = manager.spawn(node.clone(), FailureType::NodeCrash);
        tokio::task::yield_now().await;
        assert!(manager.is_recovering(&node));
        assert_eq!(
            manager.recover(&node, FailureType::NodeCrash).await,
            RecoveryOutcome::Skipped
        );
        assert_eq!(
            first.await.unwrap(),
            RecoveryOutcome::Recovered { attempts: 1 }
        );
    }
}
