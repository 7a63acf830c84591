//! Cluster node runner.
//!
//! A [`ClusterNode`] owns one member's components and drives them with tokio
//! tasks sharing one shutdown token:
//!
//! - consensus: sole owner of [`PbftState`], turns events into actions
//! - outbound: sends consensus envelopes in the order they were produced
//! - heartbeat: pings every reachable peer once per interval
//! - monitor: sweeps the membership table for silent members
//! - recovery: runs one recovery episode per flagged member
//!
//! Inbound frames arrive through [`InboundHandler`]. Heartbeats are handled
//! in place; every other consensus envelope is queued for the consensus task.

use crate::clock::TokioClock;
use crate::config::{ConfigError, NodeConfig};
use crate::heartbeat::Pulse;
use crate::metrics::Metrics;
use crate::network::{Frame, InboundHandler, ReplicaRequest, Transport};
use crate::remediation::{NetworkRecoveryActions, NetworkReplicaTransport};
use crate::status::{ConsensusStatus, MonitoringSnapshot, NodeStatusSnapshot};
use crate::timers::TimerManager;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use palisade_bft::PbftState;
use palisade_core::{Action, Clock, ConsensusError, Event, RequestId, StateMachine};
use palisade_membership::{
    FailureDetector, FailureLog, MembershipError, MembershipSignal, MembershipTable,
};
use palisade_messages::{ConsensusMessage, Payload};
use palisade_recovery::{RecoveryManager, RecoveryOutcome};
use palisade_replication::ReplicationManager;
use palisade_reputation::ReputationTracker;
use palisade_types::{
    DataEntry, FailureType, KeyPair, LoadMetrics, NodeId, Proposal, ProposalId, SignatureVerifier,
    Topology, ViewNumber,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, span, trace, warn, Level};

/// Committed proposals buffered per subscriber before it starts lagging.
const COMMIT_CHANNEL_CAPACITY: usize = 1024;

/// Timer events buffered between the timer tasks and the consensus task.
const TIMER_CHANNEL_CAPACITY: usize = 256;

/// Errors returned by [`ClusterNode`] and [`ClusterNodeBuilder`].
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Membership error: {0}")]
    Membership(#[from] MembershipError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Missing builder field: {0}")]
    MissingField(&'static str),

    #[error("Node already started")]
    AlreadyStarted,

    #[error("Node is not running")]
    NotRunning,

    #[error("Event channel closed")]
    ChannelClosed,
}

type ProposalResult = Result<ProposalId, ConsensusError>;

/// Consensus envelopes waiting for the outbound task.
enum Outbound {
    Broadcast(ConsensusMessage),
    SendTo(NodeId, ConsensusMessage),
}

/// Pieces handed to the tasks on `start()`.
struct Startup {
    state: PbftState,
    event_rx: mpsc::Receiver<Event>,
    recovery_rx: mpsc::UnboundedReceiver<(NodeId, FailureType)>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════════

/// Assembles a [`ClusterNode`] from its config, keys and transport.
pub struct ClusterNodeBuilder {
    config: NodeConfig,
    signing_key: Option<KeyPair>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    members: Vec<(NodeId, String)>,
}

impl ClusterNodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            signing_key: None,
            verifier: None,
            transport: None,
            clock: None,
            members: Vec::new(),
        }
    }

    pub fn signing_key(mut self, key: KeyPair) -> Self {
        self.signing_key = Some(key);
        self
    }

    /// Public keys of every member, used to check envelope signatures.
    pub fn verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to [`TokioClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Add a founding member. The local node is added from its config.
    pub fn member(mut self, node: NodeId, address: impl Into<String>) -> Self {
        self.members.push((node, address.into()));
        self
    }

    pub fn members<I, A>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = (NodeId, A)>,
        A: Into<String>,
    {
        self.members
            .extend(members.into_iter().map(|(id, addr)| (id, addr.into())));
        self
    }

    pub fn build(self) -> Result<Arc<ClusterNode>, NodeError> {
        self.config.validate()?;
        let signing_key = self
            .signing_key
            .ok_or(NodeError::MissingField("signing_key"))?;
        let verifier = self.verifier.ok_or(NodeError::MissingField("verifier"))?;
        let transport = self.transport.ok_or(NodeError::MissingField("transport"))?;
        let clock: Arc<dyn Clock> = self
            .clock
            .unwrap_or_else(|| Arc::new(TokioClock::new()));

        let local = self.config.node_id();
        if transport.local_node_id() != &local {
            return Err(ConfigError::Invalid(format!(
                "transport sends for {} but node is {}",
                transport.local_node_id(),
                local
            ))
            .into());
        }

        let now = clock.now();
        let membership = Arc::new(MembershipTable::new(local.clone()));
        if !self.members.iter().any(|(id, _)| id == &local) {
            membership.register_member(
                local.clone(),
                self.config.address.clone(),
                Vec::<String>::new(),
                now,
            )?;
        }
        for (id, address) in self.members {
            membership.register_member(id, address, Vec::<String>::new(), now)?;
        }

        let reputation = Arc::new(ReputationTracker::new(self.config.reputation_config()));
        let failure_log = Arc::new(FailureLog::new());
        let detector = Arc::new(FailureDetector::new(
            self.config.detector_config(),
            Arc::clone(&membership),
            Arc::clone(&failure_log),
        ));

        let status = Arc::new(ArcSwap::from_pointee(ConsensusStatus {
            leader: membership.leader_for(ViewNumber::INITIAL),
            ..ConsensusStatus::default()
        }));
        let pulse = Arc::new(Pulse::new(
            local.clone(),
            signing_key.clone(),
            Arc::clone(&clock),
            Arc::clone(&status),
        ));

        let replication = Arc::new(ReplicationManager::new(
            local.clone(),
            self.config.replication_config(),
            Arc::clone(&membership),
            Arc::clone(&reputation),
            Arc::new(NetworkReplicaTransport::new(Arc::clone(&transport))),
        ));
        let actions = Arc::new(NetworkRecoveryActions::new(
            Arc::clone(&transport),
            Arc::clone(&pulse),
            Arc::clone(&replication),
        ));
        let recovery = Arc::new(RecoveryManager::new(
            self.config.recovery_config(),
            Arc::clone(&detector),
            actions,
            Arc::clone(&clock),
        ));

        let state = PbftState::new(
            local.clone(),
            signing_key,
            Arc::clone(&verifier),
            Arc::clone(&membership),
            Arc::clone(&reputation),
            self.config.bft_config(),
        );

        let metrics = Arc::new(Metrics::new(&local)?);
        let (event_tx, event_rx) = mpsc::channel(self.config.channel_capacity);
        let (recovery_tx, recovery_rx) = mpsc::unbounded_channel();
        let (commits, _) = broadcast::channel(COMMIT_CHANNEL_CAPACITY);

        info!(
            node = %local,
            members = membership.len(),
            "Cluster node built"
        );

        Ok(Arc::new(ClusterNode {
            local,
            config: self.config,
            clock,
            membership,
            reputation,
            failure_log,
            detector,
            recovery,
            replication,
            transport,
            verifier,
            pulse,
            metrics,
            status,
            commits,
            event_tx,
            recovery_tx,
            pending: DashMap::new(),
            next_request_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            startup: Mutex::new(Some(Startup {
                state,
                event_rx,
                recovery_rx,
            })),
            tasks: Mutex::new(Vec::new()),
        }))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Node
// ═══════════════════════════════════════════════════════════════════════════

/// One running cluster member.
pub struct ClusterNode {
    local: NodeId,
    config: NodeConfig,
    clock: Arc<dyn Clock>,
    membership: Arc<MembershipTable>,
    reputation: Arc<ReputationTracker>,
    failure_log: Arc<FailureLog>,
    detector: Arc<FailureDetector>,
    recovery: Arc<RecoveryManager>,
    replication: Arc<ReplicationManager>,
    transport: Arc<dyn Transport>,
    verifier: Arc<dyn SignatureVerifier>,
    pulse: Arc<Pulse>,
    metrics: Arc<Metrics>,
    status: Arc<ArcSwap<ConsensusStatus>>,
    commits: broadcast::Sender<Proposal>,
    event_tx: mpsc::Sender<Event>,
    recovery_tx: mpsc::UnboundedSender<(NodeId, FailureType)>,
    /// Callers of `propose()` waiting for their outcome.
    pending: DashMap<RequestId, oneshot::Sender<ProposalResult>>,
    next_request_id: AtomicU64,
    running: AtomicBool,
    shutdown: CancellationToken,
    startup: Mutex<Option<Startup>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ClusterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterNode")
            .field("local", &self.local)
            .field("running", &self.is_running())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl ClusterNode {
    pub fn builder(config: NodeConfig) -> ClusterNodeBuilder {
        ClusterNodeBuilder::new(config)
    }

    pub fn local_node_id(&self) -> &NodeId {
        &self.local
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn membership(&self) -> &Arc<MembershipTable> {
        &self.membership
    }

    pub fn reputation(&self) -> &Arc<ReputationTracker> {
        &self.reputation
    }

    pub fn failure_log(&self) -> &Arc<FailureLog> {
        &self.failure_log
    }

    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    pub fn replication(&self) -> &Arc<ReplicationManager> {
        &self.replication
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Spawn the node's tasks. Must be called inside a tokio runtime.
    #[instrument(skip_all, fields(node = %self.local))]
    pub fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        let Startup {
            state,
            event_rx,
            recovery_rx,
        } = self.startup.lock().take().ok_or(NodeError::AlreadyStarted)?;

        let (timer_tx, timer_rx) = mpsc::channel(TIMER_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.publish_status(&state);
        self.running.store(true, Ordering::SeqCst);

        let consensus = ConsensusTask {
            node: Arc::clone(self),
            state,
            timers: TimerManager::new(timer_tx),
            outbound_tx,
            rejected_seen: 0,
        };

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(consensus.run(event_rx, timer_rx)));
        tasks.push(tokio::spawn(Arc::clone(self).outbound_loop(outbound_rx)));
        tasks.push(tokio::spawn(Arc::clone(self).heartbeat_loop()));
        tasks.push(tokio::spawn(Arc::clone(self).monitor_loop()));
        tasks.push(tokio::spawn(Arc::clone(self).recovery_loop(recovery_rx)));

        info!(
            members = self.membership.len(),
            leader = ?self.status.load().leader,
            "Cluster node started"
        );
        Ok(())
    }

    /// Stop every task and fail outstanding proposals with `Shutdown`.
    ///
    /// A stopped node refuses inbound frames, so peers see it as crashed.
    #[instrument(skip_all, fields(node = %self.local))]
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Task ended abnormally");
            }
        }

        let waiting: Vec<RequestId> = self.pending.iter().map(|e| *e.key()).collect();
        for request_id in waiting {
            if let Some((_, tx)) = self.pending.remove(&request_id) {
                let _ = tx.send(Err(ConsensusError::Shutdown));
            }
        }
        info!("Cluster node stopped");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Client API
    // ═══════════════════════════════════════════════════════════════════════

    /// Propose an operation and wait until it commits or aborts.
    ///
    /// Only the current leader accepts proposals. Followers answer with
    /// `NotLeader` naming the leader they know.
    #[instrument(skip_all, fields(node = %self.local, len = payload.len(), priority = priority))]
    pub async fn propose(&self, payload: Vec<u8>, priority: u8) -> Result<ProposalId, NodeError> {
        if !self.is_running() {
            return Err(NodeError::NotRunning);
        }
        let request_id = RequestId::new(self.next_request_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        let started = Instant::now();
        let event = Event::ProposalRequested {
            payload,
            priority,
            request_id,
        };
        if self.event_tx.send(event).await.is_err() {
            self.pending.remove(&request_id);
            return Err(NodeError::ChannelClosed);
        }

        let result = rx.await.map_err(|_| NodeError::ChannelClosed)?;
        self.metrics
            .commit_latency
            .observe(started.elapsed().as_secs_f64());
        let proposal_id = result?;
        debug!(proposal = %proposal_id, "Proposal committed");
        Ok(proposal_id)
    }

    /// Committed proposals, in commit order, from now on.
    pub fn subscribe_commits(&self) -> broadcast::Receiver<Proposal> {
        self.commits.subscribe()
    }

    /// Store a value with replication. True once enough replicas acknowledged.
    pub async fn store(&self, key: &str, value: Vec<u8>, critical: bool) -> bool {
        let ok = self.replication.store(key, value, critical).await;
        self.metrics.record_replication(ok);
        ok
    }

    /// The local copy of `key`, whether written here or held as a replica.
    pub fn get(&self, key: &str) -> Option<DataEntry> {
        self.replication.get(key)
    }

    /// Load reported in this node's next heartbeats.
    pub fn set_local_load(&self, load: LoadMetrics) {
        self.pulse.set_load(load);
    }

    /// Administrative leave: drop `node` from membership and its reputation
    /// history. Leader rotation uses the new member set from the next view.
    pub fn remove_member(&self, node: &NodeId) -> Result<(), NodeError> {
        self.membership.remove_member(node)?;
        self.reputation.forget(node);
        info!(node = %self.local, removed = %node, "Member removed");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Introspection
    // ═══════════════════════════════════════════════════════════════════════

    pub fn status(&self) -> NodeStatusSnapshot {
        let consensus = self.status.load();
        let mut node_table = self.membership.snapshot();
        node_table.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        NodeStatusSnapshot {
            node_id: self.local.clone(),
            current_view: consensus.view,
            leader_id: consensus.leader.clone(),
            view_change_pending: consensus.view_change_pending,
            committed_count: consensus.committed_count,
            last_committed: consensus.last_committed,
            node_table,
        }
    }

    pub fn monitoring_snapshot(&self) -> MonitoringSnapshot {
        MonitoringSnapshot::collect(
            self.local.clone(),
            self.clock.now(),
            &self.membership,
            &self.reputation,
            &self.failure_log,
            self.recovery.active_count(),
        )
    }

    /// Metrics in the Prometheus text format.
    pub fn metrics_text(&self) -> String {
        self.metrics.gather()
    }

    fn publish_status(&self, state: &PbftState) {
        let status = ConsensusStatus {
            view: state.view(),
            leader: state.leader(),
            view_change_pending: state.is_view_change_pending(),
            committed_count: state.committed_log().len(),
            last_committed: state.last_committed(),
            in_flight: state.in_flight_sequence(),
        };
        self.metrics.current_view.set(status.view.0 as f64);
        self.metrics
            .committed_sequence
            .set(status.last_committed.0 as f64);
        self.status.store(Arc::new(status));
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Membership signals
    // ═══════════════════════════════════════════════════════════════════════

    /// React to detector transitions: suspect the leader, queue recoveries.
    fn handle_signals(&self, signals: Vec<MembershipSignal>) {
        if signals.is_empty() {
            return;
        }
        let leader = self.status.load().leader.clone();
        for signal in signals {
            let node = signal.node().clone();
            let failure_type = match &signal {
                MembershipSignal::Recovered { .. } => {
                    info!(member = %node, "Member healthy again");
                    continue;
                }
                MembershipSignal::Degraded { failure_type, .. } => *failure_type,
                MembershipSignal::Suspected { failure_type, .. } => {
                    if leader.as_ref() == Some(&node) {
                        self.suspect_leader(node.clone());
                    }
                    *failure_type
                }
                MembershipSignal::Failed { .. } => {
                    if leader.as_ref() == Some(&node) {
                        self.suspect_leader(node.clone());
                    }
                    FailureType::NodeCrash
                }
            };
            if self.recovery_tx.send((node, failure_type)).is_err() {
                debug!("Recovery task stopped, signal dropped");
            }
        }
    }

    fn suspect_leader(&self, leader: NodeId) {
        if leader == self.local {
            return;
        }
        debug!(leader = %leader, "Leader suspected");
        if let Err(e) = self.event_tx.try_send(Event::LeaderSuspected { leader }) {
            warn!(error = %e, "Leader suspicion dropped");
        }
    }

    fn check_leader(&self) {
        let Some(leader) = self.status.load().leader.clone() else {
            return;
        };
        if leader != self.local && self.detector.is_leader_silent(&leader, self.clock.now()) {
            self.suspect_leader(leader);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Tasks
    // ═══════════════════════════════════════════════════════════════════════

    async fn outbound_loop(self: Arc<Self>, mut outbound_rx: mpsc::UnboundedReceiver<Outbound>) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => None,
                next = outbound_rx.recv() => next,
            };
            let Some(outbound) = next else {
                break;
            };
            match outbound {
                Outbound::Broadcast(message) => {
                    let acks = self
                        .transport
                        .broadcast(&message, std::slice::from_ref(&self.local))
                        .await;
                    trace!(
                        msg_type = message.message_type.as_str(),
                        acks,
                        "Broadcast sent"
                    );
                }
                Outbound::SendTo(peer, message) => {
                    if !self.transport.send(&peer, &message).await {
                        debug!(
                            peer = %peer,
                            msg_type = message.message_type.as_str(),
                            "Send not acknowledged"
                        );
                    }
                }
            }
        }
        debug!(node = %self.local, "Outbound task stopped");
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.detector.config().heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.heartbeat_round().await,
            }
        }
        debug!(node = %self.local, "Heartbeat task stopped");
    }

    /// Ping every reachable peer concurrently; an unanswered ping counts
    /// as a failure once the heartbeat interval elapses.
    #[instrument(level = "trace", skip_all, fields(node = %self.local))]
    async fn heartbeat_round(&self) {
        let deadline = self.detector.config().heartbeat_interval;
        let message = self.pulse.heartbeat();
        let message = &message;

        let mut pings: FuturesUnordered<_> = self
            .detector
            .heartbeat_targets()
            .into_iter()
            .map(|peer| async move {
                let acked = tokio::time::timeout(deadline, self.transport.send(&peer, message))
                    .await
                    .unwrap_or(false);
                (peer, acked)
            })
            .collect();

        while let Some((peer, acked)) = pings.next().await {
            let now = self.clock.now();
            let signals = if acked {
                self.detector.on_heartbeat_ack(&peer, now)
            } else {
                self.metrics.heartbeat_failures.inc();
                self.detector.on_heartbeat_failure(&peer, now)
            };
            self.handle_signals(signals);
        }

        self.check_leader();
    }

    async fn monitor_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.detector.config().monitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let signals = self.detector.check_timeouts(self.clock.now());
                    self.handle_signals(signals);
                    let healthy = self
                        .membership
                        .snapshot()
                        .iter()
                        .filter(|r| r.node_id != self.local && r.status.is_reachable())
                        .count();
                    self.metrics.members_healthy.set(healthy as f64);
                }
            }
        }
        debug!(node = %self.local, "Monitor task stopped");
    }

    async fn recovery_loop(
        self: Arc<Self>,
        mut recovery_rx: mpsc::UnboundedReceiver<(NodeId, FailureType)>,
    ) {
        let mut episodes: JoinSet<(NodeId, RecoveryOutcome)> = JoinSet::new();
        let mut in_flight: HashSet<NodeId> = HashSet::new();
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(joined) = episodes.join_next(), if !episodes.is_empty() => {
                    match joined {
                        Ok((node, outcome)) => {
                            in_flight.remove(&node);
                            match outcome {
                                RecoveryOutcome::Recovered { .. } => {
                                    self.metrics.recoveries_succeeded.inc()
                                }
                                RecoveryOutcome::Exhausted { .. } => {
                                    self.metrics.recoveries_exhausted.inc()
                                }
                                RecoveryOutcome::Skipped => {}
                            }
                        }
                        Err(e) => warn!(error = %e, "Recovery episode ended abnormally"),
                    }
                }
                Some((node, failure_type)) = recovery_rx.recv() => {
                    if in_flight.contains(&node) || self.recovery.is_exhausted(&node) {
                        continue;
                    }
                    self.metrics.recoveries_started.inc();
                    in_flight.insert(node.clone());
                    let recovery = Arc::clone(&self.recovery);
                    episodes.spawn(async move {
                        let outcome = recovery.recover(&node, failure_type).await;
                        (node, outcome)
                    });
                }
            }
        }
        episodes.abort_all();
        debug!(node = %self.local, "Recovery task stopped");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inbound
    // ═══════════════════════════════════════════════════════════════════════

    fn on_heartbeat(&self, message: &ConsensusMessage, load: LoadMetrics) -> bool {
        let sender = &message.sender_id;
        if !self.membership.contains(sender) {
            debug!(sender = %sender, "Heartbeat from non-member ignored");
            return false;
        }
        if !message.verify(self.verifier.as_ref()) {
            self.metrics.invalid_messages_dropped.inc();
            warn!(sender = %sender, "Heartbeat with invalid signature dropped");
            return false;
        }
        let signals = self
            .detector
            .on_load_report(sender, load, self.clock.now());
        self.handle_signals(signals);
        true
    }

    fn on_consensus(&self, message: ConsensusMessage) -> bool {
        match self.event_tx.try_send(Event::MessageReceived { message }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(node = %self.local, "Event channel full, envelope dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn on_replica(&self, from: NodeId, request: ReplicaRequest) -> bool {
        if !self.membership.contains(&from) {
            debug!(sender = %from, "Replica traffic from non-member ignored");
            return false;
        }
        match request {
            ReplicaRequest::Store(entry) => self.replication.accept_replica(entry),
            ReplicaRequest::Release { key, version } => {
                self.replication.release_replica(&key, &version)
            }
        }
    }
}

#[async_trait]
impl InboundHandler for ClusterNode {
    async fn on_frame(&self, frame: Frame) -> bool {
        if !self.is_running() {
            return false;
        }
        self.metrics.messages_received.inc();
        match frame {
            Frame::Consensus(message) => {
                if let Payload::Heartbeat { load_metrics } = &message.payload {
                    let load = *load_metrics;
                    return self.on_heartbeat(&message, load);
                }
                self.on_consensus(message)
            }
            Frame::Replica { from, request } => self.on_replica(from, request),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Consensus task
// ═══════════════════════════════════════════════════════════════════════════

/// Sole owner of the consensus state machine.
struct ConsensusTask {
    node: Arc<ClusterNode>,
    state: PbftState,
    timers: TimerManager,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    /// Rejections already added to the dropped-message counter.
    rejected_seen: u64,
}

impl ConsensusTask {
    async fn run(mut self, mut event_rx: mpsc::Receiver<Event>, mut timer_rx: mpsc::Receiver<Event>) {
        let shutdown = self.node.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(event) = timer_rx.recv() => self.dispatch(event),
                Some(event) = event_rx.recv() => self.dispatch(event),
                else => break,
            }
        }
        self.timers.cancel_all();
        info!(node = %self.node.local, "Consensus task stopped");
    }

    fn dispatch(&mut self, event: Event) {
        let event_type = event.type_name();
        let span = span!(
            Level::DEBUG,
            "handle_event",
            event.type = %event_type,
            node = %self.node.local
        );
        let _guard = span.enter();

        self.state.set_time(self.node.clock.now());
        for action in self.state.handle(event) {
            self.process_action(action);
        }

        let rejected = self.state.stats().rejected_messages;
        if rejected > self.rejected_seen {
            self.node
                .metrics
                .invalid_messages_dropped
                .inc_by((rejected - self.rejected_seen) as f64);
            self.rejected_seen = rejected;
        }
        self.node.publish_status(&self.state);
    }

    fn process_action(&mut self, action: Action) {
        let metrics = &self.node.metrics;
        match action {
            Action::Broadcast { message } => {
                metrics.messages_sent.inc();
                self.queue(Outbound::Broadcast(message));
            }
            Action::SendTo { peer, message } => {
                metrics.messages_sent.inc();
                self.queue(Outbound::SendTo(peer, message));
            }
            Action::SetTimer { id, duration } => self.timers.set_timer(id, duration),
            Action::CancelTimer { id } => self.timers.cancel_timer(id),
            Action::EmitCommitted { proposal } => {
                metrics.proposals_committed.inc();
                info!(
                    sequence = proposal.sequence_number.0,
                    proposal = %proposal.proposal_id,
                    "Proposal committed"
                );
                // No subscribers is not an error.
                let _ = self.node.commits.send(proposal);
            }
            Action::EmitProposalResult { request_id, result } => {
                if matches!(
                    result,
                    Err(ConsensusError::Timeout { .. } | ConsensusError::ViewChanged { .. })
                ) {
                    metrics.proposals_aborted.inc();
                }
                if let Some((_, tx)) = self.node.pending.remove(&request_id) {
                    let _ = tx.send(result);
                }
            }
            Action::EmitViewChanged { view, leader } => {
                metrics.view_changes.inc();
                info!(view = view.0, leader = ?leader, "View changed");
            }
        }
    }

    fn queue(&self, outbound: Outbound) {
        if self.outbound_tx.send(outbound).is_err() {
            debug!("Outbound task stopped, envelope dropped");
        }
    }
}
