//! Node metrics using the native Prometheus client.
//!
//! Metrics are domain-specific rather than generic event counters.
//! Each node owns a registry so several nodes can share a process; the
//! monitoring collaborator pulls the text exposition via [`Metrics::gather`].

use palisade_types::NodeId;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

/// Domain-specific metrics for one node.
pub struct Metrics {
    registry: Registry,

    // === Consensus ===
    pub proposals_committed: Counter,
    pub proposals_aborted: Counter,
    pub commit_latency: Histogram,
    pub committed_sequence: Gauge,
    pub current_view: Gauge,
    pub view_changes: Counter,

    // === Membership ===
    pub heartbeat_failures: Counter,
    pub members_healthy: Gauge,

    // === Recovery ===
    pub recoveries_started: Counter,
    pub recoveries_succeeded: Counter,
    pub recoveries_exhausted: Counter,

    // === Replication ===
    pub replication_writes: CounterVec,

    // === Network ===
    pub messages_sent: Counter,
    pub messages_received: Counter,

    // === Errors ===
    pub invalid_messages_dropped: Counter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create and register the metrics, labelled with the owning node.
    pub fn new(node: &NodeId) -> Result<Self, prometheus::Error> {
        let mut labels = std::collections::HashMap::new();
        labels.insert("node".to_string(), node.to_string());
        let registry = Registry::new_custom(Some("palisade".to_string()), Some(labels))?;

        // Latency buckets: 1ms to 60s
        let latency_buckets = vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ];

        let metrics = Self {
            proposals_committed: Counter::with_opts(Opts::new(
                "proposals_committed_total",
                "Total number of proposals committed",
            ))?,
            proposals_aborted: Counter::with_opts(Opts::new(
                "proposals_aborted_total",
                "Total number of local proposals that did not commit",
            ))?,
            commit_latency: Histogram::with_opts(
                HistogramOpts::new(
                    "commit_latency_seconds",
                    "Time from propose() to its outcome",
                )
                .buckets(latency_buckets),
            )?,
            committed_sequence: Gauge::with_opts(Opts::new(
                "committed_sequence",
                "Highest committed sequence number",
            ))?,
            current_view: Gauge::with_opts(Opts::new("current_view", "Installed view number"))?,
            view_changes: Counter::with_opts(Opts::new(
                "view_changes_total",
                "Total number of views installed",
            ))?,

            heartbeat_failures: Counter::with_opts(Opts::new(
                "heartbeat_failures_total",
                "Heartbeats that were not acknowledged",
            ))?,
            members_healthy: Gauge::with_opts(Opts::new(
                "members_healthy",
                "Remote members currently Healthy or Degraded",
            ))?,

            recoveries_started: Counter::with_opts(Opts::new(
                "recoveries_started_total",
                "Recovery episodes started",
            ))?,
            recoveries_succeeded: Counter::with_opts(Opts::new(
                "recoveries_succeeded_total",
                "Recovery episodes that returned the member to Healthy",
            ))?,
            recoveries_exhausted: Counter::with_opts(Opts::new(
                "recoveries_exhausted_total",
                "Recovery episodes that declared the member permanently Failed",
            ))?,

            replication_writes: CounterVec::new(
                Opts::new("replication_writes_total", "Replicated writes by outcome"),
                &["outcome"],
            )?,

            messages_sent: Counter::with_opts(Opts::new(
                "messages_sent_total",
                "Consensus envelopes handed to the transport",
            ))?,
            messages_received: Counter::with_opts(Opts::new(
                "messages_received_total",
                "Frames received from peers",
            ))?,

            invalid_messages_dropped: Counter::with_opts(Opts::new(
                "invalid_messages_dropped_total",
                "Envelopes rejected by validation",
            ))?,

            registry,
        };
        metrics.register_all()?;
        Ok(metrics)
    }

    fn register_all(&self) -> Result<(), prometheus::Error> {
        let r = &self.registry;
        r.register(Box::new(self.proposals_committed.clone()))?;
        r.register(Box::new(self.proposals_aborted.clone()))?;
        r.register(Box::new(self.commit_latency.clone()))?;
        r.register(Box::new(self.committed_sequence.clone()))?;
        r.register(Box::new(self.current_view.clone()))?;
        r.register(Box::new(self.view_changes.clone()))?;
        r.register(Box::new(self.heartbeat_failures.clone()))?;
        r.register(Box::new(self.members_healthy.clone()))?;
        r.register(Box::new(self.recoveries_started.clone()))?;
        r.register(Box::new(self.recoveries_succeeded.clone()))?;
        r.register(Box::new(self.recoveries_exhausted.clone()))?;
        r.register(Box::new(self.replication_writes.clone()))?;
        r.register(Box::new(self.messages_sent.clone()))?;
        r.register(Box::new(self.messages_received.clone()))?;
        r.register(Box::new(self.invalid_messages_dropped.clone()))?;
        Ok(())
    }

    /// Record the outcome of a replicated write.
    pub fn record_replication(&self, ok: bool) {
        let outcome = if ok { "ok" } else { "failed" };
        self.replication_writes.with_label_values(&[outcome]).inc();
    }

    /// Prometheus text exposition of every metric.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
