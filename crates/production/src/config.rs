//! Node configuration loaded from TOML.
//!
//! Every section and field is optional; missing values take the defaults
//! below. Durations are given in milliseconds.
//!
//! ```toml
//! node_id = "node-0"
//! address = "mem://node-0"
//!
//! [consensus]
//! phase_timeout_ms = 10000
//! view_change_timeout_ms = 10000
//!
//! [heartbeat]
//! interval_ms = 5000
//! failure_threshold = 3
//!
//! [reputation]
//! byzantine_threshold = 0.7
//!
//! [recovery]
//! max_attempts = 3
//!
//! [replication]
//! replication_factor = 3
//! consistency_level = "Quorum"
//! ```

use crate::network::WireFormat;
use crate::telemetry::TelemetryConfig;
use palisade_bft::BftConfig;
use palisade_membership::DetectorConfig;
use palisade_recovery::RecoveryConfig;
use palisade_replication::ReplicationConfig;
use palisade_reputation::ReputationConfig;
use palisade_types::{ConsistencyLevel, NodeId, PerformanceThresholds};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's member ID.
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Address advertised in the membership table.
    #[serde(default)]
    pub address: String,

    /// Capacity of the consensus event channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Encoding used on the wire.
    #[serde(default)]
    pub wire_format: WireFormat,

    #[serde(default)]
    pub consensus: ConsensusSection,

    #[serde(default)]
    pub heartbeat: HeartbeatSection,

    #[serde(default)]
    pub reputation: ReputationSection,

    #[serde(default)]
    pub recovery: RecoverySection,

    #[serde(default)]
    pub replication: ReplicationSection,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_node_id() -> String {
    "node-0".to_string()
}

fn default_channel_capacity() -> usize {
    10_000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            address: String::new(),
            channel_capacity: default_channel_capacity(),
            wire_format: WireFormat::default(),
            consensus: ConsensusSection::default(),
            heartbeat: HeartbeatSection::default(),
            reputation: ReputationSection::default(),
            recovery: RecoverySection::default(),
            replication: ReplicationSection::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Consensus configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSection {
    /// Deadline per promise/accept phase (milliseconds)
    #[serde(default = "default_phase_timeout_ms")]
    pub phase_timeout_ms: u64,

    /// Deadline for a view change to install (milliseconds)
    #[serde(default = "default_view_change_timeout_ms")]
    pub view_change_timeout_ms: u64,

    /// Largest proposal payload
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// How far past its last commit a follower lets the leader prepare
    #[serde(default = "default_max_sequence_gap")]
    pub max_sequence_gap: u64,
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            phase_timeout_ms: default_phase_timeout_ms(),
            view_change_timeout_ms: default_view_change_timeout_ms(),
            max_payload_bytes: default_max_payload_bytes(),
            max_sequence_gap: default_max_sequence_gap(),
        }
    }
}

fn default_phase_timeout_ms() -> u64 {
    10_000
}

fn default_view_change_timeout_ms() -> u64 {
    10_000
}

fn default_max_payload_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_max_sequence_gap() -> u64 {
    1024
}

/// Heartbeat and failure detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatSection {
    /// Interval between heartbeat rounds (milliseconds)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,

    /// Interval between timeout sweeps (milliseconds)
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Consecutive failures before Suspected
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Silence, in heartbeat intervals, that forces Suspected
    #[serde(default = "default_timeout_intervals")]
    pub timeout_intervals: u32,

    /// Leader silence, in heartbeat intervals, that starts a view change
    #[serde(default = "default_leader_timeout_intervals")]
    pub leader_timeout_intervals: u32,

    /// Share of peers timing out together that reads as a partition
    #[serde(default = "default_partition_fraction")]
    pub partition_fraction: f64,

    /// CPU usage fraction above which a member is Degraded
    #[serde(default = "default_usage_threshold")]
    pub max_cpu_usage: f64,

    /// Memory usage fraction above which a member is Degraded
    #[serde(default = "default_usage_threshold")]
    pub max_memory_usage: f64,

    /// Average response time above which a member is Degraded (milliseconds)
    #[serde(default = "default_max_response_time_ms")]
    pub max_response_time_ms: u64,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval_ms(),
            monitor_interval_ms: default_monitor_interval_ms(),
            failure_threshold: default_failure_threshold(),
            timeout_intervals: default_timeout_intervals(),
            leader_timeout_intervals: default_leader_timeout_intervals(),
            partition_fraction: default_partition_fraction(),
            max_cpu_usage: default_usage_threshold(),
            max_memory_usage: default_usage_threshold(),
            max_response_time_ms: default_max_response_time_ms(),
        }
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_monitor_interval_ms() -> u64 {
    2_500
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_timeout_intervals() -> u32 {
    3
}

fn default_leader_timeout_intervals() -> u32 {
    2
}

fn default_partition_fraction() -> f64 {
    0.5
}

fn default_usage_threshold() -> f64 {
    0.9
}

fn default_max_response_time_ms() -> u64 {
    5_000
}

/// Reputation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationSection {
    /// Observation window (seconds)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Observations kept per member
    #[serde(default = "default_max_observations")]
    pub max_observations: usize,

    /// Members below this score are Byzantine
    #[serde(default = "default_byzantine_threshold")]
    pub byzantine_threshold: f64,
}

impl Default for ReputationSection {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_observations: default_max_observations(),
            byzantine_threshold: default_byzantine_threshold(),
        }
    }
}

fn default_window_secs() -> u64 {
    3_600
}

fn default_max_observations() -> usize {
    100
}

fn default_byzantine_threshold() -> f64 {
    0.7
}

/// Recovery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySection {
    /// Attempts before a member is permanently Failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// NodeCrash wait before probing (milliseconds)
    #[serde(default = "default_crash_wait_ms")]
    pub crash_wait_ms: u64,

    /// NetworkPartition wait (milliseconds)
    #[serde(default = "default_partition_wait_ms")]
    pub partition_wait_ms: u64,

    /// PerformanceDegradation wait (milliseconds)
    #[serde(default = "default_degradation_wait_ms")]
    pub degradation_wait_ms: u64,

    /// ResourceExhaustion wait (milliseconds)
    #[serde(default = "default_exhaustion_wait_ms")]
    pub exhaustion_wait_ms: u64,

    /// Timeout extension per attempt (milliseconds)
    #[serde(default = "default_timeout_extension_ms")]
    pub timeout_extension_ms: u64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            crash_wait_ms: default_crash_wait_ms(),
            partition_wait_ms: default_partition_wait_ms(),
            degradation_wait_ms: default_degradation_wait_ms(),
            exhaustion_wait_ms: default_exhaustion_wait_ms(),
            timeout_extension_ms: default_timeout_extension_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_crash_wait_ms() -> u64 {
    2_000
}

fn default_partition_wait_ms() -> u64 {
    5_000
}

fn default_degradation_wait_ms() -> u64 {
    10_000
}

fn default_exhaustion_wait_ms() -> u64 {
    5_000
}

fn default_timeout_extension_ms() -> u64 {
    5_000
}

/// Replication configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSection {
    /// Replicas per write
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// Deadline per replica acknowledgement (milliseconds)
    #[serde(default = "default_replica_timeout_ms")]
    pub replica_timeout_ms: u64,

    /// One, Quorum or All
    #[serde(default)]
    pub consistency_level: ConsistencyLevel,
}

impl Default for ReplicationSection {
    fn default() -> Self {
        Self {
            replication_factor: default_replication_factor(),
            replica_timeout_ms: default_replica_timeout_ms(),
            consistency_level: ConsistencyLevel::default(),
        }
    }
}

fn default_replication_factor() -> usize {
    3
}

fn default_replica_timeout_ms() -> u64 {
    5_000
}

impl NodeConfig {
    /// Defaults for the named node.
    pub fn for_node(node_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        Self {
            address: format!("mem://{node_id}"),
            node_id,
            ..Self::default()
        }
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the components cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn fraction(name: &str, value: f64) -> Result<(), ConfigError> {
            if value > 0.0 && value <= 1.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!(
                    "{name} must be in (0, 1], got {value}"
                )))
            }
        }

        if self.node_id.trim().is_empty() {
            return Err(ConfigError::Invalid("node_id must not be empty".into()));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity must be > 0".into()));
        }
        if self.consensus.max_sequence_gap == 0 {
            return Err(ConfigError::Invalid(
                "consensus.max_sequence_gap must be > 0".into(),
            ));
        }
        if self.heartbeat.interval_ms == 0 || self.heartbeat.monitor_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat intervals must be > 0".into(),
            ));
        }
        if self.heartbeat.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.failure_threshold must be > 0".into(),
            ));
        }
        fraction("heartbeat.partition_fraction", self.heartbeat.partition_fraction)?;
        fraction("heartbeat.max_cpu_usage", self.heartbeat.max_cpu_usage)?;
        fraction("heartbeat.max_memory_usage", self.heartbeat.max_memory_usage)?;
        fraction(
            "reputation.byzantine_threshold",
            self.reputation.byzantine_threshold,
        )?;
        if self.consensus.phase_timeout_ms == 0 || self.consensus.view_change_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "consensus timeouts must be > 0".into(),
            ));
        }
        if self.recovery.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "recovery.max_attempts must be > 0".into(),
            ));
        }
        if self.replication.replication_factor == 0 {
            return Err(ConfigError::Invalid(
                "replication.replication_factor must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.node_id.clone())
    }

    pub fn bft_config(&self) -> BftConfig {
        BftConfig::default()
            .with_phase_timeout(Duration::from_millis(self.consensus.phase_timeout_ms))
            .with_view_change_timeout(Duration::from_millis(
                self.consensus.view_change_timeout_ms,
            ))
            .with_max_payload_bytes(self.consensus.max_payload_bytes)
            .with_max_sequence_gap(self.consensus.max_sequence_gap)
    }

    pub fn detector_config(&self) -> DetectorConfig {
        let hb = &self.heartbeat;
        DetectorConfig {
            heartbeat_interval: Duration::from_millis(hb.interval_ms),
            monitor_interval: Duration::from_millis(hb.monitor_interval_ms),
            failure_threshold: hb.failure_threshold,
            timeout_intervals: hb.timeout_intervals,
            leader_timeout_intervals: hb.leader_timeout_intervals,
            partition_fraction: hb.partition_fraction,
            thresholds: PerformanceThresholds {
                cpu_usage: hb.max_cpu_usage,
                memory_usage: hb.max_memory_usage,
                avg_response_time: Duration::from_millis(hb.max_response_time_ms),
            },
        }
    }

    pub fn reputation_config(&self) -> ReputationConfig {
        ReputationConfig::default()
            .with_window(Duration::from_secs(self.reputation.window_secs))
            .with_max_observations(self.reputation.max_observations)
            .with_byzantine_threshold(self.reputation.byzantine_threshold)
    }

    pub fn recovery_config(&self) -> RecoveryConfig {
        let r = &self.recovery;
        RecoveryConfig {
            max_attempts: r.max_attempts,
            crash_wait: Duration::from_millis(r.crash_wait_ms),
            partition_wait: Duration::from_millis(r.partition_wait_ms),
            degradation_wait: Duration::from_millis(r.degradation_wait_ms),
            exhaustion_wait: Duration::from_millis(r.exhaustion_wait_ms),
            timeout_extension: Duration::from_millis(r.timeout_extension_ms),
        }
    }

    pub fn replication_config(&self) -> ReplicationConfig {
        ReplicationConfig::default()
            .with_replication_factor(self.replication.replication_factor)
            .with_replica_timeout(Duration::from_millis(self.replication.replica_timeout_ms))
            .with_consistency_level(self.replication.consistency_level)
    }
}
