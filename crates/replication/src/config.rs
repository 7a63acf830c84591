//! Replication configuration.

use palisade_types::ConsistencyLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Replicas per write (`R`).
    pub replication_factor: usize,

    /// Deadline for each replica's acknowledgement.
    pub replica_timeout: Duration,

    /// Acknowledgements required before `store()` reports success.
    pub consistency_level: ConsistencyLevel,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replication_factor: 3,
            replica_timeout: Duration::from_secs(5),
            consistency_level: ConsistencyLevel::Quorum,
        }
    }
}

impl ReplicationConfig {
    pub fn with_replication_factor(mut self, factor: usize) -> Self {
        self.replication_factor = factor;
        self
    }

    pub fn with_replica_timeout(mut self, timeout: Duration) -> Self {
        self.replica_timeout = timeout;
        self
    }

    pub fn with_consistency_level(mut self, level: ConsistencyLevel) -> Self {
        self.consistency_level = level;
        self
    }

    /// Acknowledgements a write needs under the configured level.
    pub fn required_acks(&self) -> usize {
        self.consistency_level.required_acks(self.replication_factor)
    }
}
