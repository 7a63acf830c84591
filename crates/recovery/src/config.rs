//! Recovery configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Waits and limits for recovery strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Attempts per episode before the member is declared Failed for good.
    pub max_attempts: u32,

    /// NodeCrash: wait before probing.
    pub crash_wait: Duration,

    /// NetworkPartition: wait for the partition to heal.
    pub partition_wait: Duration,

    /// PerformanceDegradation: wait after moving load before re-checking.
    pub degradation_wait: Duration,

    /// ResourceExhaustion: wait after freeing resources.
    pub exhaustion_wait: Duration,

    /// Timeout: extra silence tolerated per attempt.
    pub timeout_extension: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            crash_wait: Duration::from_secs(2),
            partition_wait: Duration::from_secs(5),
            degradation_wait: Duration::from_secs(10),
            exhaustion_wait: Duration::from_secs(5),
            timeout_extension: Duration::from_secs(5),
        }
    }
}

impl RecoveryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_timeout_extension(mut self, extension: Duration) -> Self {
        self.timeout_extension = extension;
        self
    }
}
