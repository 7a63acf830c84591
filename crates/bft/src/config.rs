//! BFT configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the PBFT state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BftConfig {
    /// Deadline for each of the promise and accept phases.
    pub phase_timeout: Duration,

    /// Deadline for a view change to install before escalating to the next view.
    pub view_change_timeout: Duration,

    /// Largest proposal payload accepted from a leader.
    pub max_payload_bytes: usize,

    /// How far past the last committed sequence a leader may prepare.
    pub max_sequence_gap: u64,
}

impl Default for BftConfig {
    fn default() -> Self {
        Self {
            phase_timeout: Duration::from_secs(10),
            view_change_timeout: Duration::from_secs(10),
            max_payload_bytes: 4 * 1024 * 1024,
            max_sequence_gap: 1024,
        }
    }
}

impl BftConfig {
    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    pub fn with_view_change_timeout(mut self, timeout: Duration) -> Self {
        self.view_change_timeout = timeout;
        self
    }

    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    pub fn with_max_sequence_gap(mut self, gap: u64) -> Self {
        self.max_sequence_gap = gap;
        self
    }

    /// How long a follower waits for a commit after promising.
    pub fn follower_commit_timeout(&self) -> Duration {
        self.phase_timeout * 2
    }
}
