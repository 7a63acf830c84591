//! Reputation and Byzantine-behavior tracking.
//!
//! Each member's reputation is the share of positive observations in a
//! sliding window, clamped to `[floor, 1.0]`. Reputation doubles as the
//! member's vote weight in consensus and orders replica placement for
//! critical data.
//!
//! ```toml
//! [reputation]
//! window_secs = 3600
//! max_observations = 100
//! byzantine_threshold = 0.7
//! ```

use dashmap::DashMap;
use palisade_types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// An observed behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BehaviorKind {
    CorrectVote,
    TimelyResponse,
    ValidProposal,
    IncorrectVote,
    Timeout,
    InvalidProposal,
    ConflictingMessages,
}

impl BehaviorKind {
    /// Whether the behavior counts in the member's favour.
    pub fn is_positive(&self) -> bool {
        matches!(
            self,
            BehaviorKind::CorrectVote | BehaviorKind::TimelyResponse | BehaviorKind::ValidProposal
        )
    }
}

impl fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BehaviorKind::CorrectVote => "correct_vote",
            BehaviorKind::TimelyResponse => "timely_response",
            BehaviorKind::ValidProposal => "valid_proposal",
            BehaviorKind::IncorrectVote => "incorrect_vote",
            BehaviorKind::Timeout => "timeout",
            BehaviorKind::InvalidProposal => "invalid_proposal",
            BehaviorKind::ConflictingMessages => "conflicting_messages",
        };
        f.write_str(s)
    }
}

/// Configuration for reputation tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// Observations older than this are forgotten (default: 3600).
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Most recent observations kept per member (default: 100).
    #[serde(default = "default_max_observations")]
    pub max_observations: usize,

    /// Lowest reputation a member can have (default: 0.1).
    #[serde(default = "default_floor")]
    pub floor: f64,

    /// Members below this reputation are considered Byzantine (default: 0.7).
    #[serde(default = "default_byzantine_threshold")]
    pub byzantine_threshold: f64,
}

fn default_window_secs() -> u64 {
    3600
}

fn default_max_observations() -> usize {
    100
}

fn default_floor() -> f64 {
    0.1
}

fn default_byzantine_threshold() -> f64 {
    0.7
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_observations: default_max_observations(),
            floor: default_floor(),
            byzantine_threshold: default_byzantine_threshold(),
        }
    }
}

impl ReputationConfig {
    /// Returns the observation window as a Duration.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window_secs = window.as_secs();
        self
    }

    pub fn with_max_observations(mut self, max: usize) -> Self {
        self.max_observations = max;
        self
    }

    pub fn with_byzantine_threshold(mut self, threshold: f64) -> Self {
        self.byzantine_threshold = threshold;
        self
    }
}

#[derive(Debug, Default)]
struct MemberHistory {
    observations: VecDeque<(Duration, bool)>,
    reputation: Option<f64>,
}

impl MemberHistory {
    fn prune_expired(&mut self, now: Duration, window: Duration) {
        while let Some(&(at, _)) = self.observations.front() {
            if now.saturating_sub(at) > window {
                self.observations.pop_front();
            } else {
                break;
            }
        }
    }

    fn recompute(&mut self, floor: f64) -> f64 {
        let total = self.observations.len();
        let reputation = if total == 0 {
            1.0
        } else {
            let positive = self.observations.iter().filter(|(_, p)| *p).count();
            (positive as f64 / total as f64).clamp(floor, 1.0)
        };
        self.reputation = Some(reputation);
        reputation
    }
}

/// Per-member reputation scores.
///
/// Thread-safe: each member's history sits in its own `DashMap` shard entry.
#[derive(Debug)]
pub struct ReputationTracker {
    config: ReputationConfig,
    members: DashMap<NodeId, MemberHistory>,
}

impl Default for ReputationTracker {
    fn default() -> Self {
        Self::new(ReputationConfig::default())
    }
}

impl ReputationTracker {
    #[must_use]
    pub fn new(config: ReputationConfig) -> Self {
        Self {
            config,
            members: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ReputationConfig {
        &self.config
    }

    /// Record one observation and return the member's new reputation.
    pub fn record_behavior(&self, node: &NodeId, kind: BehaviorKind, now: Duration) -> f64 {
        let mut history = self.members.entry(node.clone()).or_default();
        history.prune_expired(now, self.config.window());
        history.observations.push_back((now, kind.is_positive()));
        while history.observations.len() > self.config.max_observations {
            history.observations.pop_front();
        }

        let before = history.reputation.unwrap_or(1.0);
        let after = history.recompute(self.config.floor);

        debug!(node = %node, behavior = %kind, reputation = after, "recorded behavior");

        if before >= self.config.byzantine_threshold && after < self.config.byzantine_threshold {
            warn!(
                node = %node,
                reputation = after,
                threshold = self.config.byzantine_threshold,
                "member crossed Byzantine threshold"
            );
        }

        after
    }

    /// Current reputation, 1.0 for members with no observations.
    pub fn reputation(&self, node: &NodeId) -> f64 {
        self.members
            .get(node)
            .and_then(|h| h.reputation)
            .unwrap_or(1.0)
    }

    /// Whether the member's reputation is below the Byzantine threshold.
    pub fn is_byzantine(&self, node: &NodeId) -> bool {
        self.reputation(node) < self.config.byzantine_threshold
    }

    /// Weight of the member's vote in consensus.
    pub fn vote_weight(&self, node: &NodeId) -> f64 {
        self.reputation(node)
    }

    /// Number of observations currently held for the member.
    pub fn observation_count(&self, node: &NodeId) -> usize {
        self.members
            .get(node)
            .map(|h| h.observations.len())
            .unwrap_or(0)
    }

    /// Forget everything about a member.
    pub fn forget(&self, node: &NodeId) {
        self.members.remove(node);
    }
}
