//! Failure classification and the events recorded per member.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What kind of failure was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureType {
    NodeCrash,
    NetworkPartition,
    PerformanceDegradation,
    ResourceExhaustion,
    Timeout,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureType::NodeCrash => "node_crash",
            FailureType::NetworkPartition => "network_partition",
            FailureType::PerformanceDegradation => "performance_degradation",
            FailureType::ResourceExhaustion => "resource_exhaustion",
            FailureType::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Event severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Where in the failure lifecycle an event sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureEventKind {
    /// Member moved to Suspected, Failed or Degraded.
    Detected,
    /// A recovery strategy ran.
    RecoveryAttempt,
    /// Member returned to Healthy.
    Recovered,
    /// Recovery attempts exhausted; member permanently Failed.
    Exhausted,
}

/// An entry in a member's failure log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub node_id: NodeId,
    pub failure_type: FailureType,
    pub kind: FailureEventKind,
    pub timestamp: Duration,
    pub severity: Severity,
    /// Attempt index within the episode (0 for detection events).
    pub recovery_attempt_index: u32,
    pub detail: String,
}

impl FailureEvent {
    /// A detection event.
    pub fn detected(
        node_id: NodeId,
        failure_type: FailureType,
        severity: Severity,
        timestamp: Duration,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            node_id,
            failure_type,
            kind: FailureEventKind::Detected,
            timestamp,
            severity,
            recovery_attempt_index: 0,
            detail: detail.into(),
        }
    }

    /// Builder for non-detection events.
    pub fn with_kind(mut self, kind: FailureEventKind, attempt: u32) -> Self {
        self.kind = kind;
        self.recovery_attempt_index = attempt;
        self
    }

    /// Check whether this event should raise an operator alert.
    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_event_builders() {
        let event = FailureEvent::detected(
            NodeId::from("n1"),
            FailureType::NodeCrash,
            Severity::Critical,
            Duration::from_secs(3),
            "recovery exhausted",
        )
        .with_kind(FailureEventKind::Exhausted, 3);

        assert_eq!(event.kind, FailureEventKind::Exhausted);
        assert_eq!(event.recovery_attempt_index, 3);
        assert!(event.is_critical());
    }
}
