//! Append-only per-member failure history.

use dashmap::DashMap;
use palisade_types::{FailureEvent, FailureEventKind, NodeId};

/// Failure events grouped by member, in append order.
#[derive(Debug, Default)]
pub struct FailureLog {
    events: DashMap<NodeId, Vec<FailureEvent>>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, event: FailureEvent) {
        self.events
            .entry(event.node_id.clone())
            .or_default()
            .push(event);
    }

    /// Every event recorded for a member.
    pub fn events_for(&self, node_id: &NodeId) -> Vec<FailureEvent> {
        self.events
            .get(node_id)
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// Detections since the member last recovered.
    pub fn active_failures(&self, node_id: &NodeId) -> usize {
        let Some(events) = self.events.get(node_id) else {
            return 0;
        };
        events
            .iter()
            .rev()
            .take_while(|e| e.kind != FailureEventKind::Recovered)
            .filter(|e| e.kind == FailureEventKind::Detected)
            .count()
    }

    /// All critical events across members, oldest first.
    pub fn critical_events(&self) -> Vec<FailureEvent> {
        let mut critical: Vec<FailureEvent> = self
            .events
            .iter()
            .flat_map(|e| {
                e.value()
                    .iter()
                    .filter(|ev| ev.is_critical())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        critical.sort_by_key(|e| e.timestamp);
        critical
    }

    pub fn total_events(&self) -> usize {
        self.events.iter().map(|e| e.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_types::{FailureType, Severity};
    use std::time::Duration;

    fn detected(node: &str, at: u64) -> FailureEvent {
        FailureEvent::detected(
            NodeId::from(node),
            FailureType::Timeout,
            Severity::Warning,
            Duration::from_secs(at),
            "",
        )
    }

    #[test]
    fn test_active_failures_reset_on_recovery() {
        let log = FailureLog::new();
        log.append(detected("a", 1));
        log.append(detected("a", 2));
        assert_eq!(log.active_failures(&NodeId::from("a")), 2);

        log.append(detected("a", 3).with_kind(FailureEventKind::Recovered, 1));
        assert_eq!(log.active_failures(&NodeId::from("a")), 0);

        log.append(detected("a", 4));
        assert_eq!(log.active_failures(&NodeId::from("a")), 1);
        assert_eq!(log.events_for(&NodeId::from("a")).len(), 4);
    }

    #[test]
    fn test_critical_events_are_collected() {
        let log = FailureLog::new();
        log.append(detected("a", 1));
        let mut critical = detected("b", 2).with_kind(FailureEventKind::Exhausted, 3);
        critical.severity = Severity::Critical;
        log.append(critical.clone());

        assert_eq!(log.critical_events(), vec![critical]);
        assert_eq!(log.total_events(), 2);
    }
}
