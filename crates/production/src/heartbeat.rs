//! Heartbeat envelopes.

use crate::status::ConsensusStatus;
use arc_swap::ArcSwap;
use palisade_core::Clock;
use palisade_messages::{ConsensusMessage, Payload};
use palisade_types::{duration_to_millis, KeyPair, LoadMetrics, NodeId};
use std::sync::Arc;

/// Builds this node's signed heartbeats.
///
/// A heartbeat carries the node's current view and last committed sequence
/// in the envelope, and its self-reported load in the payload.
pub struct Pulse {
    local: NodeId,
    signing_key: KeyPair,
    clock: Arc<dyn Clock>,
    load: ArcSwap<LoadMetrics>,
    status: Arc<ArcSwap<ConsensusStatus>>,
}

impl Pulse {
    pub fn new(
        local: NodeId,
        signing_key: KeyPair,
        clock: Arc<dyn Clock>,
        status: Arc<ArcSwap<ConsensusStatus>>,
    ) -> Self {
        Self {
            local,
            signing_key,
            clock,
            load: ArcSwap::from_pointee(LoadMetrics::default()),
            status,
        }
    }

    /// Replace the load reported with the next heartbeats.
    pub fn set_load(&self, metrics: LoadMetrics) {
        self.load.store(Arc::new(metrics));
    }

    pub fn load(&self) -> LoadMetrics {
        **self.load.load()
    }

    pub fn heartbeat(&self) -> ConsensusMessage {
        let status = self.status.load();
        ConsensusMessage::signed(
            &self.signing_key,
            self.local.clone(),
            status.view,
            status.last_committed,
            Payload::Heartbeat {
                load_metrics: self.load(),
            },
            duration_to_millis(self.clock.now()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_core::ManualClock;
    use palisade_messages::MessageType;
    use palisade_types::test_utils::test_keypair;
    use palisade_types::{KeyDirectory, SequenceNumber, ViewNumber};
    use std::time::Duration;

    #[test]
    fn test_heartbeat_is_signed_and_current() {
        let key = test_keypair("node-1");
        let directory = KeyDirectory::new();
        directory.insert(NodeId::from("node-1"), key.public_key());

        let status = Arc::new(ArcSwap::from_pointee(ConsensusStatus::default()));
        let clock = Arc::new(ManualClock::new(Duration::from_secs(7)));
        let pulse = Pulse::new(NodeId::from("node-1"), key, clock, status.clone());

        status.store(Arc::new(ConsensusStatus {
            view: ViewNumber(2),
            last_committed: SequenceNumber(9),
            ..ConsensusStatus::default()
        }));
        let load = LoadMetrics::new(0.95, 0.2, Duration::from_millis(10));
        pulse.set_load(load);

        let heartbeat = pulse.heartbeat();
        assert_eq!(heartbeat.message_type, MessageType::Heartbeat);
        assert_eq!(heartbeat.view_number, ViewNumber(2));
        assert_eq!(heartbeat.sequence_number, SequenceNumber(9));
        assert_eq!(heartbeat.timestamp, 7_000);
        assert_eq!(
            heartbeat.payload,
            Payload::Heartbeat { load_metrics: load }
        );
        assert!(heartbeat.verify(&directory));
    }
}
