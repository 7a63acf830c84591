//! Test helpers for Palisade.
//!
//! Builds clusters with deterministic keys so signed envelopes verify the
//! same way in every test run.

use palisade_membership::MembershipTable;
use palisade_messages::{ConsensusMessage, Payload};
use palisade_types::test_utils::{test_keypair, test_node_ids};
use palisade_types::{KeyDirectory, KeyPair, NodeId, SequenceNumber, ViewNumber};
use std::sync::Arc;
use std::time::Duration;

/// A cluster of `n` members named `node-0 .. node-{n-1}` with registered keys.
pub struct ClusterFixture {
    pub ids: Vec<NodeId>,
    pub keys: Vec<KeyPair>,
    pub directory: Arc<KeyDirectory>,
}

impl ClusterFixture {
    pub fn new(n: usize) -> Self {
        let ids = test_node_ids(n);
        let keys: Vec<KeyPair> = ids.iter().map(|id| test_keypair(id.as_str())).collect();
        let directory = Arc::new(KeyDirectory::new());
        for (id, key) in ids.iter().zip(&keys) {
            directory.insert(id.clone(), key.public_key());
        }
        Self {
            ids,
            keys,
            directory,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Membership table as seen by member `index`, with every member Healthy.
    pub fn membership_for(&self, index: usize, now: Duration) -> Arc<MembershipTable> {
        let table = MembershipTable::new(self.ids[index].clone());
        for (i, id) in self.ids.iter().enumerate() {
            // Fresh table, registration cannot collide.
            let _ = table.register_member(id.clone(), format!("mem://{i}"), Vec::new(), now);
        }
        Arc::new(table)
    }

    /// An envelope signed by member `index`.
    pub fn signed(
        &self,
        index: usize,
        view: ViewNumber,
        sequence: SequenceNumber,
        payload: Payload,
        timestamp: u64,
    ) -> ConsensusMessage {
        ConsensusMessage::signed(
            &self.keys[index],
            self.ids[index].clone(),
            view,
            sequence,
            payload,
            timestamp,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_types::{LoadMetrics, Topology};

    #[test]
    fn test_fixture_envelopes_verify() {
        let cluster = ClusterFixture::new(3);
        let message = cluster.signed(
            1,
            ViewNumber(0),
            SequenceNumber(0),
            Payload::Heartbeat {
                load_metrics: LoadMetrics::default(),
            },
            0,
        );
        assert!(message.verify(cluster.directory.as_ref()));

        let table = cluster.membership_for(2, Duration::ZERO);
        assert_eq!(table.member_count(), 3);
        assert_eq!(table.local_node_id(), &cluster.ids[2]);
    }
}
