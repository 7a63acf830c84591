//! Write path and replica placement.

use crate::{ReplicaStore, ReplicationConfig};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use palisade_membership::MembershipTable;
use palisade_reputation::ReputationTracker;
use palisade_types::{DataEntry, NodeId, Version};
use rand::seq::SliceRandom;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Sends replica writes and releases to peers.
#[async_trait]
pub trait ReplicaTransport: Send + Sync {
    /// Ask `peer` to store `entry`. Returns whether the peer acknowledged.
    async fn replicate(&self, peer: &NodeId, entry: &DataEntry) -> bool;

    /// Tell `peer` it no longer holds a replica of `key` at `version`.
    async fn release(&self, peer: &NodeId, key: &str, version: &Version) -> bool;
}

/// Replicates entries written on this node and stores replicas sent by peers.
pub struct ReplicationManager {
    local: NodeId,
    config: ReplicationConfig,
    membership: Arc<MembershipTable>,
    reputation: Arc<ReputationTracker>,
    transport: Arc<dyn ReplicaTransport>,
    store: Arc<ReplicaStore>,
    /// Replica set and version of each key's last write that met its
    /// consistency level.
    placements: DashMap<String, (Vec<NodeId>, Version)>,
    counter: AtomicU64,
}

impl ReplicationManager {
    pub fn new(
        local: NodeId,
        config: ReplicationConfig,
        membership: Arc<MembershipTable>,
        reputation: Arc<ReputationTracker>,
        transport: Arc<dyn ReplicaTransport>,
    ) -> Self {
        Self {
            local,
            config,
            membership,
            reputation,
            transport,
            store: Arc::new(ReplicaStore::new()),
            placements: DashMap::new(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn replica_store(&self) -> &Arc<ReplicaStore> {
        &self.store
    }

    pub fn get(&self, key: &str) -> Option<DataEntry> {
        self.store.get(key)
    }

    /// Pick up to `R` reachable peers for a write.
    ///
    /// Critical data goes to the highest-reputation peers (ties by ID);
    /// other data to a random sample.
    pub fn select_replicas(&self, critical: bool) -> Vec<NodeId> {
        let mut candidates: Vec<(NodeId, f64)> = self
            .membership
            .snapshot()
            .into_iter()
            .filter(|r| r.node_id != self.local && r.status.is_reachable())
            .map(|r| {
                let score = self.reputation.reputation(&r.node_id);
                (r.node_id, score)
            })
            .collect();

        if critical {
            candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        } else {
            candidates.shuffle(&mut rand::thread_rng());
        }

        candidates.truncate(self.config.replication_factor);
        candidates.into_iter().map(|(id, _)| id).collect()
    }

    /// Write a new version of `key` to a fresh replica set.
    ///
    /// Returns true once the consistency level is satisfied. A write that
    /// misses it returns false and is not retried.
    #[instrument(skip_all, fields(node = %self.local, key = %key, critical = critical))]
    pub async fn store(&self, key: &str, value: Vec<u8>, critical: bool) -> bool {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let version = Version::new(self.local.clone(), counter);
        let mut entry = DataEntry::new(
            key,
            value,
            version,
            critical,
            self.config.consistency_level,
        );

        let replicas = self.select_replicas(critical);
        entry.replica_locations = replicas.clone();
        self.store.apply(entry.clone());

        let required = self.config.required_acks();
        let acks = self.fan_out(&replicas, &entry, required).await;
        let ok = acks >= required;

        if ok {
            info!(
                version = counter,
                replicas = replicas.len(),
                acks,
                required,
                "Write replicated"
            );
            let placement = (replicas, entry.version.clone());
            if let Some((locations, old_version)) = self.placements.insert(key.to_string(), placement)
            {
                self.release_orphans(locations, &entry, old_version);
            }
        } else {
            warn!(
                version = counter,
                replicas = replicas.len(),
                acks,
                required,
                "Write below consistency level"
            );
        }
        ok
    }

    /// Send `entry` to every replica concurrently and count acknowledgements
    /// until `required` is reached. Stragglers finish in the background.
    async fn fan_out(&self, replicas: &[NodeId], entry: &DataEntry, required: usize) -> usize {
        let timeout = self.config.replica_timeout;
        let mut pending: FuturesUnordered<_> = replicas
            .iter()
            .cloned()
            .map(|peer| {
                let transport = Arc::clone(&self.transport);
                let entry = entry.clone();
                async move {
                    let acked = tokio::time::timeout(timeout, transport.replicate(&peer, &entry))
                        .await
                        .unwrap_or(false);
                    (peer, acked)
                }
            })
            .collect();

        let mut acks = 0usize;
        while let Some((peer, acked)) = pending.next().await {
            if acked {
                acks += 1;
            } else {
                debug!(peer = %peer, "Replica did not acknowledge");
            }
            if acks >= required {
                break;
            }
        }

        if !pending.is_empty() {
            tokio::spawn(async move { while pending.next().await.is_some() {} });
        }
        acks
    }

    /// Best-effort release for replicas that left the key's replica set.
    fn release_orphans(&self, previous: Vec<NodeId>, entry: &DataEntry, old_version: Version) {
        let current: BTreeSet<&NodeId> = entry.replica_locations.iter().collect();
        let orphans: Vec<NodeId> = previous
            .into_iter()
            .filter(|peer| !current.contains(peer) && *peer != self.local)
            .collect();
        if orphans.is_empty() {
            return;
        }

        debug!(key = %entry.key, orphans = orphans.len(), "Releasing dropped replicas");
        let timeout = self.config.replica_timeout;
        for peer in orphans {
            let transport = Arc::clone(&self.transport);
            let key = entry.key.clone();
            let version = old_version.clone();
            tokio::spawn(async move {
                let released =
                    tokio::time::timeout(timeout, transport.release(&peer, &key, &version)).await;
                if !matches!(released, Ok(true)) {
                    debug!(peer = %peer, key = %key, "Replica release not acknowledged");
                }
            });
        }
    }

    /// Store a replica pushed by a peer. Returns whether to acknowledge it.
    pub fn accept_replica(&self, entry: DataEntry) -> bool {
        let key = entry.key.clone();
        let outcome = self.store.apply(entry);
        debug!(key = %key, ?outcome, "Replica offered");
        outcome.is_ack()
    }

    /// Drop a replica this node no longer needs to hold.
    ///
    /// Entries written by this node are kept.
    pub fn release_replica(&self, key: &str, version: &Version) -> bool {
        if version.owner == self.local {
            return false;
        }
        self.store.release(key, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_reputation::{BehaviorKind, ReputationConfig};
    use palisade_types::test_utils::test_node_ids;
    use palisade_types::{ConsistencyLevel, NodeStatus};
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::time::Duration;
    use tracing_test::traced_test;

    /// Peers in `acking` acknowledge; peers in `hanging` never answer.
    #[derive(Default)]
    struct FakeTransport {
        acking: HashSet<NodeId>,
        hanging: HashSet<NodeId>,
        sent: Mutex<Vec<NodeId>>,
        released: Mutex<Vec<(NodeId, Version)>>,
    }

    #[async_trait]
    impl ReplicaTransport for FakeTransport {
        async fn replicate(&self, peer: &NodeId, _entry: &DataEntry) -> bool {
            self.sent.lock().push(peer.clone());
            if self.hanging.contains(peer) {
                futures::future::pending::<()>().await;
            }
            self.acking.contains(peer)
        }

        async fn release(&self, peer: &NodeId, _key: &str, version: &Version) -> bool {
            self.released.lock().push((peer.clone(), version.clone()));
            true
        }
    }

    struct Fixture {
        ids: Vec<NodeId>,
        membership: Arc<MembershipTable>,
        reputation: Arc<ReputationTracker>,
    }

    fn fixture(n: usize) -> Fixture {
        let ids = test_node_ids(n);
        let membership = Arc::new(MembershipTable::new(ids[0].clone()));
        for id in &ids {
            membership
                .register_member(id.clone(), "mem", Vec::new(), Duration::ZERO)
                .unwrap();
        }
        Fixture {
            ids,
            membership,
            reputation: Arc::new(ReputationTracker::new(ReputationConfig::default())),
        }
    }

    fn manager(
        fx: &Fixture,
        config: ReplicationConfig,
        transport: Arc<FakeTransport>,
    ) -> ReplicationManager {
        ReplicationManager::new(
            fx.ids[0].clone(),
            config,
            fx.membership.clone(),
            fx.reputation.clone(),
            transport,
        )
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_quorum_needs_two_of_three() {
        let fx = fixture(4);
        let transport = Arc::new(FakeTransport {
            acking: [fx.ids[1].clone(), fx.ids[2].clone()].into(),
            ..Default::default()
        });
        let manager = manager(&fx, ReplicationConfig::default(), transport.clone());
        assert!(manager.store("k", b"v".to_vec(), false).await);

        let entry = manager.get("k").unwrap();
        assert_eq!(entry.replica_locations.len(), 3);
        assert!(!entry.replica_locations.contains(&fx.ids[0]));
        assert_eq!(entry.version, Version::new(fx.ids[0].clone(), 1));
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_quorum_fails_with_one_ack() {
        let fx = fixture(4);
        let transport = Arc::new(FakeTransport {
            acking: [fx.ids[1].clone()].into(),
            hanging: [fx.ids[2].clone()].into(),
            ..Default::default()
        });
        let manager = manager(&fx, ReplicationConfig::default(), transport.clone());

        let started = tokio::time::Instant::now();
        assert!(!manager.store("k", b"v".to_vec(), false).await);
        // The hanging replica is cut off by the per-replica timeout.
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(transport.sent.lock().len(), 3);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_one_returns_on_first_ack() {
        let fx = fixture(4);
        let transport = Arc::new(FakeTransport {
            acking: [fx.ids[3].clone()].into(),
            hanging: [fx.ids[1].clone(), fx.ids[2].clone()].into(),
            ..Default::default()
        });
        let config = ReplicationConfig::default().with_consistency_level(ConsistencyLevel::One);
        let manager = manager(&fx, config, transport);

        let started = tokio::time::Instant::now();
        assert!(manager.store("k", b"v".to_vec(), false).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_all_requires_every_replica() {
        let fx = fixture(4);
        let transport = Arc::new(FakeTransport {
            acking: [fx.ids[1].clone(), fx.ids[2].clone()].into(),
            ..Default::default()
        });
        let config = ReplicationConfig::default().with_consistency_level(ConsistencyLevel::All);
        let manager = manager(&fx, config, transport);
        assert!(!manager.store("k", b"v".to_vec(), false).await);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_too_few_members_cannot_reach_quorum() {
        let fx = fixture(2);
        let transport = Arc::new(FakeTransport {
            acking: [fx.ids[1].clone()].into(),
            ..Default::default()
        });
        let manager = manager(&fx, ReplicationConfig::default(), transport);
        // One peer available, quorum of R=3 is two.
        assert!(!manager.store("k", b"v".to_vec(), false).await);
    }

    #[traced_test]
    #[test]
    fn test_critical_placement_prefers_reputation() {
        let fx = fixture(5);
        for _ in 0..3 {
            fx.reputation
                .record_behavior(&fx.ids[1], BehaviorKind::Timeout, Duration::ZERO);
        }
        fx.membership.set_status(&fx.ids[4], NodeStatus::Failed);

        let manager = manager(
            &fx,
            ReplicationConfig::default(),
            Arc::new(FakeTransport::default()),
        );
        assert_eq!(
            manager.select_replicas(true),
            vec![fx.ids[2].clone(), fx.ids[3].clone(), fx.ids[1].clone()]
        );

        let random: HashSet<NodeId> = manager.select_replicas(false).into_iter().collect();
        assert_eq!(random.len(), 3);
        assert!(!random.contains(&fx.ids[0]));
        assert!(!random.contains(&fx.ids[4]));
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_orphaned_replicas_released() {
        let fx = fixture(5);
        let transport = Arc::new(FakeTransport {
            acking: fx.ids.iter().cloned().collect(),
            ..Default::default()
        });
        let config = ReplicationConfig::default().with_replication_factor(1);
        let manager = manager(&fx, config, transport.clone());

        // Critical writes go to the best-reputation peer: node-1 first.
        assert!(manager.store("k", b"v1".to_vec(), true).await);
        assert_eq!(manager.get("k").unwrap().replica_locations, vec![fx.ids[1].clone()]);

        fx.reputation
            .record_behavior(&fx.ids[1], BehaviorKind::Timeout, Duration::ZERO);
        assert!(manager.store("k", b"v2".to_vec(), true).await);
        assert_eq!(manager.get("k").unwrap().replica_locations, vec![fx.ids[2].clone()]);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            *transport.released.lock(),
            vec![(fx.ids[1].clone(), Version::new(fx.ids[0].clone(), 1))]
        );
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_failed_write_leaves_release_target_unchanged() {
        let fx = fixture(5);
        let transport = Arc::new(FakeTransport {
            acking: [fx.ids[1].clone(), fx.ids[3].clone(), fx.ids[4].clone()].into(),
            ..Default::default()
        });
        let config = ReplicationConfig::default()
            .with_replication_factor(1)
            .with_consistency_level(ConsistencyLevel::One);
        let manager = manager(&fx, config, transport.clone());

        assert!(manager.store("k", b"v1".to_vec(), true).await);

        // node-2 is picked next and never acknowledges.
        fx.reputation
            .record_behavior(&fx.ids[1], BehaviorKind::Timeout, Duration::ZERO);
        assert!(!manager.store("k", b"v2".to_vec(), true).await);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(transport.released.lock().is_empty());

        fx.reputation
            .record_behavior(&fx.ids[2], BehaviorKind::Timeout, Duration::ZERO);
        assert!(manager.store("k", b"v3".to_vec(), true).await);
        assert_eq!(manager.get("k").unwrap().replica_locations, vec![fx.ids[3].clone()]);

        // The release targets the last successful write, not the failed one.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            *transport.released.lock(),
            vec![(fx.ids[1].clone(), Version::new(fx.ids[0].clone(), 1))]
        );
    }

    #[traced_test]
    #[test]
    fn test_inbound_replica_last_write_wins() {
        let fx = fixture(3);
        let manager = manager(
            &fx,
            ReplicationConfig::default(),
            Arc::new(FakeTransport::default()),
        );
        let newer = DataEntry::new(
            "k",
            b"new".to_vec(),
            Version::new(fx.ids[2].clone(), 5),
            false,
            ConsistencyLevel::Quorum,
        );
        let older = DataEntry::new(
            "k",
            b"old".to_vec(),
            Version::new(fx.ids[1].clone(), 4),
            false,
            ConsistencyLevel::Quorum,
        );
        assert!(manager.accept_replica(newer));
        assert!(manager.accept_replica(older.clone()));
        assert_eq!(manager.get("k").unwrap().value, b"new".to_vec());

        let mut corrupt = older;
        corrupt.value = b"flipped".to_vec();
        assert!(!manager.accept_replica(corrupt));

        assert!(manager.release_replica("k", &Version::new(fx.ids[2].clone(), 5)));
        assert!(manager.get("k").is_none());
    }
}
