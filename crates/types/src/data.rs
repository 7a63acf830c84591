//! Replicated application data.

use crate::{Hash, NodeId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Version of a data entry: the writing node and its write counter.
///
/// Versions are totally ordered by counter, then by owner ID. Conflicting
/// versions of a key resolve to the greater one (last write wins).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub owner: NodeId,
    pub counter: u64,
}

impl Version {
    pub fn new(owner: NodeId, counter: u64) -> Self {
        Self { owner, counter }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.owner.cmp(&other.owner))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// How many replica acknowledgements a write needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    /// First acknowledgement.
    One,
    /// `floor(R / 2) + 1` acknowledgements.
    #[default]
    Quorum,
    /// Every replica.
    All,
}

impl ConsistencyLevel {
    /// Acknowledgements required for a replication factor `r`.
    pub fn required_acks(&self, replication_factor: usize) -> usize {
        match self {
            ConsistencyLevel::One => 1,
            ConsistencyLevel::Quorum => replication_factor / 2 + 1,
            ConsistencyLevel::All => replication_factor,
        }
    }
}

/// A versioned, checksummed value and where its copies live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub version: Version,
    pub checksum: Hash,
    pub critical: bool,
    pub replica_locations: Vec<NodeId>,
    pub consistency_level: ConsistencyLevel,
}

impl DataEntry {
    /// Create an entry; the checksum is computed from the value.
    pub fn new(
        key: impl Into<String>,
        value: Vec<u8>,
        version: Version,
        critical: bool,
        consistency_level: ConsistencyLevel,
    ) -> Self {
        let checksum = Hash::from_bytes(&value);
        Self {
            key: key.into(),
            value,
            version,
            checksum,
            critical,
            replica_locations: Vec::new(),
            consistency_level,
        }
    }

    /// Check that the stored checksum matches the value.
    pub fn verify_checksum(&self) -> bool {
        Hash::from_bytes(&self.value) == self.checksum
    }

    /// Check whether this entry should replace `other` for the same key.
    pub fn supersedes(&self, other: &DataEntry) -> bool {
        self.version > other.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_acks() {
        assert_eq!(ConsistencyLevel::One.required_acks(3), 1);
        assert_eq!(ConsistencyLevel::Quorum.required_acks(3), 2);
        assert_eq!(ConsistencyLevel::Quorum.required_acks(4), 3);
        assert_eq!(ConsistencyLevel::Quorum.required_acks(5), 3);
        assert_eq!(ConsistencyLevel::All.required_acks(3), 3);
    }

    #[test]
    fn test_version_ordering_counter_then_owner() {
        let a1 = Version::new(NodeId::from("a"), 1);
        let b1 = Version::new(NodeId::from("b"), 1);
        let a2 = Version::new(NodeId::from("a"), 2);
        assert!(a2 > b1);
        assert!(b1 > a1);
    }

    #[test]
    fn test_checksum() {
        let mut entry = DataEntry::new(
            "k",
            b"v".to_vec(),
            Version::new(NodeId::from("a"), 1),
            false,
            ConsistencyLevel::Quorum,
        );
        assert!(entry.verify_checksum());
        entry.value = b"tampered".to_vec();
        assert!(!entry.verify_checksum());
    }

    #[test]
    fn test_supersedes() {
        let old = DataEntry::new("k", vec![1], Version::new(NodeId::from("a"), 1), false, ConsistencyLevel::One);
        let new = DataEntry::new("k", vec![2], Version::new(NodeId::from("b"), 2), false, ConsistencyLevel::One);
        assert!(new.supersedes(&old));
        assert!(!old.supersedes(&new));
        assert!(!old.supersedes(&old));
    }
}
