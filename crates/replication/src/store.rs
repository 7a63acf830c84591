//! Local copies of replicated entries.

use dashmap::DashMap;
use palisade_types::{DataEntry, Version};
use tracing::{debug, warn};

/// Result of offering an entry to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The entry is new or newer than the stored version.
    Applied,
    /// The same version is already stored.
    Duplicate,
    /// A newer version is already stored.
    Superseded,
    /// The checksum does not match the value.
    Corrupt,
}

impl ApplyOutcome {
    /// Whether a replica should acknowledge the write.
    pub fn is_ack(&self) -> bool {
        !matches!(self, ApplyOutcome::Corrupt)
    }
}

/// Entries held by this node, one version per key.
#[derive(Debug, Default)]
pub struct ReplicaStore {
    entries: DashMap<String, DataEntry>,
}

impl ReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entry` unless the current version is at least as new.
    pub fn apply(&self, entry: DataEntry) -> ApplyOutcome {
        if !entry.verify_checksum() {
            warn!(key = %entry.key, version = entry.version.counter, "Checksum mismatch, entry refused");
            return ApplyOutcome::Corrupt;
        }

        use dashmap::mapref::entry::Entry;
        match self.entries.entry(entry.key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
                ApplyOutcome::Applied
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                if entry.version == current.version {
                    ApplyOutcome::Duplicate
                } else if entry.supersedes(current) {
                    debug!(
                        key = %entry.key,
                        from = current.version.counter,
                        to = entry.version.counter,
                        "Newer version replaces stored entry"
                    );
                    slot.insert(entry);
                    ApplyOutcome::Applied
                } else {
                    ApplyOutcome::Superseded
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<DataEntry> {
        self.entries.get(key).map(|e| e.clone())
    }

    /// Drop the stored copy of `key` if it is exactly `version`.
    pub fn release(&self, key: &str, version: &Version) -> bool {
        self.entries
            .remove_if(key, |_, entry| entry.version == *version)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All stored entries, sorted by key.
    pub fn entries(&self) -> Vec<DataEntry> {
        let mut entries: Vec<DataEntry> = self.entries.iter().map(|e| e.clone()).collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }
}
