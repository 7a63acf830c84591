//! The local append-only log of committed proposals.

use palisade_types::{Hash, Proposal, SequenceNumber};
use std::collections::BTreeMap;
use thiserror::Error;

/// A second, different value offered for an already committed sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{sequence} already committed with {existing}, refusing {offered}")]
pub struct CommitConflict {
    pub sequence: SequenceNumber,
    pub existing: Hash,
    pub offered: Hash,
}

/// Outcome of appending to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Same sequence and digest already present.
    Duplicate,
}

/// Committed proposals keyed by sequence number.
///
/// Entries are never replaced or removed. Sequences a node missed while
/// partitioned stay as gaps.
#[derive(Debug, Clone, Default)]
pub struct CommittedLog {
    entries: BTreeMap<SequenceNumber, Proposal>,
}

impl CommittedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, proposal: Proposal) -> Result<AppendOutcome, CommitConflict> {
        if let Some(existing) = self.entries.get(&proposal.sequence_number) {
            if existing.digest == proposal.digest {
                return Ok(AppendOutcome::Duplicate);
            }
            return Err(CommitConflict {
                sequence: proposal.sequence_number,
                existing: existing.digest,
                offered: proposal.digest,
            });
        }
        self.entries.insert(proposal.sequence_number, proposal);
        Ok(AppendOutcome::Appended)
    }

    pub fn get(&self, sequence: SequenceNumber) -> Option<&Proposal> {
        self.entries.get(&sequence)
    }

    pub fn digest_at(&self, sequence: SequenceNumber) -> Option<Hash> {
        self.entries.get(&sequence).map(|p| p.digest)
    }

    /// Highest committed sequence, or genesis when empty.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.entries
            .keys()
            .next_back()
            .copied()
            .unwrap_or(SequenceNumber::GENESIS)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Proposals in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &Proposal> {
        self.entries.values()
    }
}
