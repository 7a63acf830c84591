//! View change component for liveness.
//!
//! Collects view-change votes per target view. `f + 1` votes for a higher
//! view pull a node into that view change; a quorum installs it. A quorum is
//! the only way to move to a higher view.
//!
//! # Accepted-proposal forwarding
//!
//! Each vote carries the voter's last committed sequence and the highest
//! proposal it acknowledged in the accept phase without seeing it commit.
//! The new leader learns the highest such proposal from the installing
//! quorum and finishes it before taking new work, so a value that may have
//! committed on some node is never replaced at its sequence.

use palisade_messages::{AcceptedProposal, ViewChangePayload};
use palisade_types::{ClusterQuorum, NodeId, SequenceNumber, ViewNumber};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// What a newly added vote means for this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewChangeProgress {
    /// Nothing to do yet.
    Pending,
    /// Enough peers want `view` that this node should vote for it too.
    Join(ViewNumber),
    /// A quorum voted for `view`; install it.
    Install(ViewNumber),
    /// The vote was for a view at or below the current one, or a duplicate.
    Ignored,
}

/// Summary of the votes that installed a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledView {
    pub view: ViewNumber,
    /// Highest accepted-but-uncommitted proposal among the voters.
    pub highest_accepted: Option<AcceptedProposal>,
    /// Highest last-committed sequence among the voters.
    pub max_last_committed: SequenceNumber,
}

/// View change state for one node.
#[derive(Debug, Default)]
pub struct ViewChangeState {
    /// Installed view.
    current_view: ViewNumber,

    /// Highest view this node has voted for.
    voted_view: Option<ViewNumber>,

    /// Votes per target view: voter -> payload.
    vote_collector: HashMap<ViewNumber, BTreeMap<NodeId, ViewChangePayload>>,
}

impl ViewChangeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_view(&self) -> ViewNumber {
        self.current_view
    }

    /// The view this node voted for but has not installed yet.
    pub fn pending_view(&self) -> Option<ViewNumber> {
        self.voted_view.filter(|v| *v > self.current_view)
    }

    pub fn is_pending(&self) -> bool {
        self.pending_view().is_some()
    }

    /// Create this node's vote for `target`.
    ///
    /// Returns None if `target` is not above the current view or this node
    /// already voted for `target` or higher.
    pub fn create_vote(
        &mut self,
        target: ViewNumber,
        last_committed: SequenceNumber,
        highest_accepted: Option<AcceptedProposal>,
    ) -> Option<ViewChangePayload> {
        if target <= self.current_view {
            return None;
        }
        if self.voted_view.is_some_and(|voted| voted >= target) {
            return None;
        }
        self.voted_view = Some(target);

        debug!(
            current_view = self.current_view.0,
            new_view = target.0,
            last_committed = last_committed.0,
            "Created view change vote"
        );

        Some(ViewChangePayload {
            new_view: target,
            last_committed,
            highest_accepted,
        })
    }

    /// Add a vote (this node's own or a peer's).
    pub fn add_vote(
        &mut self,
        voter: NodeId,
        vote: ViewChangePayload,
        quorum: ClusterQuorum,
    ) -> ViewChangeProgress {
        let new_view = vote.new_view;
        if new_view <= self.current_view {
            return ViewChangeProgress::Ignored;
        }

        let voters = self.vote_collector.entry(new_view).or_default();
        if voters.contains_key(&voter) {
            debug!(voter = %voter, new_view = new_view.0, "Ignoring duplicate view change vote");
            return ViewChangeProgress::Ignored;
        }
        voters.insert(voter, vote);
        let count = voters.len();

        debug!(
            new_view = new_view.0,
            votes = count,
            quorum = quorum.quorum,
            "View change vote added"
        );

        if quorum.has_quorum(count) {
            debug!(new_view = new_view.0, "View change quorum reached");
            return ViewChangeProgress::Install(new_view);
        }

        let already_voted = self.voted_view.is_some_and(|voted| voted >= new_view);
        if count >= quorum.join_threshold() && !already_voted {
            return ViewChangeProgress::Join(new_view);
        }

        ViewChangeProgress::Pending
    }

    /// Install `view` after a quorum of votes.
    pub fn install(&mut self, view: ViewNumber) -> Option<InstalledView> {
        if view <= self.current_view {
            debug!(view = view.0, current_view = self.current_view.0, "View change already applied");
            return None;
        }

        let votes = self.vote_collector.remove(&view).unwrap_or_default();
        let highest_accepted = votes
            .values()
            .filter_map(|v| v.highest_accepted.as_ref())
            .max_by_key(|a| (a.sequence, a.view))
            .cloned();
        let max_last_committed = votes
            .values()
            .map(|v| v.last_committed)
            .max()
            .unwrap_or(SequenceNumber::GENESIS);

        self.set_view(view);
        info!(
            new_view = view.0,
            voters = votes.len(),
            carried = ?highest_accepted.as_ref().map(|a| a.sequence.0),
            "Applied coordinated view change"
        );

        Some(InstalledView {
            view,
            highest_accepted,
            max_last_committed,
        })
    }

    fn set_view(&mut self, view: ViewNumber) {
        self.current_view = view;
        // A quorum settled on `view`; an escalation past it is moot.
        if self.voted_view.is_some_and(|voted| voted > view) {
            self.voted_view = Some(view);
        }
        self.cleanup_old_votes();
    }

    /// Drop votes for views at or below the current one.
    fn cleanup_old_votes(&mut self) {
        let current = self.current_view;
        self.vote_collector.retain(|view, _| *view > current);
    }
}
