//! PBFT consensus state machine.
//!
//! A round runs `Prepare → Promise → Accept → Commit`. The leader of view `v`
//! is the member at index `v mod n` of the ID-sorted membership. Promise
//! quorums are counted per member; accept quorums are weighted by each
//! acceptor's reputation. Every response (or its absence) is fed back into
//! the reputation tracker.
//!
//! Followers never take the leader's word for agreement. A Commit is applied
//! only with a certificate of signed Accept messages from a quorum, and a
//! higher view is entered only on a quorum of signed ViewChange votes, either
//! collected directly or relayed as a NewView certificate.

use crate::committed::{AppendOutcome, CommittedLog};
use crate::config::BftConfig;
use crate::view_change::{InstalledView, ViewChangeProgress, ViewChangeState};
use crate::vote_set::VoteSet;
use palisade_core::{Action, ConsensusError, Event, RequestId, StateMachine, TimerId};
use palisade_membership::MembershipTable;
use palisade_messages::{
    AcceptedProposal, ConsensusMessage, Payload, PreparePayload, ViewChangePayload,
};
use palisade_reputation::{BehaviorKind, ReputationTracker};
use palisade_types::{
    duration_to_millis, Hash, KeyPair, NodeId, Proposal, ProposalId, ProposalStatus,
    SequenceNumber, SignatureVerifier, Topology, ViewNumber,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

/// Phase of the round the local leader is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Promise,
    Accept,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Promise => "promise",
            Phase::Accept => "accept",
        }
    }
}

/// The proposal this node is leading.
#[derive(Debug)]
struct InFlight {
    proposal: Proposal,
    phase: Phase,
    promises: VoteSet,
    accepts: VoteSet,
    /// Signed Accept messages backing `accepts`, shipped with the Commit.
    certificate: Vec<ConsensusMessage>,
    request_id: Option<RequestId>,
}

/// A prepare this node promised and has not seen commit.
#[derive(Debug, Clone)]
struct Promised {
    view: ViewNumber,
    proposal_id: ProposalId,
    digest: Hash,
    payload: Vec<u8>,
    priority: u8,
}

/// Counters for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BftStats {
    pub committed: u64,
    pub aborted: u64,
    pub view_changes: u64,
    pub rejected_messages: u64,
}

/// PBFT consensus state machine for one member.
pub struct PbftState {
    // ═══════════════════════════════════════════════════════════════════════
    // Identity
    // ═══════════════════════════════════════════════════════════════════════
    local: NodeId,
    signing_key: KeyPair,
    verifier: Arc<dyn SignatureVerifier>,

    // ═══════════════════════════════════════════════════════════════════════
    // Shared components
    // ═══════════════════════════════════════════════════════════════════════
    membership: Arc<MembershipTable>,
    reputation: Arc<ReputationTracker>,
    config: BftConfig,

    // ═══════════════════════════════════════════════════════════════════════
    // Consensus state
    // ═══════════════════════════════════════════════════════════════════════
    view_change: ViewChangeState,
    committed: CommittedLog,
    in_flight: Option<InFlight>,
    promised: BTreeMap<SequenceNumber, Promised>,
    /// Accept requests acknowledged but not yet seen to commit.
    accepted: BTreeMap<SequenceNumber, AcceptedProposal>,
    /// Highest sequence a view-change quorum reported as committed.
    sequence_floor: SequenceNumber,
    /// Signed ViewChange votes seen per target view.
    vote_envelopes: HashMap<ViewNumber, Vec<ConsensusMessage>>,
    /// The votes that installed the current view; empty in the initial view.
    view_certificate: Vec<ConsensusMessage>,

    stats: BftStats,
    now: Duration,
}

impl std::fmt::Debug for PbftState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PbftState")
            .field("local", &self.local)
            .field("view", &self.view())
            .field("last_committed", &self.committed.last_sequence())
            .field("in_flight", &self.in_flight_sequence())
            .finish()
    }
}

impl PbftState {
    pub fn new(
        local: NodeId,
        signing_key: KeyPair,
        verifier: Arc<dyn SignatureVerifier>,
        membership: Arc<MembershipTable>,
        reputation: Arc<ReputationTracker>,
        config: BftConfig,
    ) -> Self {
        Self {
            local,
            signing_key,
            verifier,
            membership,
            reputation,
            config,
            view_change: ViewChangeState::new(),
            committed: CommittedLog::new(),
            in_flight: None,
            promised: BTreeMap::new(),
            accepted: BTreeMap::new(),
            sequence_floor: SequenceNumber::GENESIS,
            vote_envelopes: HashMap::new(),
            view_certificate: Vec::new(),
            stats: BftStats::default(),
            now: Duration::ZERO,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Status
    // ═══════════════════════════════════════════════════════════════════════

    pub fn local_node_id(&self) -> &NodeId {
        &self.local
    }

    pub fn config(&self) -> &BftConfig {
        &self.config
    }

    pub fn view(&self) -> ViewNumber {
        self.view_change.current_view()
    }

    pub fn leader(&self) -> Option<NodeId> {
        self.membership.leader_for(self.view())
    }

    pub fn is_leader(&self) -> bool {
        self.leader().as_ref() == Some(&self.local)
    }

    pub fn is_view_change_pending(&self) -> bool {
        self.view_change.is_pending()
    }

    pub fn committed_log(&self) -> &CommittedLog {
        &self.committed
    }

    pub fn last_committed(&self) -> SequenceNumber {
        self.committed.last_sequence()
    }

    pub fn in_flight_sequence(&self) -> Option<SequenceNumber> {
        self.in_flight.as_ref().map(|f| f.proposal.sequence_number)
    }

    pub fn stats(&self) -> BftStats {
        self.stats
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════

    fn envelope(&self, sequence: SequenceNumber, payload: Payload) -> ConsensusMessage {
        ConsensusMessage::signed(
            &self.signing_key,
            self.local.clone(),
            self.view(),
            sequence,
            payload,
            duration_to_millis(self.now),
        )
    }

    /// Feed an observation into the reputation tracker and mirror the score
    /// into the membership table.
    fn observe(&self, node: &NodeId, kind: BehaviorKind) {
        if *node == self.local {
            return;
        }
        let score = self.reputation.record_behavior(node, kind, self.now);
        self.membership.set_reputation(node, score);
    }

    fn reject(&mut self, sender: &NodeId, kind: BehaviorKind, reason: &str) {
        self.stats.rejected_messages += 1;
        debug!(sender = %sender, behavior = %kind, reason, "Rejected consensus message");
        self.observe(sender, kind);
    }

    fn own_weight(&self) -> f64 {
        self.reputation.vote_weight(&self.local)
    }

    /// The highest proposal acknowledged in the accept phase and not committed.
    fn highest_accepted(&self) -> Option<AcceptedProposal> {
        self.accepted
            .values()
            .filter(|a| self.committed.digest_at(a.sequence).is_none())
            .max_by_key(|a| (a.sequence, a.view))
            .cloned()
    }

    /// Highest sequence known to be decided, locally or by a view-change quorum.
    fn sequence_base(&self) -> SequenceNumber {
        self.committed.last_sequence().max(self.sequence_floor)
    }

    fn next_sequence(&self) -> Option<SequenceNumber> {
        self.sequence_base().next()
    }

    /// Whether a leader may prepare `sequence` here.
    fn is_sequence_in_window(&self, sequence: SequenceNumber) -> bool {
        let limit = self
            .sequence_base()
            .0
            .saturating_add(self.config.max_sequence_gap);
        sequence > SequenceNumber::GENESIS && sequence.0 <= limit
    }

    /// Members with a valid signed Accept for exactly this proposal in
    /// `certificate`, or None when they fall short of a quorum.
    fn certified_acceptors(
        &self,
        view: ViewNumber,
        sequence: SequenceNumber,
        proposal_id: ProposalId,
        digest: Hash,
        certificate: &[ConsensusMessage],
    ) -> Option<Vec<NodeId>> {
        let mut acceptors = BTreeSet::new();
        for accept in certificate {
            let matches = accept.view_number == view
                && accept.sequence_number == sequence
                && matches!(
                    accept.payload,
                    Payload::Accept { proposal_id: id, digest: d } if id == proposal_id && d == digest
                );
            if matches
                && self.membership.contains(&accept.sender_id)
                && accept.verify(self.verifier.as_ref())
            {
                acceptors.insert(accept.sender_id.clone());
            }
        }
        self.membership
            .quorum()
            .has_quorum(acceptors.len())
            .then(|| acceptors.into_iter().collect())
    }

    /// Valid signed votes for `view` in `votes`, one per member, or None when
    /// they fall short of a quorum.
    fn certified_votes(
        &self,
        view: ViewNumber,
        votes: Vec<ConsensusMessage>,
    ) -> Option<Vec<(NodeId, ViewChangePayload, ConsensusMessage)>> {
        let mut seen = BTreeSet::new();
        let mut certified = Vec::new();
        for envelope in votes {
            let Payload::ViewChange(vote) = &envelope.payload else {
                continue;
            };
            if vote.new_view != view
                || seen.contains(&envelope.sender_id)
                || !self.membership.contains(&envelope.sender_id)
                || !envelope.verify(self.verifier.as_ref())
            {
                continue;
            }
            let vote = vote.clone();
            seen.insert(envelope.sender_id.clone());
            certified.push((envelope.sender_id.clone(), vote, envelope));
        }
        self.membership
            .quorum()
            .has_quorum(certified.len())
            .then_some(certified)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Proposing
    // ═══════════════════════════════════════════════════════════════════════

    fn check_can_propose(&self) -> Result<(), ConsensusError> {
        if self.membership.is_empty() {
            return Err(ConsensusError::NoMembers);
        }
        if let Some(new_view) = self.view_change.pending_view() {
            return Err(ConsensusError::ViewChanged { new_view });
        }
        let view = self.view();
        let leader = self.membership.leader_for(view);
        if leader.as_ref() != Some(&self.local) {
            return Err(ConsensusError::NotLeader { view, leader });
        }
        if let Some(in_flight) = self.in_flight_sequence() {
            return Err(ConsensusError::Busy { in_flight });
        }
        Ok(())
    }

    #[instrument(skip(self, payload), fields(node = %self.local, len = payload.len()))]
    fn on_propose_request(
        &mut self,
        payload: Vec<u8>,
        priority: u8,
        request_id: RequestId,
    ) -> Vec<Action> {
        if let Err(error) = self.check_can_propose() {
            debug!(%request_id, error = %error, "Proposal refused");
            return vec![Action::EmitProposalResult {
                request_id,
                result: Err(error),
            }];
        }
        let Some(sequence) = self.next_sequence() else {
            let last = self.sequence_base();
            warn!(%request_id, last = last.0, "Sequence numbers exhausted");
            return vec![Action::EmitProposalResult {
                request_id,
                result: Err(ConsensusError::SequenceExhausted { last }),
            }];
        };
        self.start_round(sequence, payload, priority, Some(request_id))
    }

    fn start_round(
        &mut self,
        sequence: SequenceNumber,
        payload: Vec<u8>,
        priority: u8,
        request_id: Option<RequestId>,
    ) -> Vec<Action> {
        let view = self.view();
        let mut proposal = Proposal::new(self.local.clone(), view, sequence, payload, priority);
        proposal.status = ProposalStatus::Preparing;
        proposal.record_vote(self.local.clone(), true);

        let mut promises = VoteSet::new();
        promises.add(self.local.clone(), self.own_weight());

        info!(
            view = view.0,
            sequence = sequence.0,
            proposal_id = %proposal.proposal_id,
            "Starting proposal round"
        );

        let prepare = self.envelope(
            sequence,
            Payload::Prepare(PreparePayload {
                proposal_id: proposal.proposal_id,
                payload: proposal.payload.clone(),
                digest: proposal.digest,
                priority,
            }),
        );

        self.in_flight = Some(InFlight {
            proposal,
            phase: Phase::Promise,
            promises,
            accepts: VoteSet::new(),
            certificate: Vec::new(),
            request_id,
        });

        let mut actions = vec![
            Action::Broadcast { message: prepare },
            Action::SetTimer {
                id: TimerId::Phase(sequence),
                duration: self.config.phase_timeout,
            },
        ];
        actions.extend(self.maybe_advance_to_accept());
        actions
    }

    /// Move the in-flight proposal to the accept phase once promises reach quorum.
    fn maybe_advance_to_accept(&mut self) -> Vec<Action> {
        let quorum = self.membership.quorum();
        let own_weight = self.own_weight();
        let local = self.local.clone();

        let Some(flight) = self.in_flight.as_mut() else {
            return vec![];
        };
        if flight.phase != Phase::Promise || !quorum.has_quorum(flight.promises.count()) {
            return vec![];
        }

        flight.phase = Phase::Accept;
        flight.proposal.status = ProposalStatus::Promised;
        flight.accepts.add(local, own_weight);

        let proposal = &flight.proposal;
        let sequence = proposal.sequence_number;
        let accepted = AcceptedProposal {
            view: proposal.view_number,
            sequence,
            digest: proposal.digest,
            payload: proposal.payload.clone(),
            priority: proposal.priority,
        };
        let accept_payload = Payload::Accept {
            proposal_id: proposal.proposal_id,
            digest: proposal.digest,
        };
        debug!(
            sequence = sequence.0,
            promises = flight.promises.count(),
            "Promise quorum reached"
        );

        self.accepted.insert(sequence, accepted);
        let message = self.envelope(sequence, accept_payload);
        if let Some(flight) = self.in_flight.as_mut() {
            flight.certificate.push(message.clone());
        }

        let mut actions = vec![
            Action::Broadcast { message },
            Action::SetTimer {
                id: TimerId::Phase(sequence),
                duration: self.config.phase_timeout,
            },
        ];
        actions.extend(self.maybe_commit());
        actions
    }

    /// Commit the in-flight proposal once weighted accepts reach quorum.
    fn maybe_commit(&mut self) -> Vec<Action> {
        let quorum = self.membership.quorum();
        let ready = self.in_flight.as_ref().is_some_and(|f| {
            f.phase == Phase::Accept && quorum.has_weighted_quorum(f.accepts.weight())
        });
        if !ready {
            return vec![];
        }
        let Some(flight) = self.in_flight.take() else {
            return vec![];
        };

        let mut proposal = flight.proposal;
        proposal.status = ProposalStatus::Accepted;
        let acceptors: Vec<NodeId> = flight.accepts.voters().cloned().collect();
        for acceptor in &acceptors {
            proposal.record_vote(acceptor.clone(), true);
        }
        let sequence = proposal.sequence_number;
        let proposal_id = proposal.proposal_id;

        debug!(
            sequence = sequence.0,
            weight = flight.accepts.weight(),
            acceptors = acceptors.len(),
            "Accept quorum reached"
        );

        let commit = self.envelope(
            sequence,
            Payload::Commit {
                proposal_id,
                digest: proposal.digest,
                payload: proposal.payload.clone(),
                priority: proposal.priority,
                certificate: flight.certificate,
            },
        );

        let mut actions = vec![Action::Broadcast { message: commit }];
        actions.extend(self.apply_commit(proposal));
        if let Some(request_id) = flight.request_id {
            actions.push(Action::EmitProposalResult {
                request_id,
                result: Ok(proposal_id),
            });
        }
        actions
    }

    /// Append a proposal to the committed log.
    fn apply_commit(&mut self, mut proposal: Proposal) -> Vec<Action> {
        proposal.status = ProposalStatus::Committed;
        let sequence = proposal.sequence_number;

        match self.committed.append(proposal.clone()) {
            Ok(AppendOutcome::Appended) => {
                self.promised.remove(&sequence);
                self.accepted.remove(&sequence);
                self.stats.committed += 1;
                info!(
                    view = proposal.view_number.0,
                    sequence = sequence.0,
                    proposal_id = %proposal.proposal_id,
                    "Proposal committed"
                );
                vec![
                    Action::CancelTimer {
                        id: TimerId::Phase(sequence),
                    },
                    Action::EmitCommitted { proposal },
                ]
            }
            Ok(AppendOutcome::Duplicate) => {
                trace!(sequence = sequence.0, "Duplicate commit ignored");
                vec![]
            }
            Err(conflict) => {
                warn!(error = %conflict, "Refusing conflicting commit");
                vec![]
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Message handling
    // ═══════════════════════════════════════════════════════════════════════

    #[instrument(skip(self, message), fields(
        node = %self.local,
        msg_type = %message.message_type,
        from = %message.sender_id,
        view = message.view_number.0,
        seq = message.sequence_number.0,
    ))]
    fn on_message(&mut self, message: ConsensusMessage) -> Vec<Action> {
        let sender = message.sender_id.clone();
        if sender == self.local {
            return vec![];
        }
        if !self.membership.contains(&sender) {
            self.stats.rejected_messages += 1;
            debug!("Message from non-member dropped");
            return vec![];
        }
        if !message.verify(self.verifier.as_ref()) {
            warn!("Invalid signature or malformed envelope");
            self.reject(&sender, BehaviorKind::InvalidProposal, "invalid envelope");
            return vec![];
        }

        let view = message.view_number;
        let sequence = message.sequence_number;
        // Accepts and votes are kept whole as certificate entries.
        match message.payload.clone() {
            Payload::Prepare(prepare) => self.on_prepare(sender, view, sequence, prepare),
            Payload::Promise {
                proposal_id,
                digest,
            } => self.on_promise(sender, view, sequence, proposal_id, digest),
            Payload::Accept {
                proposal_id,
                digest,
            } => self.on_accept(message, proposal_id, digest),
            Payload::Commit {
                proposal_id,
                digest,
                payload,
                priority,
                certificate,
            } => {
                let proposal = Proposal::new(sender.clone(), view, sequence, payload, priority);
                self.on_commit(sender, proposal, proposal_id, digest, certificate)
            }
            Payload::ViewChange(vote) => self.on_view_change_vote(sender, vote, message),
            Payload::NewView { votes } => self.on_new_view(sender, view, votes),
            // Liveness traffic goes to the failure detector.
            Payload::Heartbeat { .. } => vec![],
        }
    }

    fn on_prepare(
        &mut self,
        sender: NodeId,
        view: ViewNumber,
        sequence: SequenceNumber,
        prepare: PreparePayload,
    ) -> Vec<Action> {
        if view < self.view() {
            self.reject(&sender, BehaviorKind::InvalidProposal, "stale view");
            return vec![];
        }
        if self.view_change.pending_view().is_some_and(|pending| view < pending) {
            debug!("Prepare for a view being replaced");
            return vec![];
        }
        if self.membership.leader_for(view).as_ref() != Some(&sender) {
            self.reject(&sender, BehaviorKind::InvalidProposal, "prepare from non-leader");
            return vec![];
        }
        if prepare.payload.len() > self.config.max_payload_bytes
            || prepare.digest != Hash::from_bytes(&prepare.payload)
            || prepare.proposal_id != ProposalId::derive(&sender, view, sequence, &prepare.digest)
        {
            self.reject(&sender, BehaviorKind::InvalidProposal, "malformed prepare");
            return vec![];
        }
        if view > self.view() {
            debug!("Prepare for a view not installed here");
            return vec![];
        }
        if !self.is_sequence_in_window(sequence) {
            warn!(base = self.sequence_base().0, "Prepare outside the sequence window");
            self.reject(&sender, BehaviorKind::InvalidProposal, "sequence out of range");
            return vec![];
        }

        let mut actions = vec![];
        let promise = Payload::Promise {
            proposal_id: prepare.proposal_id,
            digest: prepare.digest,
        };

        match self.committed.digest_at(sequence) {
            Some(existing) if existing == prepare.digest => {
                // Already committed here; answer so the leader can finish.
                self.observe(&sender, BehaviorKind::ValidProposal);
                let message = self.envelope(sequence, promise);
                actions.push(Action::SendTo {
                    peer: sender,
                    message,
                });
                return actions;
            }
            Some(_) => {
                warn!("Prepare conflicts with committed value");
                self.reject(&sender, BehaviorKind::ConflictingMessages, "committed conflict");
                return actions;
            }
            None => {}
        }

        if let Some(previous) = self.promised.get(&sequence) {
            if previous.view == view && previous.digest != prepare.digest {
                warn!("Leader equivocated within a view");
                self.reject(&sender, BehaviorKind::ConflictingMessages, "equivocation");
                return actions;
            }
        }

        self.promised.insert(
            sequence,
            Promised {
                view,
                proposal_id: prepare.proposal_id,
                digest: prepare.digest,
                payload: prepare.payload,
                priority: prepare.priority,
            },
        );
        self.observe(&sender, BehaviorKind::ValidProposal);

        let message = self.envelope(sequence, promise);
        actions.push(Action::SendTo {
            peer: sender,
            message,
        });
        actions.push(Action::SetTimer {
            id: TimerId::Phase(sequence),
            duration: self.config.follower_commit_timeout(),
        });
        actions
    }

    fn on_promise(
        &mut self,
        sender: NodeId,
        view: ViewNumber,
        sequence: SequenceNumber,
        proposal_id: ProposalId,
        digest: Hash,
    ) -> Vec<Action> {
        if view < self.view() {
            self.reject(&sender, BehaviorKind::IncorrectVote, "stale promise");
            return vec![];
        }
        let weight = self.reputation.vote_weight(&sender);
        let Some(flight) = self.in_flight.as_mut() else {
            trace!("Promise with nothing in flight");
            return vec![];
        };
        if flight.proposal.proposal_id != proposal_id || flight.proposal.sequence_number != sequence
        {
            trace!("Promise for another round");
            return vec![];
        }
        if digest != flight.proposal.digest {
            self.reject(&sender, BehaviorKind::IncorrectVote, "promise digest mismatch");
            return vec![];
        }
        if flight.phase != Phase::Promise {
            return vec![];
        }
        if flight.promises.add(sender.clone(), weight) {
            flight.proposal.record_vote(sender.clone(), true);
            self.observe(&sender, BehaviorKind::TimelyResponse);
        }
        self.maybe_advance_to_accept()
    }

    fn on_accept(
        &mut self,
        message: ConsensusMessage,
        proposal_id: ProposalId,
        digest: Hash,
    ) -> Vec<Action> {
        let sender = message.sender_id.clone();
        let view = message.view_number;
        let sequence = message.sequence_number;
        if view < self.view() {
            self.reject(&sender, BehaviorKind::IncorrectVote, "stale accept");
            return vec![];
        }

        let leading = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.proposal.proposal_id == proposal_id);
        if leading {
            return self.on_accept_ack(message, digest);
        }

        if self.membership.leader_for(view).as_ref() == Some(&sender) {
            return self.on_accept_request(sender, view, sequence, proposal_id, digest);
        }

        trace!("Accept for a round this node is not part of");
        vec![]
    }

    /// Leader side: a follower acknowledged the accept request.
    fn on_accept_ack(&mut self, message: ConsensusMessage, digest: Hash) -> Vec<Action> {
        let sender = message.sender_id.clone();
        let weight = self.reputation.vote_weight(&sender);
        let Some(flight) = self.in_flight.as_mut() else {
            return vec![];
        };
        if flight.proposal.digest != digest
            || flight.proposal.sequence_number != message.sequence_number
            || flight.proposal.view_number != message.view_number
        {
            self.reject(&sender, BehaviorKind::IncorrectVote, "accept digest mismatch");
            return vec![];
        }
        if flight.phase != Phase::Accept {
            return vec![];
        }
        if flight.accepts.add(sender.clone(), weight) {
            flight.certificate.push(message);
            self.observe(&sender, BehaviorKind::CorrectVote);
        }
        self.maybe_commit()
    }

    /// Follower side: the leader asks this node to accept a promised proposal.
    fn on_accept_request(
        &mut self,
        sender: NodeId,
        view: ViewNumber,
        sequence: SequenceNumber,
        proposal_id: ProposalId,
        digest: Hash,
    ) -> Vec<Action> {
        if self.view_change.pending_view().is_some_and(|pending| view < pending) {
            debug!("Accept for a view being replaced");
            return vec![];
        }
        if view > self.view() {
            debug!("Accept for a view not installed here");
            return vec![];
        }

        let mut actions = vec![];
        let ack = Payload::Accept {
            proposal_id,
            digest,
        };

        match self.committed.digest_at(sequence) {
            Some(existing) if existing == digest => {
                let message = self.envelope(sequence, ack);
                actions.push(Action::SendTo {
                    peer: sender,
                    message,
                });
                return actions;
            }
            Some(_) => {
                self.reject(&sender, BehaviorKind::ConflictingMessages, "committed conflict");
                return actions;
            }
            None => {}
        }

        let Some(promised) = self.promised.get(&sequence) else {
            debug!("Accept without a matching promise");
            return actions;
        };
        if promised.view != view || promised.proposal_id != proposal_id {
            debug!("Accept for a proposal this node did not promise");
            return actions;
        }
        if promised.digest != digest {
            self.reject(&sender, BehaviorKind::ConflictingMessages, "accept digest changed");
            return actions;
        }

        let accepted = AcceptedProposal {
            view,
            sequence,
            digest,
            payload: promised.payload.clone(),
            priority: promised.priority,
        };
        self.accepted.insert(sequence, accepted);

        let message = self.envelope(sequence, ack);
        actions.push(Action::SendTo {
            peer: sender,
            message,
        });
        actions
    }

    /// Follower side: the leader announced a commit.
    ///
    /// Applied only with a quorum certificate, so it is safe whether or not
    /// this node took part in the round and in whichever view it is.
    fn on_commit(
        &mut self,
        sender: NodeId,
        mut proposal: Proposal,
        proposal_id: ProposalId,
        digest: Hash,
        certificate: Vec<ConsensusMessage>,
    ) -> Vec<Action> {
        let view = proposal.view_number;
        if view < self.view() {
            self.reject(&sender, BehaviorKind::IncorrectVote, "stale commit");
            return vec![];
        }
        if self.membership.leader_for(view).as_ref() != Some(&sender) {
            self.reject(&sender, BehaviorKind::InvalidProposal, "commit from non-leader");
            return vec![];
        }
        if proposal.digest != digest || proposal.proposal_id != proposal_id {
            self.reject(&sender, BehaviorKind::InvalidProposal, "commit digest mismatch");
            return vec![];
        }
        let sequence = proposal.sequence_number;
        let Some(acceptors) =
            self.certified_acceptors(view, sequence, proposal_id, digest, &certificate)
        else {
            warn!("Commit without a quorum of signed accepts");
            self.reject(&sender, BehaviorKind::InvalidProposal, "commit without certificate");
            return vec![];
        };
        for acceptor in acceptors {
            proposal.record_vote(acceptor, true);
        }

        if let Some(existing) = self.committed.digest_at(sequence) {
            if existing != digest {
                warn!("Commit conflicts with committed value");
                self.reject(&sender, BehaviorKind::ConflictingMessages, "committed conflict");
            }
            return vec![];
        }

        self.observe(&sender, BehaviorKind::ValidProposal);
        self.apply_commit(proposal)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Timeouts
    // ═══════════════════════════════════════════════════════════════════════

    fn on_phase_timeout(&mut self, sequence: SequenceNumber) -> Vec<Action> {
        let leading = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.proposal.sequence_number == sequence);

        if leading {
            let Some(flight) = self.in_flight.take() else {
                return vec![];
            };
            let phase = flight.phase;
            let votes = match phase {
                Phase::Promise => &flight.promises,
                Phase::Accept => &flight.accepts,
            };
            let silent: Vec<NodeId> = self
                .membership
                .sorted_members()
                .into_iter()
                .filter(|m| *m != self.local && !votes.contains(m))
                .collect();
            for node in &silent {
                self.observe(node, BehaviorKind::Timeout);
            }

            self.stats.aborted += 1;
            warn!(
                sequence = sequence.0,
                phase = phase.as_str(),
                silent = silent.len(),
                "Proposal aborted on phase timeout"
            );

            let mut actions = vec![];
            if let Some(request_id) = flight.request_id {
                actions.push(Action::EmitProposalResult {
                    request_id,
                    result: Err(ConsensusError::Timeout {
                        phase: phase.as_str(),
                        sequence,
                    }),
                });
            }
            actions.extend(self.escalate_from(self.view()));
            return actions;
        }

        let waiting = self.promised.get(&sequence).is_some_and(|p| p.view == self.view())
            && self.committed.digest_at(sequence).is_none();
        if waiting {
            if let Some(leader) = self.leader() {
                self.observe(&leader, BehaviorKind::Timeout);
            }
            warn!(sequence = sequence.0, "No commit before deadline");
            return self.escalate_from(self.view());
        }

        vec![]
    }

    fn on_view_change_timeout(&mut self, view: ViewNumber) -> Vec<Action> {
        if self.view() >= view || self.view_change.pending_view() != Some(view) {
            return vec![];
        }
        warn!(target_view = view.0, "View change did not install, escalating");
        self.escalate_from(view)
    }

    fn on_leader_suspected(&mut self, leader: NodeId) -> Vec<Action> {
        if self.leader().as_ref() != Some(&leader) || self.view_change.is_pending() {
            return vec![];
        }
        info!(leader = %leader, "Leader suspected");
        self.escalate_from(self.view())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // View change
    // ═══════════════════════════════════════════════════════════════════════

    /// Vote for the view after `view`.
    fn escalate_from(&mut self, view: ViewNumber) -> Vec<Action> {
        match view.next() {
            Some(target) => self.start_view_change(target),
            None => {
                warn!(view = view.0, "View numbers exhausted");
                vec![]
            }
        }
    }

    fn start_view_change(&mut self, target: ViewNumber) -> Vec<Action> {
        let last_committed = self.committed.last_sequence();
        let highest_accepted = self.highest_accepted();
        let Some(vote) = self
            .view_change
            .create_vote(target, last_committed, highest_accepted)
        else {
            return vec![];
        };

        info!(
            node = %self.local,
            current_view = self.view().0,
            target_view = target.0,
            "Starting view change"
        );

        let message = self.envelope(last_committed, Payload::ViewChange(vote.clone()));
        let mut actions = vec![
            Action::Broadcast {
                message: message.clone(),
            },
            Action::SetTimer {
                id: TimerId::ViewChange(target),
                duration: self.config.view_change_timeout,
            },
        ];
        let local = self.local.clone();
        actions.extend(self.on_view_change_vote(local, vote, message));
        actions
    }

    fn on_view_change_vote(
        &mut self,
        sender: NodeId,
        vote: ViewChangePayload,
        envelope: ConsensusMessage,
    ) -> Vec<Action> {
        if vote.new_view <= self.view() {
            trace!(voter = %sender, new_view = vote.new_view.0, "Vote for an installed view");
            return self.new_view_for(sender);
        }
        let new_view = vote.new_view;
        let quorum = self.membership.quorum();
        let progress = self.view_change.add_vote(sender, vote, quorum);
        if progress != ViewChangeProgress::Ignored {
            self.vote_envelopes.entry(new_view).or_default().push(envelope);
        }
        match progress {
            ViewChangeProgress::Pending | ViewChangeProgress::Ignored => vec![],
            ViewChangeProgress::Join(view) => self.start_view_change(view),
            ViewChangeProgress::Install(view) => match self.view_change.install(view) {
                Some(installed) => self.enter_view(installed),
                None => vec![],
            },
        }
    }

    /// Hand the current view's certificate to a member still voting for it
    /// or for an older view.
    fn new_view_for(&self, peer: NodeId) -> Vec<Action> {
        if peer == self.local || self.view_certificate.is_empty() {
            return vec![];
        }
        let message = self.envelope(
            self.committed.last_sequence(),
            Payload::NewView {
                votes: self.view_certificate.clone(),
            },
        );
        vec![Action::SendTo { peer, message }]
    }

    /// Install a view from a relayed quorum of signed votes.
    fn on_new_view(
        &mut self,
        sender: NodeId,
        view: ViewNumber,
        votes: Vec<ConsensusMessage>,
    ) -> Vec<Action> {
        if view <= self.view() {
            trace!("New view already installed");
            return vec![];
        }
        let Some(certified) = self.certified_votes(view, votes) else {
            self.reject(&sender, BehaviorKind::InvalidProposal, "new view without quorum");
            return vec![];
        };

        let quorum = self.membership.quorum();
        for (voter, vote, envelope) in certified {
            let progress = self.view_change.add_vote(voter, vote, quorum);
            if progress == ViewChangeProgress::Ignored {
                continue;
            }
            self.vote_envelopes.entry(view).or_default().push(envelope);
            if progress == ViewChangeProgress::Install(view) {
                if let Some(installed) = self.view_change.install(view) {
                    info!(view = view.0, from = %sender, "Installed view from certificate");
                    return self.enter_view(installed);
                }
            }
        }
        vec![]
    }

    /// Switch to a view installed by a quorum of votes.
    fn enter_view(&mut self, installed: InstalledView) -> Vec<Action> {
        let view = installed.view;
        self.stats.view_changes += 1;
        self.view_certificate = self.vote_envelopes.remove(&view).unwrap_or_default();
        self.vote_envelopes.retain(|v, _| *v > view);

        let mut actions = vec![Action::CancelTimer {
            id: TimerId::ViewChange(view),
        }];

        if let Some(flight) = self.in_flight.take() {
            let sequence = flight.proposal.sequence_number;
            self.stats.aborted += 1;
            info!(sequence = sequence.0, "Aborting in-flight proposal on view change");
            actions.push(Action::CancelTimer {
                id: TimerId::Phase(sequence),
            });
            if let Some(request_id) = flight.request_id {
                actions.push(Action::EmitProposalResult {
                    request_id,
                    result: Err(ConsensusError::ViewChanged { new_view: view }),
                });
            }
        }

        for (sequence, _) in self.promised.iter().filter(|(_, p)| p.view < view) {
            actions.push(Action::CancelTimer {
                id: TimerId::Phase(*sequence),
            });
        }
        self.promised.retain(|_, p| p.view >= view);

        let leader = self.membership.leader_for(view);
        info!(
            node = %self.local,
            view = view.0,
            leader = ?leader,
            "Entered view"
        );
        actions.push(Action::EmitViewChanged {
            view,
            leader: leader.clone(),
        });

        self.sequence_floor = self.sequence_floor.max(installed.max_last_committed);

        if leader.as_ref() != Some(&self.local) {
            return actions;
        }
        let new_view = self.envelope(
            self.committed.last_sequence(),
            Payload::NewView {
                votes: self.view_certificate.clone(),
            },
        );
        actions.push(Action::Broadcast { message: new_view });

        let carried = installed
            .highest_accepted
            .filter(|a| self.committed.digest_at(a.sequence).is_none());
        if let Some(carried) = carried {
            // Finished under the new view rather than dropped: it may already be committed elsewhere.
            info!(
                sequence = carried.sequence.0,
                from_view = carried.view.0,
                "Re-proposing highest accepted proposal"
            );
            actions.extend(self.start_round(
                carried.sequence,
                carried.payload,
                carried.priority,
                None,
            ));
        }
        actions
    }
}

impl StateMachine for PbftState {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::PhaseTimeout { sequence } => self.on_phase_timeout(sequence),
            Event::ViewChangeTimeout { view } => self.on_view_change_timeout(view),
            Event::LeaderSuspected { leader } => self.on_leader_suspected(leader),
            Event::MessageReceived { message } => self.on_message(message),
            Event::ProposalRequested {
                payload,
                priority,
                request_id,
            } => self.on_propose_request(payload, priority, request_id),
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    fn now(&self) -> Duration {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_reputation::ReputationConfig;
    use palisade_test_helpers::ClusterFixture;
    use palisade_types::Signature;
    use std::collections::{HashSet, VecDeque};
    use tracing_test::traced_test;

    /// In-process cluster that delivers broadcast and directed messages
    /// synchronously.
    struct Harness {
        fixture: ClusterFixture,
        nodes: Vec<PbftState>,
        reputations: Vec<Arc<ReputationTracker>>,
        /// Nodes whose outbound and inbound traffic is dropped.
        silent: HashSet<usize>,
        committed: Vec<Vec<Proposal>>,
        results: Vec<(RequestId, Result<ProposalId, ConsensusError>)>,
        views: Vec<Vec<ViewNumber>>,
        timers: Vec<Vec<TimerId>>,
    }

    impl Harness {
        fn new(n: usize) -> Self {
            let fixture = ClusterFixture::new(n);
            let mut nodes = Vec::new();
            let mut reputations = Vec::new();
            for i in 0..n {
                let reputation = Arc::new(ReputationTracker::new(ReputationConfig::default()));
                nodes.push(PbftState::new(
                    fixture.ids[i].clone(),
                    fixture.keys[i].clone(),
                    fixture.directory.clone(),
                    fixture.membership_for(i, Duration::ZERO),
                    reputation.clone(),
                    BftConfig::default(),
                ));
                reputations.push(reputation);
            }
            Self {
                fixture,
                nodes,
                reputations,
                silent: HashSet::new(),
                committed: vec![Vec::new(); n],
                results: Vec::new(),
                views: vec![Vec::new(); n],
                timers: vec![Vec::new(); n],
            }
        }

        fn index_of(&self, id: &NodeId) -> usize {
            self.fixture.ids.iter().position(|i| i == id).unwrap()
        }

        /// Deliver an event and everything it causes until the cluster is quiet.
        fn run(&mut self, target: usize, event: Event) {
            let mut queue = VecDeque::from([(target, event)]);
            while let Some((index, event)) = queue.pop_front() {
                if self.silent.contains(&index) {
                    continue;
                }
                let actions = self.nodes[index].handle(event);
                for action in actions {
                    match action {
                        Action::Broadcast { message } => {
                            for peer in 0..self.nodes.len() {
                                if peer != index {
                                    queue.push_back((
                                        peer,
                                        Event::MessageReceived {
                                            message: message.clone(),
                                        },
                                    ));
                                }
                            }
                        }
                        Action::SendTo { peer, message } => {
                            let peer = self.index_of(&peer);
                            queue.push_back((peer, Event::MessageReceived { message }));
                        }
                        Action::SetTimer { id, .. } => self.timers[index].push(id),
                        Action::CancelTimer { .. } => {}
                        Action::EmitCommitted { proposal } => self.committed[index].push(proposal),
                        Action::EmitProposalResult { request_id, result } => {
                            self.results.push((request_id, result))
                        }
                        Action::EmitViewChanged { view, .. } => self.views[index].push(view),
                    }
                }
            }
        }

        fn propose(&mut self, index: usize, payload: &[u8], request: u64) {
            self.run(
                index,
                Event::ProposalRequested {
                    payload: payload.to_vec(),
                    priority: 0,
                    request_id: RequestId(request),
                },
            );
        }

        fn result_for(&self, request: u64) -> Option<&Result<ProposalId, ConsensusError>> {
            self.results
                .iter()
                .find(|(id, _)| *id == RequestId(request))
                .map(|(_, r)| r)
        }

        fn proposal_id(&self, leader: usize, view: u64, sequence: u64, payload: &[u8]) -> ProposalId {
            ProposalId::derive(
                &self.fixture.ids[leader],
                ViewNumber(view),
                SequenceNumber(sequence),
                &Hash::from_bytes(payload),
            )
        }

        /// Prepare for `payload` signed by `leader`.
        fn prepare(&self, leader: usize, view: u64, sequence: u64, payload: &[u8]) -> ConsensusMessage {
            self.fixture.signed(
                leader,
                ViewNumber(view),
                SequenceNumber(sequence),
                Payload::Prepare(PreparePayload {
                    proposal_id: self.proposal_id(leader, view, sequence, payload),
                    payload: payload.to_vec(),
                    digest: Hash::from_bytes(payload),
                    priority: 0,
                }),
                0,
            )
        }

        /// Accept for `leader`'s proposal of `payload`, signed by `signer`.
        fn accept(
            &self,
            signer: usize,
            leader: usize,
            view: u64,
            sequence: u64,
            payload: &[u8],
        ) -> ConsensusMessage {
            self.fixture.signed(
                signer,
                ViewNumber(view),
                SequenceNumber(sequence),
                Payload::Accept {
                    proposal_id: self.proposal_id(leader, view, sequence, payload),
                    digest: Hash::from_bytes(payload),
                },
                0,
            )
        }

        fn commit(
            &self,
            leader: usize,
            view: u64,
            sequence: u64,
            payload: &[u8],
            certificate: Vec<ConsensusMessage>,
        ) -> ConsensusMessage {
            self.fixture.signed(
                leader,
                ViewNumber(view),
                SequenceNumber(sequence),
                Payload::Commit {
                    proposal_id: self.proposal_id(leader, view, sequence, payload),
                    digest: Hash::from_bytes(payload),
                    payload: payload.to_vec(),
                    priority: 0,
                    certificate,
                },
                0,
            )
        }

        fn deliver(&mut self, index: usize, message: &ConsensusMessage) {
            self.run(
                index,
                Event::MessageReceived {
                    message: message.clone(),
                },
            );
        }

        /// No two nodes hold different values at the same sequence.
        fn assert_agreement(&self) {
            let mut decided: BTreeMap<SequenceNumber, Hash> = BTreeMap::new();
            for (index, node) in self.nodes.iter().enumerate() {
                for proposal in node.committed_log().iter() {
                    let first = decided
                        .entry(proposal.sequence_number)
                        .or_insert(proposal.digest);
                    assert_eq!(
                        *first, proposal.digest,
                        "node {index} diverged at {}",
                        proposal.sequence_number
                    );
                }
            }
        }
    }

    #[traced_test]
    #[test]
    fn test_four_node_commit() {
        let mut h = Harness::new(4);
        assert!(h.nodes[0].is_leader());

        h.propose(0, b"op-1", 1);

        assert!(matches!(h.result_for(1), Some(Ok(_))));
        for i in 0..4 {
            assert_eq!(h.committed[i].len(), 1, "node {i} committed");
            assert_eq!(h.committed[i][0].sequence_number, SequenceNumber(1));
            assert_eq!(h.committed[i][0].payload, b"op-1".to_vec());
            assert_eq!(h.nodes[i].last_committed(), SequenceNumber(1));
        }
        assert!(h.nodes[0].in_flight_sequence().is_none());

        h.propose(0, b"op-2", 2);
        for i in 0..4 {
            assert_eq!(h.nodes[i].last_committed(), SequenceNumber(2));
        }
        // Followers were rewarded for answering.
        assert!(h.reputations[0].observation_count(&h.fixture.ids[1]) > 0);
    }

    #[traced_test]
    #[test]
    fn test_single_node_commits_alone() {
        let mut h = Harness::new(1);
        h.propose(0, b"solo", 1);
        assert!(matches!(h.result_for(1), Some(Ok(_))));
        assert_eq!(h.nodes[0].last_committed(), SequenceNumber(1));
    }

    #[traced_test]
    #[test]
    fn test_not_leader_rejected() {
        let mut h = Harness::new(4);
        h.propose(2, b"op", 7);
        match h.result_for(7) {
            Some(Err(ConsensusError::NotLeader { view, leader })) => {
                assert_eq!(*view, ViewNumber(0));
                assert_eq!(leader.as_ref(), Some(&h.fixture.ids[0]));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[traced_test]
    #[test]
    fn test_busy_while_in_flight() {
        let mut h = Harness::new(4);
        h.silent.extend([1, 2, 3]);
        h.propose(0, b"first", 1);
        assert_eq!(h.nodes[0].in_flight_sequence(), Some(SequenceNumber(1)));

        h.propose(0, b"second", 2);
        assert_eq!(
            h.result_for(2),
            Some(&Err(ConsensusError::Busy {
                in_flight: SequenceNumber(1)
            }))
        );
    }

    #[traced_test]
    #[test]
    fn test_phase_timeout_aborts_and_penalizes_silent_nodes() {
        let mut h = Harness::new(4);
        h.silent.extend([2, 3]);
        h.propose(0, b"op", 1);
        assert!(h.result_for(1).is_none());
        assert!(h.timers[0].contains(&TimerId::Phase(SequenceNumber(1))));

        h.run(
            0,
            Event::PhaseTimeout {
                sequence: SequenceNumber(1),
            },
        );

        assert_eq!(
            h.result_for(1),
            Some(&Err(ConsensusError::Timeout {
                phase: "promise",
                sequence: SequenceNumber(1)
            }))
        );
        assert!(h.nodes[0].in_flight_sequence().is_none());
        assert!(h.reputations[0].reputation(&h.fixture.ids[2]) < 1.0);
        assert!(h.reputations[0].reputation(&h.fixture.ids[1]) >= 1.0 - 1e-9);
        assert!(h.committed.iter().all(|c| c.is_empty()));
        assert_eq!(h.nodes[0].stats().aborted, 1);
    }

    #[traced_test]
    #[test]
    fn test_view_change_installs_next_leader() {
        let mut h = Harness::new(4);
        h.silent.insert(0);
        let leader = h.fixture.ids[0].clone();

        h.run(1, Event::LeaderSuspected { leader: leader.clone() });
        h.run(2, Event::LeaderSuspected { leader });

        for i in 1..4 {
            assert_eq!(h.nodes[i].view(), ViewNumber(1), "node {i} view");
            assert_eq!(h.nodes[i].leader(), Some(h.fixture.ids[1].clone()));
            assert_eq!(h.views[i], vec![ViewNumber(1)]);
        }

        h.propose(1, b"after", 9);
        assert!(matches!(h.result_for(9), Some(Ok(_))));
        for i in 1..4 {
            assert_eq!(h.nodes[i].last_committed(), SequenceNumber(1));
        }
    }

    #[traced_test]
    #[test]
    fn test_new_leader_reproposes_highest_accepted() {
        let mut h = Harness::new(4);
        let view = ViewNumber(0);
        let sequence = SequenceNumber(1);
        let payload = b"carried".to_vec();
        let digest = Hash::from_bytes(&payload);
        let proposal_id = ProposalId::derive(&h.fixture.ids[0], view, sequence, &digest);

        // The old leader reaches the accept phase on nodes 1..3 and then vanishes.
        let prepare = h.fixture.signed(
            0,
            view,
            sequence,
            Payload::Prepare(PreparePayload {
                proposal_id,
                payload: payload.clone(),
                digest,
                priority: 0,
            }),
            0,
        );
        let accept = h.fixture.signed(
            0,
            view,
            sequence,
            Payload::Accept {
                proposal_id,
                digest,
            },
            0,
        );
        h.silent.insert(0);
        for i in 1..4 {
            h.run(i, Event::MessageReceived { message: prepare.clone() });
            h.run(i, Event::MessageReceived { message: accept.clone() });
        }
        assert!(h.committed.iter().all(|c| c.is_empty()));

        for i in 1..4 {
            h.run(
                i,
                Event::PhaseTimeout {
                    sequence: SequenceNumber(1),
                },
            );
        }

        for i in 1..4 {
            assert_eq!(h.nodes[i].view(), ViewNumber(1));
            assert_eq!(h.committed[i].len(), 1, "node {i}");
            assert_eq!(h.committed[i][0].payload, payload);
            assert_eq!(h.committed[i][0].sequence_number, sequence);
            assert_eq!(h.committed[i][0].view_number, ViewNumber(1));
        }
    }

    #[traced_test]
    #[test]
    fn test_forged_signature_dropped_and_penalized() {
        let mut h = Harness::new(4);
        let payload = b"forged".to_vec();
        let digest = Hash::from_bytes(&payload);
        let mut message = h.fixture.signed(
            0,
            ViewNumber(0),
            SequenceNumber(1),
            Payload::Prepare(PreparePayload {
                proposal_id: ProposalId::derive(
                    &h.fixture.ids[0],
                    ViewNumber(0),
                    SequenceNumber(1),
                    &digest,
                ),
                payload,
                digest,
                priority: 0,
            }),
            0,
        );
        message.signature = Signature::from_bytes(vec![0u8; 64]);

        h.run(1, Event::MessageReceived { message });

        assert!(h.reputations[1].reputation(&h.fixture.ids[0]) < 1.0);
        assert_eq!(h.nodes[1].stats().rejected_messages, 1);
        assert!(h.timers[1].is_empty());
    }

    #[traced_test]
    #[test]
    fn test_prepare_from_non_leader_rejected() {
        let mut h = Harness::new(4);
        let payload = b"usurper".to_vec();
        let digest = Hash::from_bytes(&payload);
        let message = h.fixture.signed(
            2,
            ViewNumber(0),
            SequenceNumber(1),
            Payload::Prepare(PreparePayload {
                proposal_id: ProposalId::derive(
                    &h.fixture.ids[2],
                    ViewNumber(0),
                    SequenceNumber(1),
                    &digest,
                ),
                payload,
                digest,
                priority: 0,
            }),
            0,
        );
        h.run(1, Event::MessageReceived { message });
        assert!(h.reputations[1].reputation(&h.fixture.ids[2]) < 1.0);
        assert!(h.timers[1].is_empty());
    }

    #[traced_test]
    #[test]
    fn test_commit_without_quorum_rejected() {
        let mut h = Harness::new(4);
        let certificate = vec![
            h.accept(0, 0, 0, 1, b"thin"),
            h.accept(1, 0, 0, 1, b"thin"),
        ];
        let message = h.commit(0, 0, 1, b"thin", certificate);
        h.deliver(2, &message);
        assert!(h.committed[2].is_empty());
        assert_eq!(h.nodes[2].stats().rejected_messages, 1);
    }

    #[traced_test]
    #[test]
    fn test_equivocating_leader_cannot_commit_on_claimed_acceptors() {
        let mut h = Harness::new(4);

        // Node-0's own accept plus two "accepts" it signed in others' names.
        let own = h.accept(0, 0, 0, 1, b"value-A");
        let mut posing_as_1 = own.clone();
        posing_as_1.sender_id = h.fixture.ids[1].clone();
        let mut posing_as_2 = own.clone();
        posing_as_2.sender_id = h.fixture.ids[2].clone();
        let commit_a = h.commit(0, 0, 1, b"value-A", vec![own, posing_as_1, posing_as_2]);
        let commit_b = h.commit(0, 0, 1, b"value-B", vec![h.accept(0, 0, 0, 1, b"value-B")]);

        h.deliver(1, &commit_a);
        h.deliver(2, &commit_b);

        for i in [1, 2] {
            assert!(h.committed[i].is_empty(), "node {i} committed");
            assert_eq!(h.nodes[i].last_committed(), SequenceNumber::GENESIS);
            assert_eq!(h.nodes[i].stats().rejected_messages, 1);
            assert!(h.reputations[i].reputation(&h.fixture.ids[0]) < 1.0);
        }
        h.assert_agreement();
    }

    #[traced_test]
    #[test]
    fn test_certified_commit_reaches_node_that_missed_the_round() {
        let mut h = Harness::new(4);
        h.silent.insert(3);
        h.propose(0, b"op", 1);
        assert!(matches!(h.result_for(1), Some(Ok(_))));
        assert!(h.committed[3].is_empty());
        h.silent.clear();

        let certificate = (0..3).map(|i| h.accept(i, 0, 0, 1, b"op")).collect();
        let commit = h.commit(0, 0, 1, b"op", certificate);
        h.deliver(3, &commit);

        assert_eq!(h.committed[3].len(), 1);
        assert_eq!(h.committed[3][0].payload, b"op".to_vec());
        h.assert_agreement();
    }

    #[traced_test]
    #[test]
    fn test_conflicting_commit_keeps_first_value() {
        let mut h = Harness::new(4);
        h.propose(0, b"first", 1);
        assert_eq!(h.nodes[3].last_committed(), SequenceNumber(1));

        let certificate = (0..3).map(|i| h.accept(i, 0, 0, 1, b"second")).collect();
        let message = h.commit(0, 0, 1, b"second", certificate);
        let before = h.reputations[3].reputation(&h.fixture.ids[0]);
        h.deliver(3, &message);

        let log = h.nodes[3].committed_log();
        assert_eq!(log.len(), 1);
        assert_eq!(
            log.get(SequenceNumber(1)).map(|p| p.payload.clone()),
            Some(b"first".to_vec())
        );
        assert!(h.reputations[3].reputation(&h.fixture.ids[0]) < before);
    }

    #[traced_test]
    #[test]
    fn test_stale_view_message_dropped() {
        let mut h = Harness::new(4);
        h.silent.insert(0);
        let leader = h.fixture.ids[0].clone();
        h.run(1, Event::LeaderSuspected { leader: leader.clone() });
        h.run(2, Event::LeaderSuspected { leader });
        h.silent.clear();
        assert_eq!(h.nodes[3].view(), ViewNumber(1));

        let payload = b"late".to_vec();
        let digest = Hash::from_bytes(&payload);
        let message = h.fixture.signed(
            0,
            ViewNumber(0),
            SequenceNumber(1),
            Payload::Prepare(PreparePayload {
                proposal_id: ProposalId::derive(
                    &h.fixture.ids[0],
                    ViewNumber(0),
                    SequenceNumber(1),
                    &digest,
                ),
                payload,
                digest,
                priority: 0,
            }),
            0,
        );
        let before = h.reputations[3].observation_count(&h.fixture.ids[0]);
        h.run(3, Event::MessageReceived { message });
        assert_eq!(h.nodes[3].view(), ViewNumber(1));
        assert_eq!(
            h.reputations[3].observation_count(&h.fixture.ids[0]),
            before + 1
        );
    }

    #[traced_test]
    #[test]
    fn test_duplicate_prepare_after_commit_is_idempotent() {
        let mut h = Harness::new(4);
        h.propose(0, b"once", 1);
        let proposal = h.committed[1][0].clone();

        let message = h.fixture.signed(
            0,
            ViewNumber(0),
            SequenceNumber(1),
            Payload::Prepare(PreparePayload {
                proposal_id: proposal.proposal_id,
                payload: proposal.payload.clone(),
                digest: proposal.digest,
                priority: 0,
            }),
            0,
        );
        h.run(1, Event::MessageReceived { message });
        assert_eq!(h.committed[1].len(), 1);
        assert_eq!(h.nodes[1].committed_log().len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_view_jump_without_vote_quorum_is_ignored() {
        let mut h = Harness::new(4);

        // Nodes 1 and 3 accept value-A from node-0; with node-0 that is a quorum.
        let prepare_a = h.prepare(0, 0, 1, b"value-A");
        let accept_a = h.accept(0, 0, 0, 1, b"value-A");
        for i in [1, 3] {
            h.deliver(i, &prepare_a);
            h.deliver(i, &accept_a);
        }

        // Node-2 leads view 2 by rotation and tries to skip the view change.
        assert_eq!(
            h.nodes[1].membership.leader_for(ViewNumber(2)),
            Some(h.fixture.ids[2].clone())
        );
        let prepare_b = h.prepare(2, 2, 1, b"value-B");
        let accept_b = h.accept(2, 2, 2, 1, b"value-B");
        let commit_b = h.commit(2, 2, 1, b"value-B", vec![accept_b.clone()]);
        for i in [1, 3] {
            h.deliver(i, &prepare_b);
            h.deliver(i, &accept_b);
            h.deliver(i, &commit_b);
        }
        for i in [1, 3] {
            assert_eq!(h.nodes[i].view(), ViewNumber(0), "node {i} view");
            assert!(h.committed[i].is_empty(), "node {i} committed");
        }

        // A voted view change carries value-A into view 1.
        for i in [1, 3] {
            h.run(
                i,
                Event::PhaseTimeout {
                    sequence: SequenceNumber(1),
                },
            );
        }
        for i in 0..4 {
            assert_eq!(h.nodes[i].view(), ViewNumber(1), "node {i} view");
            assert_eq!(h.committed[i].len(), 1, "node {i} committed");
            assert_eq!(h.committed[i][0].payload, b"value-A".to_vec());
        }
        h.assert_agreement();
    }

    #[traced_test]
    #[test]
    fn test_new_view_certificate_brings_lagging_node_along() {
        let mut h = Harness::new(4);
        h.silent.extend([0, 3]);
        let leader = h.fixture.ids[0].clone();
        h.run(1, Event::LeaderSuspected { leader: leader.clone() });
        h.run(2, Event::LeaderSuspected { leader });
        // Two votes are short of the quorum of three.
        assert_eq!(h.nodes[1].view(), ViewNumber(0));

        h.silent.remove(&3);
        h.run(3, Event::LeaderSuspected { leader: h.fixture.ids[0].clone() });
        for i in 1..4 {
            assert_eq!(h.nodes[i].view(), ViewNumber(1), "node {i} view");
        }

        // Node-0 missed every vote; a member answers its stale vote with the certificate.
        h.silent.remove(&0);
        assert_eq!(h.nodes[0].view(), ViewNumber(0));
        h.run(0, Event::LeaderSuspected { leader: h.fixture.ids[0].clone() });
        assert_eq!(h.nodes[0].view(), ViewNumber(1));
        assert_eq!(h.nodes[0].leader(), Some(h.fixture.ids[1].clone()));

        h.propose(1, b"together", 4);
        assert!(matches!(h.result_for(4), Some(Ok(_))));
        for i in 0..4 {
            assert_eq!(h.nodes[i].last_committed(), SequenceNumber(1), "node {i}");
        }
        h.assert_agreement();
    }

    #[traced_test]
    #[test]
    fn test_new_view_without_quorum_rejected() {
        let mut h = Harness::new(4);
        let vote = h.fixture.signed(
            2,
            ViewNumber(0),
            SequenceNumber::GENESIS,
            Payload::ViewChange(ViewChangePayload {
                new_view: ViewNumber(1),
                last_committed: SequenceNumber::GENESIS,
                highest_accepted: None,
            }),
            0,
        );
        let new_view = h.fixture.signed(
            2,
            ViewNumber(1),
            SequenceNumber::GENESIS,
            Payload::NewView {
                votes: vec![vote.clone(), vote],
            },
            0,
        );
        h.deliver(3, &new_view);
        assert_eq!(h.nodes[3].view(), ViewNumber(0));
        assert!(h.reputations[3].reputation(&h.fixture.ids[2]) < 1.0);
    }

    #[traced_test]
    #[test]
    fn test_prepare_outside_sequence_window_rejected() {
        let mut h = Harness::new(4);
        let top = u64::MAX;
        let prepare = h.prepare(0, 0, top, b"far");
        let accept = h.accept(0, 0, 0, top, b"far");
        let commit = h.commit(0, 0, top, b"far", vec![accept.clone()]);
        h.silent.insert(0);
        for i in 1..4 {
            h.deliver(i, &prepare);
            h.deliver(i, &accept);
            h.deliver(i, &commit);
        }
        for i in 1..4 {
            assert_eq!(h.nodes[i].last_committed(), SequenceNumber::GENESIS);
            assert!(h.timers[i].is_empty(), "node {i} promised");
            assert!(h.reputations[i].reputation(&h.fixture.ids[0]) < 1.0);
        }

        // The next leader numbers from the real log.
        let leader = h.fixture.ids[0].clone();
        h.run(1, Event::LeaderSuspected { leader: leader.clone() });
        h.run(2, Event::LeaderSuspected { leader });
        h.propose(1, b"next", 5);
        assert!(matches!(h.result_for(5), Some(Ok(_))));
        for i in 1..4 {
            assert_eq!(h.nodes[i].last_committed(), SequenceNumber(1));
        }
        h.assert_agreement();
    }
}
