//! Matchmaking core.
//!
//! [`Matchmaker`] owns the connection registry, the waiting queue, the
//! negotiation table and the call table. It is synchronous and does no I/O:
//! every operation takes the current instant and returns the events to
//! deliver as [`Outbound`] values. The matchmaker actor is its only owner,
//! so each operation runs as one critical section.
//!
//! # Exclusive membership
//!
//! A participant is in at most one of {queue, pending match, active call},
//! and its recorded [`ParticipantState`] always names that membership.
//! [`Matchmaker::verify_invariants`] checks this.

pub mod calls;
pub mod negotiation;
pub mod queue;
pub mod registry;
mod relay;
mod supervisor;

pub use calls::{ActiveCall, CallTable};
pub use negotiation::{AcceptOutcome, Decision, NegotiationTable, PendingMatch, Resolution};
pub use queue::{MatchQueue, WaitingEntry};
pub use registry::{ConnectionRegistry, Participant, ParticipantState};
pub use supervisor::Departure;

use crate::errors::ScError;
use crate::observability::metrics;
use crate::protocol::{RejectReason, Request, ServerMessage};
use common::types::ParticipantId;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// What happens to the other side when a proposal ends without a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RejectPolicy {
    /// The partner goes back to its original queue position.
    #[default]
    RequeuePartner,
    /// Both sides return to idle.
    IdleBoth,
}

impl RejectPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RejectPolicy::RequeuePartner => "requeue_partner",
            RejectPolicy::IdleBoth => "idle_both",
        }
    }
}

impl FromStr for RejectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "requeue_partner" => Ok(RejectPolicy::RequeuePartner),
            "idle_both" => Ok(RejectPolicy::IdleBoth),
            other => Err(format!(
                "unknown policy {other:?} (expected requeue_partner or idle_both)"
            )),
        }
    }
}

/// Tunables for the matchmaking core.
#[derive(Debug, Clone)]
pub struct MatchPolicy {
    pub proposal_timeout: Duration,
    pub reject_policy: RejectPolicy,
    pub max_participants: usize,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            proposal_timeout: Duration::from_secs(crate::config::DEFAULT_PROPOSAL_TIMEOUT_SECONDS),
            reject_policy: RejectPolicy::default(),
            max_participants: crate::config::DEFAULT_MAX_PARTICIPANTS,
        }
    }
}

/// An event addressed to one participant.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: ParticipantId,
    pub message: ServerMessage,
}

impl Outbound {
    #[must_use]
    pub fn new(to: ParticipantId, message: ServerMessage) -> Self {
        Self { to, message }
    }
}

/// Population counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchmakerStatus {
    pub participants: usize,
    pub waiting: usize,
    pub pending_matches: usize,
    pub active_calls: usize,
}

#[derive(Debug)]
pub struct Matchmaker {
    policy: MatchPolicy,
    registry: ConnectionRegistry,
    queue: MatchQueue,
    negotiations: NegotiationTable,
    calls: CallTable,
}

impl Matchmaker {
    #[must_use]
    pub fn new(policy: MatchPolicy) -> Self {
        Self {
            registry: ConnectionRegistry::new(policy.max_participants),
            queue: MatchQueue::new(),
            negotiations: NegotiationTable::new(),
            calls: CallTable::new(),
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// Add a participant and greet it with its id.
    ///
    /// # Errors
    ///
    /// Returns `ScError::CapacityExceeded` at the participant limit.
    pub fn register(
        &mut self,
        display_label: String,
        now: Instant,
    ) -> Result<(ParticipantId, Vec<Outbound>), ScError> {
        let id = self.registry.register(display_label, now)?;
        debug!(target: "sc.matchmaking", participant_id = %id, "Participant registered");
        Ok((
            id,
            vec![Outbound::new(
                id,
                ServerMessage::Connected { participant_id: id },
            )],
        ))
    }

    /// Unwind everything the participant is part of, then remove it.
    ///
    /// # Errors
    ///
    /// Returns `ScError::ParticipantNotFound` for an unknown id.
    pub fn unregister(
        &mut self,
        id: ParticipantId,
        now: Instant,
    ) -> Result<Vec<Outbound>, ScError> {
        let participant = self.lookup(id)?;
        let (last_state, in_state) = (
            participant.state,
            now.saturating_duration_since(participant.state_entered_at),
        );
        let out = self.cleanup(id, Departure::Disconnected, now);
        self.registry.remove(id);
        debug!(
            target: "sc.matchmaking",
            participant_id = %id,
            last_state = last_state.as_str(),
            in_state_ms = u64::try_from(in_state.as_millis()).unwrap_or(u64::MAX),
            "Participant unregistered"
        );
        Ok(out)
    }

    /// # Errors
    ///
    /// Returns `ScError::ParticipantNotFound` for an unknown id.
    pub fn lookup(&self, id: ParticipantId) -> Result<&Participant, ScError> {
        self.registry
            .get(id)
            .ok_or_else(|| ScError::ParticipantNotFound(id.to_string()))
    }

    /// Dispatch a normalized client request.
    ///
    /// # Errors
    ///
    /// Propagates the error of the underlying operation.
    pub fn handle(
        &mut self,
        id: ParticipantId,
        request: Request,
        now: Instant,
    ) -> Result<Vec<Outbound>, ScError> {
        match request {
            Request::FindMatch {
                topic,
                display_label,
            } => self.find_match(id, topic, display_label, now),
            Request::Accept => self.accept(id, now),
            Request::Reject => self.reject(id, now),
            Request::CancelSearch => self.cancel_search(id, now),
            Request::Leave => self.leave(id, now),
            Request::Relay { kind, payload } => self.relay(id, kind, payload, now),
        }
    }

    /// Join the waiting pool for `topic` and pair immediately if possible.
    ///
    /// # Errors
    ///
    /// Returns `ScError::DuplicateRequest` unless the participant is idle.
    pub fn find_match(
        &mut self,
        id: ParticipantId,
        topic: String,
        display_label: Option<String>,
        now: Instant,
    ) -> Result<Vec<Outbound>, ScError> {
        match self.lookup(id)?.state {
            ParticipantState::Idle => {}
            ParticipantState::Searching => {
                return Err(ScError::DuplicateRequest(
                    "Already searching for a match".to_string(),
                ))
            }
            ParticipantState::PendingMatch => {
                return Err(ScError::DuplicateRequest(
                    "A match proposal is already pending".to_string(),
                ))
            }
            ParticipantState::InCall => {
                return Err(ScError::DuplicateRequest("Already in a call".to_string()))
            }
        }

        if let Some(label) = display_label {
            self.registry.set_label(id, label);
        }
        self.registry.set_topic(id, topic.clone());
        self.queue.enqueue(id, topic.clone(), now)?;
        self.registry.set_state(id, ParticipantState::Searching, now);

        debug!(
            target: "sc.matchmaking",
            participant_id = %id,
            topic_len = topic.len(),
            "Participant searching"
        );

        match self.pair(&topic, id, now) {
            Some(out) => Ok(out),
            None => Ok(vec![Outbound::new(id, ServerMessage::Waiting { topic })]),
        }
    }

    /// Leave the waiting pool. Only a waiting participant is acknowledged.
    ///
    /// # Errors
    ///
    /// Returns `ScError::ParticipantNotFound` for an unknown id.
    pub fn cancel_search(
        &mut self,
        id: ParticipantId,
        now: Instant,
    ) -> Result<Vec<Outbound>, ScError> {
        self.lookup(id)?;
        if self.queue.dequeue(id).is_none() {
            return Ok(Vec::new());
        }
        self.registry.set_state(id, ParticipantState::Idle, now);
        Ok(vec![Outbound::new(id, ServerMessage::SearchCancelled)])
    }

    /// Accept the caller's pending proposal.
    ///
    /// # Errors
    ///
    /// Returns `ScError::ProtocolViolation` when there is no pending proposal.
    pub fn accept(&mut self, id: ParticipantId, now: Instant) -> Result<Vec<Outbound>, ScError> {
        self.lookup(id)?;
        match self.negotiations.accept(id) {
            None => Err(ScError::ProtocolViolation(
                "No pending match to accept".to_string(),
            )),
            Some(AcceptOutcome::AwaitingPartner) => {
                debug!(target: "sc.matchmaking", participant_id = %id, "Match accepted, awaiting partner");
                Ok(Vec::new())
            }
            Some(AcceptOutcome::AlreadyDecided) => Ok(Vec::new()),
            Some(AcceptOutcome::MutuallyAccepted(pending)) => Ok(self.establish(pending, now)),
        }
    }

    /// Decline the caller's pending proposal.
    ///
    /// # Errors
    ///
    /// Returns `ScError::ProtocolViolation` when there is no pending proposal.
    pub fn reject(&mut self, id: ParticipantId, now: Instant) -> Result<Vec<Outbound>, ScError> {
        self.lookup(id)?;
        if !self.negotiations.contains(id) {
            return Err(ScError::ProtocolViolation(
                "No pending match to reject".to_string(),
            ));
        }
        match self.negotiations.decide_reject(id) {
            Some(pending) => Ok(self.resolve_failed(pending, Resolution::Rejected { by: id }, now)),
            None => Ok(Vec::new()),
        }
    }

    /// Resolve every proposal whose decision window has closed.
    pub fn expire_proposals(&mut self, now: Instant) -> Vec<Outbound> {
        let mut out = Vec::new();
        for match_id in self.negotiations.expired(now) {
            if let Some(pending) = self.negotiations.remove(match_id) {
                info!(target: "sc.matchmaking", match_id = %pending.id, "Match proposal timed out");
                out.extend(self.resolve_failed(
                    pending,
                    Resolution::Abandoned { by: None },
                    now,
                ));
            }
        }
        out
    }

    #[must_use]
    pub fn status(&self) -> MatchmakerStatus {
        MatchmakerStatus {
            participants: self.registry.len(),
            waiting: self.queue.len(),
            pending_matches: self.negotiations.len(),
            active_calls: self.calls.len(),
        }
    }

    /// Partner of `id` in a call, if any.
    #[must_use]
    pub fn call_partner(&self, id: ParticipantId) -> Option<ParticipantId> {
        self.calls.partner_of(id)
    }

    /// Check exclusive membership and cross-structure consistency.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation found.
    pub fn verify_invariants(&self) -> Result<(), String> {
        for participant in self.registry.iter() {
            let id = participant.id;
            let memberships = [
                (self.queue.contains(id), ParticipantState::Searching),
                (self.negotiations.contains(id), ParticipantState::PendingMatch),
                (self.calls.contains(id), ParticipantState::InCall),
            ];
            let held: Vec<ParticipantState> = memberships
                .iter()
                .filter(|(member, _)| *member)
                .map(|(_, state)| *state)
                .collect();

            let expected = match held.as_slice() {
                [] => ParticipantState::Idle,
                [state] => *state,
                _ => return Err(format!("{id} is in several structures: {held:?}")),
            };
            if participant.state != expected {
                return Err(format!(
                    "{id} recorded as {} but membership says {}",
                    participant.state.as_str(),
                    expected.as_str()
                ));
            }
        }

        for entry in self.queue.entries() {
            if !self.registry.contains(entry.participant_id) {
                return Err(format!("queue holds unknown {}", entry.participant_id));
            }
            if self.queue.topic_of(entry.participant_id) != Some(entry.topic.as_str()) {
                return Err(format!("queue index stale for {}", entry.participant_id));
            }
        }

        for pending in self.negotiations.iter() {
            for seat in pending.seats() {
                if !self.registry.contains(seat.participant_id()) {
                    return Err(format!("match {} holds unknown participant", pending.id));
                }
                if self.negotiations.match_of(seat.participant_id()).map(|m| m.id) != Some(pending.id) {
                    return Err(format!("negotiation index stale for match {}", pending.id));
                }
            }
        }

        for call in self.calls.iter() {
            let [a, b] = call.members;
            if a == b {
                return Err(format!("call {} pairs a participant with itself", call.id));
            }
            for member in call.members {
                if !self.registry.contains(member) {
                    return Err(format!("call {} holds unknown participant", call.id));
                }
            }
            if self.calls.partner_of(a) != Some(b) || self.calls.partner_of(b) != Some(a) {
                return Err(format!("call {} membership is not symmetric", call.id));
            }
        }

        Ok(())
    }

    /// Pair `newcomer` on `topic` if a partner is waiting.
    fn pair(&mut self, topic: &str, newcomer: ParticipantId, now: Instant) -> Option<Vec<Outbound>> {
        let (first, second) = self.queue.try_pair(topic, newcomer)?;
        Some(self.propose(first, second, now))
    }

    /// Open a proposal between two dequeued entries. `first` waited longer.
    fn propose(&mut self, first: WaitingEntry, second: WaitingEntry, now: Instant) -> Vec<Outbound> {
        for entry in [&first, &second] {
            metrics::record_queue_wait(now.saturating_duration_since(entry.waiting_since));
            self.registry
                .set_state(entry.participant_id, ParticipantState::PendingMatch, now);
        }

        let pending = self
            .negotiations
            .propose(first, second, now, self.policy.proposal_timeout);
        let (match_id, topic) = (pending.id, pending.topic.clone());
        let a = pending.initiator.participant_id();
        let b = pending.responder.participant_id();

        metrics::record_match_proposal();
        info!(
            target: "sc.matchmaking",
            match_id = %match_id,
            initiator = %a,
            responder = %b,
            "Match proposed"
        );

        let decision_timeout_secs = self.policy.proposal_timeout.as_secs();
        [(a, b), (b, a)]
            .into_iter()
            .map(|(to, partner)| {
                Outbound::new(
                    to,
                    ServerMessage::MatchProposal {
                        match_id,
                        partner_label: self.label_of(partner),
                        topic: topic.clone(),
                        decision_timeout_secs,
                    },
                )
            })
            .collect()
    }

    /// Both sides accepted: open the call.
    fn establish(&mut self, pending: PendingMatch, now: Instant) -> Vec<Outbound> {
        let initiator = pending.initiator.participant_id();
        let responder = pending.responder.participant_id();
        let call_id = self
            .calls
            .insert(initiator, responder, pending.topic.clone(), now);

        for id in [initiator, responder] {
            self.registry.set_state(id, ParticipantState::InCall, now);
        }

        metrics::record_match_outcome("established");
        info!(
            target: "sc.matchmaking",
            match_id = %pending.id,
            call_id = %call_id,
            "Match established"
        );

        vec![
            Outbound::new(
                initiator,
                ServerMessage::MatchEstablished {
                    partner_id: responder,
                    initiator: true,
                    topic: pending.topic.clone(),
                },
            ),
            Outbound::new(
                responder,
                ServerMessage::MatchEstablished {
                    partner_id: initiator,
                    initiator: false,
                    topic: pending.topic,
                },
            ),
        ]
    }

    /// Settle a proposal that ended without a call.
    ///
    /// A participant named in `Abandoned { by }` is left to the caller; it
    /// receives nothing here.
    fn resolve_failed(
        &mut self,
        pending: PendingMatch,
        resolution: Resolution,
        now: Instant,
    ) -> Vec<Outbound> {
        metrics::record_match_outcome(resolution.outcome_label());
        info!(
            target: "sc.matchmaking",
            match_id = %pending.id,
            outcome = resolution.outcome_label(),
            "Match proposal ended"
        );

        let requeue_allowed = self.policy.reject_policy == RejectPolicy::RequeuePartner;
        let mut out = Vec::new();
        let mut requeued = Vec::new();

        for seat in [pending.initiator, pending.responder] {
            let id = seat.participant_id();
            let (reason, requeue) = match resolution {
                Resolution::Rejected { by } if by == id => (RejectReason::Declined, false),
                Resolution::Rejected { .. } => (RejectReason::PartnerDeclined, requeue_allowed),
                Resolution::Abandoned { by: Some(by) } if by == id => continue,
                Resolution::Abandoned { by: Some(_) } => {
                    (RejectReason::PartnerLeft, requeue_allowed)
                }
                Resolution::Abandoned { by: None } => (
                    RejectReason::Timeout,
                    requeue_allowed && seat.decision == Decision::Accepted,
                ),
            };

            let requeued_ok = requeue && self.queue.requeue(seat.entry.clone()).is_ok();
            if requeued_ok {
                self.registry.set_state(id, ParticipantState::Searching, now);
                requeued.push((id, seat.entry.topic));
            } else {
                self.registry.set_state(id, ParticipantState::Idle, now);
            }
            out.push(Outbound::new(
                id,
                ServerMessage::MatchRejected {
                    reason,
                    requeued: requeued_ok,
                },
            ));
        }

        // A requeued participant may find a partner that arrived meanwhile
        for (id, topic) in requeued {
            if let Some(proposals) = self.pair(&topic, id, now) {
                out.extend(proposals);
            }
        }
        out
    }

    fn label_of(&self, id: ParticipantId) -> String {
        self.registry
            .get(id)
            .map(|p| p.display_label.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::protocol::{PeerLeftReason, SignalKind};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;

    fn matchmaker() -> Matchmaker {
        Matchmaker::new(MatchPolicy::default())
    }

    fn join(mm: &mut Matchmaker, label: &str, now: Instant) -> ParticipantId {
        mm.register(label.to_string(), now).unwrap().0
    }

    fn messages_for(out: &[Outbound], id: ParticipantId) -> Vec<&ServerMessage> {
        out.iter().filter(|o| o.to == id).map(|o| &o.message).collect()
    }

    /// Pair `a` and `b` on `topic` and return the proposal events.
    fn propose(
        mm: &mut Matchmaker,
        a: ParticipantId,
        b: ParticipantId,
        topic: &str,
        now: Instant,
    ) -> Vec<Outbound> {
        let out = mm.find_match(a, topic.to_string(), None, now).unwrap();
        assert_eq!(
            out,
            vec![Outbound::new(
                a,
                ServerMessage::Waiting {
                    topic: topic.to_string()
                }
            )]
        );
        mm.find_match(b, topic.to_string(), None, now).unwrap()
    }

    fn in_call(mm: &mut Matchmaker, now: Instant) -> (ParticipantId, ParticipantId) {
        let a = join(mm, "alice", now);
        let b = join(mm, "bob", now);
        propose(mm, a, b, "Politics", now);
        mm.accept(a, now).unwrap();
        mm.accept(b, now).unwrap();
        (a, b)
    }

    #[test]
    fn test_register_greets_participant() {
        let mut mm = matchmaker();
        let (id, out) = mm.register("alice".to_string(), Instant::now()).unwrap();
        assert_eq!(
            out,
            vec![Outbound::new(id, ServerMessage::Connected { participant_id: id })]
        );
        assert_eq!(mm.lookup(id).unwrap().state, ParticipantState::Idle);
    }

    #[test]
    fn test_unknown_participant_is_not_found() {
        let mut mm = matchmaker();
        let ghost = ParticipantId::new();
        let now = Instant::now();

        assert!(matches!(
            mm.unregister(ghost, now),
            Err(ScError::ParticipantNotFound(_))
        ));
        assert!(matches!(
            mm.find_match(ghost, "Tech".to_string(), None, now),
            Err(ScError::ParticipantNotFound(_))
        ));
    }

    #[test]
    fn test_politics_scenario_both_accept() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let a = join(&mut mm, "alice", now);
        let b = join(&mut mm, "bob", now);

        let out = propose(&mut mm, a, b, "Politics", now);
        assert_eq!(out.len(), 2);
        for (to, partner_label) in [(a, "bob"), (b, "alice")] {
            match messages_for(&out, to).as_slice() {
                [ServerMessage::MatchProposal {
                    partner_label: label,
                    topic,
                    decision_timeout_secs,
                    ..
                }] => {
                    assert_eq!(label, partner_label);
                    assert_eq!(topic, "Politics");
                    assert_eq!(*decision_timeout_secs, 30);
                }
                other => panic!("unexpected events for {to}: {other:?}"),
            }
        }
        assert_eq!(mm.lookup(a).unwrap().state, ParticipantState::PendingMatch);

        assert!(mm.accept(a, now).unwrap().is_empty());
        let out = mm.accept(b, now).unwrap();
        assert_eq!(
            out,
            vec![
                Outbound::new(
                    a,
                    ServerMessage::MatchEstablished {
                        partner_id: b,
                        initiator: true,
                        topic: "Politics".to_string()
                    }
                ),
                Outbound::new(
                    b,
                    ServerMessage::MatchEstablished {
                        partner_id: a,
                        initiator: false,
                        topic: "Politics".to_string()
                    }
                ),
            ]
        );
        assert_eq!(mm.call_partner(a), Some(b));
        assert_eq!(mm.call_partner(b), Some(a));
        mm.verify_invariants().unwrap();
    }

    #[test]
    fn test_accept_order_does_not_matter() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let a = join(&mut mm, "alice", now);
        let b = join(&mut mm, "bob", now);
        propose(&mut mm, a, b, "Politics", now);

        assert!(mm.accept(b, now).unwrap().is_empty());
        let out = mm.accept(a, now).unwrap();

        // Initiator is still the longer waiter
        assert!(out.contains(&Outbound::new(
            a,
            ServerMessage::MatchEstablished {
                partner_id: b,
                initiator: true,
                topic: "Politics".to_string()
            }
        )));
        assert_eq!(mm.status().active_calls, 1);
    }

    #[test]
    fn test_double_accept_equals_single_accept() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let a = join(&mut mm, "alice", now);
        let b = join(&mut mm, "bob", now);
        propose(&mut mm, a, b, "Politics", now);

        assert!(mm.accept(a, now).unwrap().is_empty());
        assert!(mm.accept(a, now).unwrap().is_empty());
        assert_eq!(mm.status().pending_matches, 1);
        assert_eq!(mm.status().active_calls, 0);

        assert_eq!(mm.accept(b, now).unwrap().len(), 2);
        assert_eq!(mm.status().active_calls, 1);
    }

    #[test]
    fn test_accept_without_proposal_is_protocol_violation() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let a = join(&mut mm, "alice", now);

        assert!(matches!(
            mm.accept(a, now),
            Err(ScError::ProtocolViolation(_))
        ));
        assert!(matches!(
            mm.reject(a, now),
            Err(ScError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_tech_scenario_reject_requeues_partner() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let a = join(&mut mm, "alice", now);
        let b = join(&mut mm, "bob", now);
        propose(&mut mm, a, b, "Tech", now);

        let out = mm.reject(b, now).unwrap();
        assert_eq!(
            messages_for(&out, b),
            vec![&ServerMessage::MatchRejected {
                reason: RejectReason::Declined,
                requeued: false
            }]
        );
        assert_eq!(
            messages_for(&out, a),
            vec![&ServerMessage::MatchRejected {
                reason: RejectReason::PartnerDeclined,
                requeued: true
            }]
        );

        assert_eq!(mm.lookup(a).unwrap().state, ParticipantState::Searching);
        assert_eq!(mm.queue.topic_of(a), Some("Tech"));
        assert_eq!(mm.lookup(b).unwrap().state, ParticipantState::Idle);

        // Accepting after the match is gone is reported, not fatal
        assert!(matches!(
            mm.accept(a, now),
            Err(ScError::ProtocolViolation(_))
        ));
        mm.verify_invariants().unwrap();
    }

    #[test]
    fn test_requeued_partner_keeps_queue_position() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let a = join(&mut mm, "alice", now);
        let b = join(&mut mm, "bob", now);
        propose(&mut mm, a, b, "Tech", now);
        let original_seq = mm.negotiations.match_of(a).unwrap().initiator.entry.seq;

        mm.reject(b, now).unwrap();

        let entry = mm.queue.entries().next().unwrap();
        assert_eq!(entry.participant_id, a);
        assert_eq!(entry.seq, original_seq);
    }

    #[test]
    fn test_requeued_partner_pairs_with_later_arrival() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let a = join(&mut mm, "alice", now);
        let b = join(&mut mm, "bob", now);
        let c = join(&mut mm, "carol", now);
        propose(&mut mm, a, b, "Tech", now);

        // c waits while a and b negotiate
        mm.find_match(c, "Tech".to_string(), None, now).unwrap();

        let out = mm.reject(b, now).unwrap();
        assert!(matches!(
            messages_for(&out, a).as_slice(),
            [
                ServerMessage::MatchRejected { requeued: true, .. },
                ServerMessage::MatchProposal { .. }
            ]
        ));
        assert!(matches!(
            messages_for(&out, c).as_slice(),
            [ServerMessage::MatchProposal { .. }]
        ));
        // a waited longer than c, so a initiates
        assert_eq!(
            mm.negotiations.match_of(c).unwrap().initiator.participant_id(),
            a
        );
        mm.verify_invariants().unwrap();
    }

    #[test]
    fn test_idle_both_policy_requeues_nobody() {
        let mut mm = Matchmaker::new(MatchPolicy {
            reject_policy: RejectPolicy::IdleBoth,
            ..MatchPolicy::default()
        });
        let now = Instant::now();
        let a = join(&mut mm, "alice", now);
        let b = join(&mut mm, "bob", now);
        propose(&mut mm, a, b, "Tech", now);

        let out = mm.reject(b, now).unwrap();
        assert_eq!(
            messages_for(&out, a),
            vec![&ServerMessage::MatchRejected {
                reason: RejectReason::PartnerDeclined,
                requeued: false
            }]
        );
        assert_eq!(mm.lookup(a).unwrap().state, ParticipantState::Idle);
        assert!(mm.queue.is_empty());
    }

    #[test]
    fn test_reject_after_accept_is_noop() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let a = join(&mut mm, "alice", now);
        let b = join(&mut mm, "bob", now);
        propose(&mut mm, a, b, "Tech", now);

        mm.accept(a, now).unwrap();
        assert!(mm.reject(a, now).unwrap().is_empty());
        assert_eq!(mm.status().pending_matches, 1);
    }

    #[test]
    fn test_duplicate_find_match_in_call_keeps_call() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let (a, b) = in_call(&mut mm, now);

        let result = mm.find_match(a, "Politics".to_string(), None, now);
        assert!(matches!(result, Err(ScError::DuplicateRequest(_))));
        assert_eq!(mm.call_partner(a), Some(b));
        assert_eq!(mm.lookup(a).unwrap().state, ParticipantState::InCall);
        mm.verify_invariants().unwrap();
    }

    #[test]
    fn test_duplicate_find_match_while_waiting() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let a = join(&mut mm, "alice", now);
        mm.find_match(a, "Tech".to_string(), None, now).unwrap();

        let result = mm.find_match(a, "Politics".to_string(), None, now);
        assert!(matches!(result, Err(ScError::DuplicateRequest(_))));
        assert_eq!(mm.queue.topic_of(a), Some("Tech"));
    }

    #[test]
    fn test_find_match_updates_label() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let a = join(&mut mm, "Anonymous", now);
        let b = join(&mut mm, "bob", now);
        mm.find_match(a, "Tech".to_string(), Some("alice".to_string()), now)
            .unwrap();
        let out = mm.find_match(b, "Tech".to_string(), None, now).unwrap();

        assert!(matches!(
            messages_for(&out, b).as_slice(),
            [ServerMessage::MatchProposal { partner_label, .. }] if partner_label == "alice"
        ));
        assert_eq!(mm.lookup(a).unwrap().topic.as_deref(), Some("Tech"));
    }

    #[test]
    fn test_cancel_search() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let a = join(&mut mm, "alice", now);

        // Idle: nothing to cancel
        assert!(mm.cancel_search(a, now).unwrap().is_empty());

        mm.find_match(a, "Tech".to_string(), None, now).unwrap();
        assert_eq!(
            mm.cancel_search(a, now).unwrap(),
            vec![Outbound::new(a, ServerMessage::SearchCancelled)]
        );
        assert_eq!(mm.lookup(a).unwrap().state, ParticipantState::Idle);
        assert!(mm.queue.is_empty());
    }

    #[test]
    fn test_cancel_search_while_pending_is_noop() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let a = join(&mut mm, "alice", now);
        let b = join(&mut mm, "bob", now);
        propose(&mut mm, a, b, "Tech", now);

        assert!(mm.cancel_search(a, now).unwrap().is_empty());
        assert_eq!(mm.lookup(a).unwrap().state, ParticipantState::PendingMatch);
    }

    #[test]
    fn test_timeout_requeues_only_accepted_side() {
        let mut mm = matchmaker();
        let t0 = Instant::now();
        let a = join(&mut mm, "alice", t0);
        let b = join(&mut mm, "bob", t0);
        propose(&mut mm, a, b, "Tech", t0);
        mm.accept(b, t0).unwrap();

        assert!(mm.expire_proposals(t0 + Duration::from_secs(29)).is_empty());

        let out = mm.expire_proposals(t0 + Duration::from_secs(30));
        assert_eq!(
            messages_for(&out, a),
            vec![&ServerMessage::MatchRejected {
                reason: RejectReason::Timeout,
                requeued: false
            }]
        );
        assert_eq!(
            messages_for(&out, b),
            vec![&ServerMessage::MatchRejected {
                reason: RejectReason::Timeout,
                requeued: true
            }]
        );
        assert_eq!(mm.lookup(a).unwrap().state, ParticipantState::Idle);
        assert_eq!(mm.lookup(b).unwrap().state, ParticipantState::Searching);
        mm.verify_invariants().unwrap();
    }

    #[test]
    fn test_disconnect_in_call_notifies_partner_once() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let (a, b) = in_call(&mut mm, now);

        let out = mm.unregister(a, now).unwrap();
        assert_eq!(
            out,
            vec![Outbound::new(
                b,
                ServerMessage::PeerLeft {
                    reason: PeerLeftReason::Disconnected
                }
            )]
        );
        assert_eq!(mm.lookup(b).unwrap().state, ParticipantState::Idle);
        assert!(mm.call_partner(b).is_none());
        assert!(mm.lookup(a).is_err());
        mm.verify_invariants().unwrap();
    }

    #[test]
    fn test_leave_call_acknowledges_leaver() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let (a, b) = in_call(&mut mm, now);

        let out = mm.leave(b, now).unwrap();
        assert_eq!(
            out,
            vec![
                Outbound::new(
                    a,
                    ServerMessage::PeerLeft {
                        reason: PeerLeftReason::Left
                    }
                ),
                Outbound::new(b, ServerMessage::LeftCall),
            ]
        );
        // Both may search again
        assert!(mm.find_match(a, "Tech".to_string(), None, now).is_ok());
        assert!(mm.find_match(b, "Tech".to_string(), None, now).is_ok());
    }

    #[test]
    fn test_disconnect_while_pending_requeues_survivor() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let a = join(&mut mm, "alice", now);
        let b = join(&mut mm, "bob", now);
        propose(&mut mm, a, b, "Tech", now);

        let out = mm.unregister(a, now).unwrap();
        assert_eq!(
            out,
            vec![Outbound::new(
                b,
                ServerMessage::MatchRejected {
                    reason: RejectReason::PartnerLeft,
                    requeued: true
                }
            )]
        );
        assert_eq!(mm.lookup(b).unwrap().state, ParticipantState::Searching);
        mm.verify_invariants().unwrap();
    }

    #[test]
    fn test_relay_reaches_only_partner() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let (a, b) = in_call(&mut mm, now);
        let (c, d) = in_call(&mut mm, now);

        let payload = json!({"sdp": "v=0"});
        let out = mm
            .relay(a, SignalKind::Offer, payload.clone(), now)
            .unwrap();
        assert_eq!(
            out,
            vec![Outbound::new(
                b,
                ServerMessage::Offer { payload, sender: a }
            )]
        );
        assert!(out.iter().all(|o| o.to != c && o.to != d));
    }

    #[test]
    fn test_relay_without_call_is_protocol_violation() {
        let mut mm = matchmaker();
        let now = Instant::now();
        let a = join(&mut mm, "alice", now);

        let result = mm.relay(a, SignalKind::IceCandidate, json!({}), now);
        assert!(matches!(result, Err(ScError::ProtocolViolation(_))));
    }

    #[test]
    fn test_reject_policy_parsing() {
        assert_eq!(
            "requeue_partner".parse::<RejectPolicy>().unwrap(),
            RejectPolicy::RequeuePartner
        );
        assert_eq!(
            " idle_both ".parse::<RejectPolicy>().unwrap(),
            RejectPolicy::IdleBoth
        );
        assert!("requeue_rejecter".parse::<RejectPolicy>().is_err());
        assert_eq!(RejectPolicy::IdleBoth.as_str(), "idle_both");
    }

    #[test]
    fn test_two_waiters_always_pair_in_one_pass() {
        let mut mm = matchmaker();
        let now = Instant::now();
        for topic in ["Politics", "Tech", "Sports"] {
            let a = join(&mut mm, "a", now);
            let b = join(&mut mm, "b", now);
            let out = propose(&mut mm, a, b, topic, now);
            assert_eq!(out.len(), 2);
            assert_eq!(mm.queue.waiting_in(topic), 0);
        }
        assert_eq!(mm.status().pending_matches, 3);
    }

    /// Random operation sequences never break exclusive membership.
    #[test]
    fn test_randomized_operations_preserve_invariants() {
        const TOPICS: [&str; 3] = ["Politics", "Tech", "general"];

        for seed in 0..20_u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut mm = Matchmaker::new(MatchPolicy {
                max_participants: 12,
                reject_policy: if seed % 2 == 0 {
                    RejectPolicy::RequeuePartner
                } else {
                    RejectPolicy::IdleBoth
                },
                ..MatchPolicy::default()
            });
            let mut now = Instant::now();
            let mut ids: Vec<ParticipantId> = Vec::new();

            for step in 0..400 {
                now += Duration::from_secs(rng.gen_range(0..4));
                let op = rng.gen_range(0..9);

                if ids.is_empty() || op == 0 {
                    if let Ok((id, _)) = mm.register(format!("p{step}"), now) {
                        ids.push(id);
                    }
                    continue;
                }

                let idx = rng.gen_range(0..ids.len());
                let id = ids[idx];
                let topic = TOPICS[rng.gen_range(0..TOPICS.len())].to_string();

                // Errors are expected for many random calls; only state matters
                let _ = match op {
                    1 | 2 => mm.find_match(id, topic, None, now),
                    3 => mm.accept(id, now),
                    4 => mm.reject(id, now),
                    5 => mm.cancel_search(id, now),
                    6 => mm.leave(id, now),
                    7 => mm.relay(id, SignalKind::Signal, json!(step), now),
                    _ => {
                        ids.swap_remove(idx);
                        mm.unregister(id, now)
                    }
                };
                mm.expire_proposals(now);

                if let Err(violation) = mm.verify_invariants() {
                    panic!("seed {seed} step {step} op {op}: {violation}");
                }
            }
        }
    }
}
