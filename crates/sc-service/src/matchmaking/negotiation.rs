//! Match negotiation: a proposed pair waiting for both sides to decide.

use super::queue::WaitingEntry;
use common::types::{MatchId, ParticipantId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Undecided,
    Accepted,
    Rejected,
}

/// One side of a proposal. Keeps the original queue entry so the participant
/// can be requeued at the same position.
#[derive(Debug, Clone)]
pub struct Seat {
    pub entry: WaitingEntry,
    pub decision: Decision,
}

impl Seat {
    #[must_use]
    pub fn participant_id(&self) -> ParticipantId {
        self.entry.participant_id
    }
}

#[derive(Debug, Clone)]
pub struct PendingMatch {
    pub id: MatchId,
    pub topic: String,
    /// The longer-waiting side.
    pub initiator: Seat,
    pub responder: Seat,
    pub deadline: Instant,
}

impl PendingMatch {
    #[must_use]
    pub fn seat(&self, participant_id: ParticipantId) -> Option<&Seat> {
        self.seats()
            .into_iter()
            .find(|seat| seat.participant_id() == participant_id)
    }

    fn seat_mut(&mut self, participant_id: ParticipantId) -> Option<&mut Seat> {
        if self.initiator.participant_id() == participant_id {
            Some(&mut self.initiator)
        } else if self.responder.participant_id() == participant_id {
            Some(&mut self.responder)
        } else {
            None
        }
    }

    #[must_use]
    pub fn seats(&self) -> [&Seat; 2] {
        [&self.initiator, &self.responder]
    }

    #[must_use]
    pub fn partner_of(&self, participant_id: ParticipantId) -> Option<ParticipantId> {
        if self.initiator.participant_id() == participant_id {
            Some(self.responder.participant_id())
        } else if self.responder.participant_id() == participant_id {
            Some(self.initiator.participant_id())
        } else {
            None
        }
    }

    #[must_use]
    pub fn both_accepted(&self) -> bool {
        self.initiator.decision == Decision::Accepted
            && self.responder.decision == Decision::Accepted
    }
}

/// Result of recording an acceptance.
#[derive(Debug)]
pub enum AcceptOutcome {
    /// Recorded; the other side has not accepted yet.
    AwaitingPartner,
    /// The participant had already decided; nothing changed.
    AlreadyDecided,
    /// Both sides accepted. The match has been removed from the table.
    MutuallyAccepted(PendingMatch),
}

/// How a proposal ended without a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Rejected { by: ParticipantId },
    /// `by` is the participant that left, or `None` when the deadline passed.
    Abandoned { by: Option<ParticipantId> },
}

impl Resolution {
    #[must_use]
    pub const fn outcome_label(self) -> &'static str {
        match self {
            Resolution::Rejected { .. } => "rejected",
            Resolution::Abandoned { by: Some(_) } => "abandoned",
            Resolution::Abandoned { by: None } => "timeout",
        }
    }
}

#[derive(Debug, Default)]
pub struct NegotiationTable {
    matches: HashMap<MatchId, PendingMatch>,
    by_participant: HashMap<ParticipantId, MatchId>,
}

impl NegotiationTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a proposal. `initiator` must be the longer-waiting entry.
    pub fn propose(
        &mut self,
        initiator: WaitingEntry,
        responder: WaitingEntry,
        now: Instant,
        timeout: Duration,
    ) -> &PendingMatch {
        let id = MatchId::new();
        self.by_participant.insert(initiator.participant_id, id);
        self.by_participant.insert(responder.participant_id, id);

        self.matches.entry(id).or_insert(PendingMatch {
            id,
            topic: initiator.topic.clone(),
            initiator: Seat {
                entry: initiator,
                decision: Decision::Undecided,
            },
            responder: Seat {
                entry: responder,
                decision: Decision::Undecided,
            },
            deadline: now + timeout,
        })
    }

    #[must_use]
    pub fn match_of(&self, participant_id: ParticipantId) -> Option<&PendingMatch> {
        let match_id = self.by_participant.get(&participant_id)?;
        self.matches.get(match_id)
    }

    /// Record an acceptance. `None` if the participant has no pending match.
    pub fn accept(&mut self, participant_id: ParticipantId) -> Option<AcceptOutcome> {
        let match_id = *self.by_participant.get(&participant_id)?;
        let pending = self.matches.get_mut(&match_id)?;
        let seat = pending.seat_mut(participant_id)?;

        if seat.decision != Decision::Undecided {
            return Some(AcceptOutcome::AlreadyDecided);
        }
        seat.decision = Decision::Accepted;

        if pending.both_accepted() {
            let established = self.remove(match_id)?;
            Some(AcceptOutcome::MutuallyAccepted(established))
        } else {
            Some(AcceptOutcome::AwaitingPartner)
        }
    }

    /// Record a rejection and remove the match.
    ///
    /// `None` if there is no pending match or the participant already decided.
    pub fn decide_reject(&mut self, participant_id: ParticipantId) -> Option<PendingMatch> {
        let match_id = *self.by_participant.get(&participant_id)?;
        let decided = self
            .matches
            .get(&match_id)?
            .seat(participant_id)
            .is_some_and(|seat| seat.decision != Decision::Undecided);
        if decided {
            return None;
        }

        let mut pending = self.remove(match_id)?;
        if let Some(seat) = pending.seat_mut(participant_id) {
            seat.decision = Decision::Rejected;
        }
        Some(pending)
    }

    pub fn remove(&mut self, match_id: MatchId) -> Option<PendingMatch> {
        let pending = self.matches.remove(&match_id)?;
        for seat in pending.seats() {
            self.by_participant.remove(&seat.participant_id());
        }
        Some(pending)
    }

    pub fn remove_for(&mut self, participant_id: ParticipantId) -> Option<PendingMatch> {
        let match_id = *self.by_participant.get(&participant_id)?;
        self.remove(match_id)
    }

    /// Proposals whose deadline has passed, oldest first.
    #[must_use]
    pub fn expired(&self, now: Instant) -> Vec<MatchId> {
        let mut overdue: Vec<&PendingMatch> = self
            .matches
            .values()
            .filter(|pending| pending.deadline <= now)
            .collect();
        overdue.sort_by_key(|pending| pending.deadline);
        overdue.into_iter().map(|pending| pending.id).collect()
    }

    #[must_use]
    pub fn contains(&self, participant_id: ParticipantId) -> bool {
        self.by_participant.contains_key(&participant_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingMatch> {
        self.matches.values()
    }
}
