//! Established calls between two participants.

use common::types::{CallId, ParticipantId};
use std::collections::HashMap;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ActiveCall {
    pub id: CallId,
    pub members: [ParticipantId; 2],
    pub initiator: ParticipantId,
    pub topic: String,
    pub established_at: Instant,
}

impl ActiveCall {
    #[must_use]
    pub fn partner_of(&self, participant_id: ParticipantId) -> Option<ParticipantId> {
        let [a, b] = self.members;
        if a == participant_id {
            Some(b)
        } else if b == participant_id {
            Some(a)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct CallTable {
    calls: HashMap<CallId, ActiveCall>,
    by_participant: HashMap<ParticipantId, CallId>,
}

impl CallTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        initiator: ParticipantId,
        responder: ParticipantId,
        topic: String,
        now: Instant,
    ) -> CallId {
        let id = CallId::new();
        self.by_participant.insert(initiator, id);
        self.by_participant.insert(responder, id);
        self.calls.insert(
            id,
            ActiveCall {
                id,
                members: [initiator, responder],
                initiator,
                topic,
                established_at: now,
            },
        );
        id
    }

    #[must_use]
    pub fn call_of(&self, participant_id: ParticipantId) -> Option<&ActiveCall> {
        let call_id = self.by_participant.get(&participant_id)?;
        self.calls.get(call_id)
    }

    #[must_use]
    pub fn partner_of(&self, participant_id: ParticipantId) -> Option<ParticipantId> {
        self.call_of(participant_id)?.partner_of(participant_id)
    }

    pub fn remove(&mut self, call_id: CallId) -> Option<ActiveCall> {
        let call = self.calls.remove(&call_id)?;
        for member in call.members {
            self.by_participant.remove(&member);
        }
        Some(call)
    }

    pub fn remove_for(&mut self, participant_id: ParticipantId) -> Option<ActiveCall> {
        let call_id = *self.by_participant.get(&participant_id)?;
        self.remove(call_id)
    }

    #[must_use]
    pub fn contains(&self, participant_id: ParticipantId) -> bool {
        self.by_participant.contains_key(&participant_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveCall> {
        self.calls.values()
    }
}
