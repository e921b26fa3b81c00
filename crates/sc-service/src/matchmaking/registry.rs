//! Connection registry: every connected participant and its transient state.

use crate::errors::ScError;
use common::types::ParticipantId;
use std::collections::HashMap;
use tokio::time::Instant;

/// Where a participant currently sits in the matchmaking lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantState {
    Idle,
    Searching,
    PendingMatch,
    InCall,
}

impl ParticipantState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ParticipantState::Idle => "idle",
            ParticipantState::Searching => "searching",
            ParticipantState::PendingMatch => "pending_match",
            ParticipantState::InCall => "in_call",
        }
    }
}

/// A connected participant.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    /// Untrusted, already normalized at the boundary. Never logged.
    pub display_label: String,
    pub state: ParticipantState,
    /// Topic of the most recent `find_match`.
    pub topic: Option<String>,
    pub connected_at: Instant,
    pub state_entered_at: Instant,
}

/// All connected participants, keyed by id.
#[derive(Debug)]
pub struct ConnectionRegistry {
    participants: HashMap<ParticipantId, Participant>,
    max_participants: usize,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(max_participants: usize) -> Self {
        Self {
            participants: HashMap::new(),
            max_participants,
        }
    }

    /// Insert a new idle participant.
    ///
    /// # Errors
    ///
    /// Returns `ScError::CapacityExceeded` when the participant limit is reached.
    pub fn register(
        &mut self,
        display_label: String,
        now: Instant,
    ) -> Result<ParticipantId, ScError> {
        if self.participants.len() >= self.max_participants {
            return Err(ScError::CapacityExceeded);
        }

        let id = ParticipantId::new();
        self.participants.insert(
            id,
            Participant {
                id,
                display_label,
                state: ParticipantState::Idle,
                topic: None,
                connected_at: now,
                state_entered_at: now,
            },
        );
        Ok(id)
    }

    pub fn remove(&mut self, id: ParticipantId) -> Option<Participant> {
        self.participants.remove(&id)
    }

    #[must_use]
    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.contains_key(&id)
    }

    /// Move a participant to `state`. The entry timestamp only changes on a
    /// real transition.
    pub fn set_state(&mut self, id: ParticipantId, state: ParticipantState, now: Instant) {
        if let Some(participant) = self.participants.get_mut(&id) {
            if participant.state != state {
                participant.state = state;
                participant.state_entered_at = now;
            }
        }
    }

    pub fn set_label(&mut self, id: ParticipantId, display_label: String) {
        if let Some(participant) = self.participants.get_mut(&id) {
            participant.display_label = display_label;
        }
    }

    pub fn set_topic(&mut self, id: ParticipantId, topic: String) {
        if let Some(participant) = self.participants.get_mut(&id) {
            participant.topic = Some(topic);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }
}
