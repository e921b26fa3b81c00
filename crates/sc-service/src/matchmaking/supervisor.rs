//! Disconnection and cleanup.
//!
//! Unwinds a participant's queue entry, pending proposal and call, in that
//! order, so that afterwards no structure references it.

use super::{Matchmaker, Outbound, ParticipantState, Resolution};
use crate::errors::ScError;
use crate::protocol::{PeerLeftReason, ServerMessage};
use common::types::ParticipantId;
use tokio::time::Instant;
use tracing::info;

/// Why a participant is being cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// Explicit `leave`; the connection stays open.
    Left,
    /// Connection closed, liveness lost or mailbox undeliverable.
    Disconnected,
}

impl Departure {
    const fn peer_left_reason(self) -> PeerLeftReason {
        match self {
            Departure::Left => PeerLeftReason::Left,
            Departure::Disconnected => PeerLeftReason::Disconnected,
        }
    }
}

impl Matchmaker {
    /// Explicitly leave the current call, proposal or search.
    ///
    /// # Errors
    ///
    /// Returns `ScError::ParticipantNotFound` for an unknown id.
    pub fn leave(&mut self, id: ParticipantId, now: Instant) -> Result<Vec<Outbound>, ScError> {
        self.lookup(id)?;
        Ok(self.cleanup(id, Departure::Left, now))
    }

    /// Remove `id` from every secondary structure and notify whoever was
    /// paired with it. Leaves the participant registered and idle.
    pub(super) fn cleanup(
        &mut self,
        id: ParticipantId,
        departure: Departure,
        now: Instant,
    ) -> Vec<Outbound> {
        let mut out = Vec::new();

        self.queue.dequeue(id);

        if let Some(pending) = self.negotiations.remove_for(id) {
            out.extend(self.resolve_failed(pending, Resolution::Abandoned { by: Some(id) }, now));
        }

        if let Some(call) = self.calls.remove_for(id) {
            info!(
                target: "sc.matchmaking",
                call_id = %call.id,
                participant_id = %id,
                departure = ?departure,
                "Call ended"
            );
            if let Some(partner) = call.partner_of(id) {
                if self.registry.contains(partner) {
                    self.registry
                        .set_state(partner, ParticipantState::Idle, now);
                    out.push(Outbound::new(
                        partner,
                        ServerMessage::PeerLeft {
                            reason: departure.peer_left_reason(),
                        },
                    ));
                }
            }
            if departure == Departure::Left {
                out.push(Outbound::new(id, ServerMessage::LeftCall));
            }
        }

        self.registry.set_state(id, ParticipantState::Idle, now);
        out
    }
}
