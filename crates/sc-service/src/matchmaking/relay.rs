//! Signaling relay between the two members of a call.

use super::{Matchmaker, Outbound, ParticipantState};
use crate::errors::ScError;
use crate::observability::metrics;
use crate::protocol::{PeerLeftReason, ServerMessage, SignalKind};
use common::types::ParticipantId;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

impl Matchmaker {
    /// Forward a negotiation payload, unmodified, to the sender's partner.
    ///
    /// # Errors
    ///
    /// Returns `ScError::ProtocolViolation` when the sender is not in a call.
    pub fn relay(
        &mut self,
        from: ParticipantId,
        kind: SignalKind,
        payload: Value,
        now: Instant,
    ) -> Result<Vec<Outbound>, ScError> {
        self.lookup(from)?;

        let Some(call) = self.calls.call_of(from) else {
            metrics::record_relay_dropped("no_call");
            debug!(
                target: "sc.matchmaking",
                participant_id = %from,
                kind = kind.as_str(),
                "Relay from participant without a call"
            );
            return Err(ScError::ProtocolViolation(
                "Not in a call; signaling message dropped".to_string(),
            ));
        };
        let (call_id, partner) = (call.id, call.partner_of(from));

        match partner.filter(|p| self.registry.contains(*p)) {
            Some(partner) => {
                metrics::record_relay_message(kind.as_str());
                Ok(vec![Outbound::new(
                    partner,
                    ServerMessage::relay(kind, payload, from),
                )])
            }
            None => {
                // Partner vanished without cleanup; close the half-dead call
                warn!(
                    target: "sc.matchmaking",
                    call_id = %call_id,
                    participant_id = %from,
                    "Call partner missing, tearing down call"
                );
                metrics::record_relay_dropped("peer_gone");
                self.calls.remove(call_id);
                self.registry.set_state(from, ParticipantState::Idle, now);
                Ok(vec![Outbound::new(
                    from,
                    ServerMessage::PeerLeft {
                        reason: PeerLeftReason::Disconnected,
                    },
                )])
            }
        }
    }
}
