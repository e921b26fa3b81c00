//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use crate::errors::ScError;
use crate::matchmaking::ParticipantState;
use crate::protocol::{Request, ServerMessage};
use common::types::ParticipantId;
use tokio::sync::{mpsc, oneshot};

/// Messages sent to `MatchmakerActor`.
#[derive(Debug)]
pub enum MatchmakerMessage {
    /// A new transport connection wants a participant identity.
    Connect {
        /// Display label, already normalized.
        display_label: String,
        /// Where the participant's events are written.
        outbound: mpsc::Sender<OutboundFrame>,
        /// Response channel for the assigned participant ID.
        respond_to: oneshot::Sender<Result<ParticipantId, ScError>>,
    },

    /// The transport connection is gone.
    Disconnect {
        participant_id: ParticipantId,
        /// Response channel for confirmation.
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },

    /// A normalized client request.
    Client {
        participant_id: ParticipantId,
        request: Request,
        /// Response channel for the outcome. Failures have already been
        /// reported to the participant as `error` events.
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },

    /// Look up one participant.
    GetParticipant {
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<Result<ParticipantInfo, ScError>>,
    },

    /// Get current population counts (for health checks and tests).
    GetStatus {
        respond_to: oneshot::Sender<MatchmakerActorStatus>,
    },

    /// Stop accepting connections and cancel all actors.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Deliver an event to the client.
    Send { message: ServerMessage },

    /// Close the connection.
    Close { reason: String },
}

/// Frames handed from a connection actor to the transport writer.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Event(ServerMessage),
    Close { reason: String },
}

/// Snapshot of one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub participant_id: ParticipantId,
    pub state: ParticipantState,
    pub topic: Option<String>,
    pub call_partner: Option<ParticipantId>,
}

/// Matchmaker status for health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchmakerActorStatus {
    /// Registered participants.
    pub participants: usize,
    /// Participants waiting in the queue.
    pub waiting: usize,
    /// Open proposals.
    pub pending_matches: usize,
    /// Established calls.
    pub active_calls: usize,
    /// Live connection actors.
    pub connection_count: usize,
    /// Whether the matchmaker is draining.
    pub is_draining: bool,
    /// Current mailbox depth.
    pub mailbox_depth: usize,
}
