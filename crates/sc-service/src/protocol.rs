//! JSON message vocabulary exchanged with clients over the WebSocket.
//!
//! Every frame is a JSON object tagged by `type` (snake_case) with camelCase
//! fields. Inbound frames decode into [`ClientMessage`], which is normalized
//! into a [`Request`] before it reaches the matchmaker. Outbound events are
//! [`ServerMessage`] values.

use crate::errors::ScError;
use common::types::{MatchId, ParticipantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Join the waiting pool for a topic.
    #[serde(alias = "find-match")]
    FindMatch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        #[serde(default, alias = "email", skip_serializing_if = "Option::is_none")]
        display_label: Option<String>,
    },
    AcceptMatch,
    RejectMatch,
    CancelSearch,
    /// Hang up the current call (or abandon a search / proposal).
    #[serde(alias = "leave_room")]
    Leave,
    Offer {
        #[serde(default)]
        payload: Value,
    },
    Answer {
        #[serde(default)]
        payload: Value,
    },
    IceCandidate {
        #[serde(default)]
        payload: Value,
    },
    /// Generic relay event for anything that is not offer/answer/candidate.
    Signal {
        #[serde(default)]
        payload: Value,
    },
}

impl ClientMessage {
    /// Bounded label for logs and the latency histogram.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::FindMatch { .. } => "find_match",
            ClientMessage::AcceptMatch => "accept_match",
            ClientMessage::RejectMatch => "reject_match",
            ClientMessage::CancelSearch => "cancel_search",
            ClientMessage::Leave => "leave",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::IceCandidate { .. } => "ice_candidate",
            ClientMessage::Signal { .. } => "signal",
        }
    }

    /// Normalize boundary input into a matchmaker request.
    ///
    /// # Errors
    ///
    /// Returns `ScError::InvalidRequest` when the topic exceeds the limit.
    pub fn into_request(self, limits: &InputLimits) -> Result<Request, ScError> {
        let request = match self {
            ClientMessage::FindMatch {
                topic,
                display_label,
            } => Request::FindMatch {
                topic: limits.normalize_topic(topic.as_deref())?,
                display_label: display_label
                    .as_deref()
                    .map(|label| limits.normalize_label(Some(label))),
            },
            ClientMessage::AcceptMatch => Request::Accept,
            ClientMessage::RejectMatch => Request::Reject,
            ClientMessage::CancelSearch => Request::CancelSearch,
            ClientMessage::Leave => Request::Leave,
            ClientMessage::Offer { payload } => Request::Relay {
                kind: SignalKind::Offer,
                payload,
            },
            ClientMessage::Answer { payload } => Request::Relay {
                kind: SignalKind::Answer,
                payload,
            },
            ClientMessage::IceCandidate { payload } => Request::Relay {
                kind: SignalKind::IceCandidate,
                payload,
            },
            ClientMessage::Signal { payload } => Request::Relay {
                kind: SignalKind::Signal,
                payload,
            },
        };
        Ok(request)
    }
}

/// A normalized client request, ready for the matchmaker.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    FindMatch {
        topic: String,
        /// `None` keeps the label given at connect time.
        display_label: Option<String>,
    },
    Accept,
    Reject,
    CancelSearch,
    Leave,
    Relay {
        kind: SignalKind,
        payload: Value,
    },
}

impl Request {
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            Request::FindMatch { .. } => "find_match",
            Request::Accept => "accept_match",
            Request::Reject => "reject_match",
            Request::CancelSearch => "cancel_search",
            Request::Leave => "leave",
            Request::Relay { kind, .. } => kind.as_str(),
        }
    }
}

/// WebRTC negotiation payload kinds carried by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    Signal,
}

impl SignalKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice_candidate",
            SignalKind::Signal => "signal",
        }
    }
}

/// Why a proposal ended without a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The recipient declined.
    Declined,
    /// The other side declined.
    PartnerDeclined,
    /// The other side disconnected or left.
    PartnerLeft,
    /// Nobody decided in time.
    Timeout,
}

/// Why a call partner is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerLeftReason {
    Left,
    Disconnected,
}

/// Events sent to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Connected {
        participant_id: ParticipantId,
    },
    Waiting {
        topic: String,
    },
    MatchProposal {
        match_id: MatchId,
        partner_label: String,
        topic: String,
        decision_timeout_secs: u64,
    },
    MatchEstablished {
        partner_id: ParticipantId,
        initiator: bool,
        topic: String,
    },
    MatchRejected {
        reason: RejectReason,
        requeued: bool,
    },
    SearchCancelled,
    Offer {
        payload: Value,
        sender: ParticipantId,
    },
    Answer {
        payload: Value,
        sender: ParticipantId,
    },
    IceCandidate {
        payload: Value,
        sender: ParticipantId,
    },
    Signal {
        payload: Value,
        sender: ParticipantId,
    },
    PeerLeft {
        reason: PeerLeftReason,
    },
    LeftCall,
    Error {
        code: i32,
        message: String,
    },
}

impl ServerMessage {
    /// Build the relayed form of a negotiation payload.
    #[must_use]
    pub fn relay(kind: SignalKind, payload: Value, sender: ParticipantId) -> Self {
        match kind {
            SignalKind::Offer => ServerMessage::Offer { payload, sender },
            SignalKind::Answer => ServerMessage::Answer { payload, sender },
            SignalKind::IceCandidate => ServerMessage::IceCandidate { payload, sender },
            SignalKind::Signal => ServerMessage::Signal { payload, sender },
        }
    }

    /// Client-facing `error` event for an error.
    #[must_use]
    pub fn error(err: &ScError) -> Self {
        ServerMessage::Error {
            code: err.error_code(),
            message: err.client_message(),
        }
    }

    /// Wire `type` tag, for logs and metric labels.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::Waiting { .. } => "waiting",
            ServerMessage::MatchProposal { .. } => "match_proposal",
            ServerMessage::MatchEstablished { .. } => "match_established",
            ServerMessage::MatchRejected { .. } => "match_rejected",
            ServerMessage::SearchCancelled => "search_cancelled",
            ServerMessage::Offer { .. } => "offer",
            ServerMessage::Answer { .. } => "answer",
            ServerMessage::IceCandidate { .. } => "ice_candidate",
            ServerMessage::Signal { .. } => "signal",
            ServerMessage::PeerLeft { .. } => "peer_left",
            ServerMessage::LeftCall => "left_call",
            ServerMessage::Error { .. } => "error",
        }
    }

    /// Originator of a relayed payload.
    #[must_use]
    pub const fn relay_sender(&self) -> Option<ParticipantId> {
        match self {
            ServerMessage::Offer { sender, .. }
            | ServerMessage::Answer { sender, .. }
            | ServerMessage::IceCandidate { sender, .. }
            | ServerMessage::Signal { sender, .. } => Some(*sender),
            _ => None,
        }
    }
}

/// Boundary normalization for topics and display labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLimits {
    pub default_topic: String,
    pub default_label: String,
    pub max_topic_length: usize,
    pub max_label_length: usize,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            default_topic: crate::config::DEFAULT_TOPIC.to_string(),
            default_label: crate::config::DEFAULT_LABEL.to_string(),
            max_topic_length: crate::config::DEFAULT_MAX_TOPIC_LENGTH,
            max_label_length: crate::config::DEFAULT_MAX_LABEL_LENGTH,
        }
    }
}

impl InputLimits {
    /// Trim a topic; blank or missing becomes the default topic.
    ///
    /// Topics are otherwise compared exactly, so no case folding happens here.
    ///
    /// # Errors
    ///
    /// Returns `ScError::InvalidRequest` when the trimmed topic is too long.
    pub fn normalize_topic(&self, topic: Option<&str>) -> Result<String, ScError> {
        let trimmed = topic.map(str::trim).unwrap_or_default();
        if trimmed.is_empty() {
            return Ok(self.default_topic.clone());
        }
        if trimmed.chars().count() > self.max_topic_length {
            return Err(ScError::InvalidRequest(format!(
                "Topic exceeds {} characters",
                self.max_topic_length
            )));
        }
        Ok(trimmed.to_string())
    }

    /// Trim and truncate a display label; blank or missing becomes the default.
    #[must_use]
    pub fn normalize_label(&self, label: Option<&str>) -> String {
        let trimmed = label.map(str::trim).unwrap_or_default();
        if trimmed.is_empty() {
            return self.default_label.clone();
        }
        trimmed
            .chars()
            .take(self.max_label_length)
            .collect::<String>()
            .trim_end()
            .to_string()
    }
}
