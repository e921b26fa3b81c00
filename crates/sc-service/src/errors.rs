//! Signaling Controller error types.
//!
//! Error types map to `error` event codes for client responses.
//! Internal details are logged server-side but not exposed to clients.

use thiserror::Error;

/// Signaling Controller error type.
///
/// Maps to `error` event codes:
/// - `InvalidRequest`: `INVALID_REQUEST` (1)
/// - `ParticipantNotFound`: `NOT_FOUND` (4)
/// - `DuplicateRequest`: `CONFLICT` (5)
/// - `Internal`, `Config`: `INTERNAL_ERROR` (6)
/// - `CapacityExceeded`, `Draining`: `CAPACITY_EXCEEDED` (7)
/// - `ProtocolViolation`: `PROTOCOL_VIOLATION` (8)
/// - `PeerUnavailable`: `PEER_UNAVAILABLE` (9)
/// - `MailboxFull`: `BACKPRESSURE` (10)
///
/// None of these are fatal to the process or to any other participant.
#[derive(Debug, Error)]
pub enum ScError {
    /// Malformed or unsupported client input.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Message references a match or call the sender is not a member of.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Request repeats one already in effect (e.g. `find_match` while waiting).
    #[error("Duplicate request: {0}")]
    DuplicateRequest(String),

    /// The target participant's connection is gone.
    #[error("Peer unavailable")]
    PeerUnavailable,

    /// The target participant's outbound mailbox is full.
    #[error("Connection mailbox full")]
    MailboxFull,

    /// Participant not found in the registry.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Participant limit reached (load shedding).
    #[error("Signaling controller at capacity")]
    CapacityExceeded,

    /// Controller is draining (graceful shutdown).
    #[error("Signaling controller is draining")]
    Draining,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScError {
    /// Returns the `error` event code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            ScError::InvalidRequest(_) => 1,      // INVALID_REQUEST
            ScError::ParticipantNotFound(_) => 4, // NOT_FOUND
            ScError::DuplicateRequest(_) => 5,    // CONFLICT
            ScError::Internal(_) | ScError::Config(_) => 6, // INTERNAL_ERROR
            ScError::CapacityExceeded | ScError::Draining => 7, // CAPACITY_EXCEEDED
            ScError::ProtocolViolation(_) => 8,   // PROTOCOL_VIOLATION
            ScError::PeerUnavailable => 9,        // PEER_UNAVAILABLE
            ScError::MailboxFull => 10,           // BACKPRESSURE
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ScError::Internal(_) | ScError::Config(_) => "An internal error occurred".to_string(),
            ScError::ParticipantNotFound(_) => "Participant not found".to_string(),
            ScError::CapacityExceeded => "Server is at capacity, please try again".to_string(),
            ScError::Draining => "Server is shutting down, please reconnect".to_string(),
            ScError::PeerUnavailable => "Your partner is no longer connected".to_string(),
            ScError::MailboxFull => "Your partner is not keeping up, message dropped".to_string(),
            ScError::InvalidRequest(msg)
            | ScError::ProtocolViolation(msg)
            | ScError::DuplicateRequest(msg) => msg.clone(),
        }
    }

    /// Returns a bounded label for metrics.
    #[must_use]
    pub const fn metric_label(&self) -> &'static str {
        match self {
            ScError::InvalidRequest(_) => "invalid_request",
            ScError::ProtocolViolation(_) => "protocol_violation",
            ScError::DuplicateRequest(_) => "duplicate_request",
            ScError::PeerUnavailable => "peer_unavailable",
            ScError::MailboxFull => "mailbox_full",
            ScError::ParticipantNotFound(_) => "not_found",
            ScError::CapacityExceeded => "capacity_exceeded",
            ScError::Draining => "draining",
            ScError::Config(_) => "config",
            ScError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(ScError::InvalidRequest("bad json".to_string()).error_code(), 1);
        assert_eq!(
            ScError::ParticipantNotFound("p-1".to_string()).error_code(),
            4
        );
        assert_eq!(
            ScError::DuplicateRequest("already waiting".to_string()).error_code(),
            5
        );
        assert_eq!(ScError::Internal("closed".to_string()).error_code(), 6);
        assert_eq!(ScError::Config("bad".to_string()).error_code(), 6);
        assert_eq!(ScError::CapacityExceeded.error_code(), 7);
        assert_eq!(ScError::Draining.error_code(), 7);
        assert_eq!(
            ScError::ProtocolViolation("no call".to_string()).error_code(),
            8
        );
        assert_eq!(ScError::PeerUnavailable.error_code(), 9);
        assert_eq!(ScError::MailboxFull.error_code(), 10);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let internal = ScError::Internal("channel send failed: receiver dropped".to_string());
        assert!(!internal.client_message().contains("receiver"));
        assert_eq!(internal.client_message(), "An internal error occurred");

        let not_found = ScError::ParticipantNotFound("8d3c0a5e".to_string());
        assert!(!not_found.client_message().contains("8d3c0a5e"));
    }

    #[test]
    fn test_client_messages_pass_through_protocol_text() {
        let err = ScError::DuplicateRequest("Already in a call".to_string());
        assert_eq!(err.client_message(), "Already in a call");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", ScError::ProtocolViolation("no pending match".to_string())),
            "Protocol violation: no pending match"
        );
        assert_eq!(format!("{}", ScError::PeerUnavailable), "Peer unavailable");
    }

    #[test]
    fn test_metric_labels_are_distinct() {
        let labels = [
            ScError::InvalidRequest(String::new()).metric_label(),
            ScError::ProtocolViolation(String::new()).metric_label(),
            ScError::DuplicateRequest(String::new()).metric_label(),
            ScError::PeerUnavailable.metric_label(),
            ScError::MailboxFull.metric_label(),
            ScError::ParticipantNotFound(String::new()).metric_label(),
            ScError::CapacityExceeded.metric_label(),
            ScError::Draining.metric_label(),
            ScError::Config(String::new()).metric_label(),
            ScError::Internal(String::new()).metric_label(),
        ];
        let unique: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }
}
