//! In-process participant for driving the matchmaker actor directly.
//!
//! A `TestClient` owns the receiving end of the outbound channel a session
//! would normally own, so tests observe exactly the frames a socket writer
//! would see.

use common::types::{MatchId, ParticipantId};
use sc_service::actors::{MatchmakerActorHandle, OutboundFrame, ParticipantInfo};
use sc_service::errors::ScError;
use sc_service::protocol::{Request, ServerMessage, SignalKind};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default wait for an expected event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Outbound buffer for test participants.
const TEST_OUTBOUND_BUFFER: usize = 64;

/// A participant registered with a running matchmaker.
pub struct TestClient {
    matchmaker: MatchmakerActorHandle,
    participant_id: ParticipantId,
    label: String,
    rx: mpsc::Receiver<OutboundFrame>,
}

impl TestClient {
    /// Register and consume the `connected` greeting.
    ///
    /// # Panics
    ///
    /// Panics if registration fails or the greeting does not arrive.
    pub async fn connect(matchmaker: &MatchmakerActorHandle, label: &str) -> Self {
        Self::try_connect(matchmaker, label)
            .await
            .expect("connect should succeed")
    }

    /// Register, returning the matchmaker's refusal instead of panicking.
    ///
    /// # Errors
    ///
    /// Returns the error the matchmaker answered with.
    pub async fn try_connect(
        matchmaker: &MatchmakerActorHandle,
        label: &str,
    ) -> Result<Self, ScError> {
        Self::try_connect_with_buffer(matchmaker, label, TEST_OUTBOUND_BUFFER).await
    }

    /// Register with a custom outbound buffer size.
    ///
    /// # Errors
    ///
    /// Returns the error the matchmaker answered with.
    pub async fn try_connect_with_buffer(
        matchmaker: &MatchmakerActorHandle,
        label: &str,
        buffer: usize,
    ) -> Result<Self, ScError> {
        let (tx, rx) = mpsc::channel(buffer);
        let participant_id = matchmaker.connect(label.to_string(), tx).await?;
        let mut client = Self {
            matchmaker: matchmaker.clone(),
            participant_id,
            label: label.to_string(),
            rx,
        };

        match client.next_event().await {
            ServerMessage::Connected { participant_id: id } => assert_eq!(id, participant_id),
            other => panic!("expected connected, got {other:?}"),
        }
        Ok(client)
    }

    #[must_use]
    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Submit a raw request.
    ///
    /// # Errors
    ///
    /// Returns the matchmaker's rejection (also delivered as an `error` event).
    pub async fn submit(&self, request: Request) -> Result<(), ScError> {
        self.matchmaker.submit(self.participant_id, request).await
    }

    pub async fn find_match(&self, topic: &str) -> Result<(), ScError> {
        self.submit(Request::FindMatch {
            topic: topic.to_string(),
            display_label: None,
        })
        .await
    }

    pub async fn accept(&self) -> Result<(), ScError> {
        self.submit(Request::Accept).await
    }

    pub async fn reject(&self) -> Result<(), ScError> {
        self.submit(Request::Reject).await
    }

    pub async fn cancel_search(&self) -> Result<(), ScError> {
        self.submit(Request::CancelSearch).await
    }

    pub async fn leave(&self) -> Result<(), ScError> {
        self.submit(Request::Leave).await
    }

    pub async fn relay(&self, kind: SignalKind, payload: Value) -> Result<(), ScError> {
        self.submit(Request::Relay { kind, payload }).await
    }

    /// Unregister, as a session does when its socket closes.
    ///
    /// # Errors
    ///
    /// Returns `ParticipantNotFound` when already unregistered.
    pub async fn disconnect(&self) -> Result<(), ScError> {
        self.matchmaker.disconnect(self.participant_id).await
    }

    /// # Errors
    ///
    /// Returns `ParticipantNotFound` when unregistered.
    pub async fn info(&self) -> Result<ParticipantInfo, ScError> {
        self.matchmaker.get_participant(self.participant_id).await
    }

    /// Next frame of any kind, or `None` once the channel is closed.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives within [`EVENT_TIMEOUT`].
    pub async fn next_frame(&mut self) -> Option<OutboundFrame> {
        tokio::time::timeout(EVENT_TIMEOUT, self.rx.recv())
            .await
            .unwrap_or_else(|_| panic!("{}: no frame within {EVENT_TIMEOUT:?}", self.label))
    }

    /// Next event, panicking on a close frame.
    ///
    /// # Panics
    ///
    /// Panics on timeout, close, or a closed channel.
    pub async fn next_event(&mut self) -> ServerMessage {
        match self.next_frame().await {
            Some(OutboundFrame::Event(message)) => message,
            other => panic!("{}: expected an event, got {other:?}", self.label),
        }
    }

    /// Assert the next event equals `expected`.
    pub async fn expect_event(&mut self, expected: ServerMessage) {
        let actual = self.next_event().await;
        assert_eq!(actual, expected, "{}: unexpected event", self.label);
    }

    /// Assert the next event is `waiting` for `topic`.
    pub async fn expect_waiting(&mut self, topic: &str) {
        self.expect_event(ServerMessage::Waiting {
            topic: topic.to_string(),
        })
        .await;
    }

    /// Assert the next event is a proposal and return its id and partner label.
    ///
    /// # Panics
    ///
    /// Panics on any other event.
    pub async fn expect_proposal(&mut self) -> (MatchId, String) {
        match self.next_event().await {
            ServerMessage::MatchProposal {
                match_id,
                partner_label,
                ..
            } => (match_id, partner_label),
            other => panic!("{}: expected match_proposal, got {other:?}", self.label),
        }
    }

    /// Assert the next event is `match_established` and return
    /// `(partner_id, initiator)`.
    ///
    /// # Panics
    ///
    /// Panics on any other event.
    pub async fn expect_established(&mut self) -> (ParticipantId, bool) {
        match self.next_event().await {
            ServerMessage::MatchEstablished {
                partner_id,
                initiator,
                ..
            } => (partner_id, initiator),
            other => panic!("{}: expected match_established, got {other:?}", self.label),
        }
    }

    /// Assert the next event is an `error` and return its code.
    ///
    /// # Panics
    ///
    /// Panics on any other event.
    pub async fn expect_error(&mut self) -> i32 {
        match self.next_event().await {
            ServerMessage::Error { code, .. } => code,
            other => panic!("{}: expected error, got {other:?}", self.label),
        }
    }

    /// Assert the next frame is a close.
    ///
    /// # Panics
    ///
    /// Panics on any other frame.
    pub async fn expect_close(&mut self) {
        match self.next_frame().await {
            Some(OutboundFrame::Close { .. }) | None => {}
            Some(other) => panic!("{}: expected close, got {other:?}", self.label),
        }
    }

    /// Assert nothing arrives within `wait`.
    ///
    /// # Panics
    ///
    /// Panics if a frame arrives.
    pub async fn expect_no_event(&mut self, wait: Duration) {
        if let Ok(Some(frame)) = tokio::time::timeout(wait, self.rx.recv()).await {
            panic!("{}: expected silence, got {frame:?}", self.label);
        }
    }

    /// Discard everything already delivered. Returns how many frames were
    /// dropped.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }

    /// Stop reading; the connection actor sees a closed writer.
    pub fn drop_receiver(self) -> ParticipantId {
        self.participant_id
    }
}

/// Connect two participants, match them on `topic`, and have both accept.
///
/// Returns `(initiator, responder)` with all setup events consumed.
///
/// # Panics
///
/// Panics if any step of the handshake deviates.
pub async fn establish_call(
    matchmaker: &MatchmakerActorHandle,
    topic: &str,
) -> (TestClient, TestClient) {
    let mut first = TestClient::connect(matchmaker, "first").await;
    let mut second = TestClient::connect(matchmaker, "second").await;

    first.find_match(topic).await.expect("first find_match");
    first.expect_waiting(topic).await;
    second.find_match(topic).await.expect("second find_match");

    let (first_match, first_partner) = first.expect_proposal().await;
    let (second_match, second_partner) = second.expect_proposal().await;
    assert_eq!(first_match, second_match);
    assert_eq!(first_partner, "second");
    assert_eq!(second_partner, "first");

    first.accept().await.expect("first accept");
    second.accept().await.expect("second accept");

    let (first_peer, first_initiator) = first.expect_established().await;
    let (second_peer, second_initiator) = second.expect_established().await;
    assert_eq!(first_peer, second.participant_id());
    assert_eq!(second_peer, first.participant_id());
    assert_ne!(first_initiator, second_initiator);

    if first_initiator {
        (first, second)
    } else {
        (second, first)
    }
}
