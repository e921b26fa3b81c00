//! One WebSocket session per participant.
//!
//! # Lifecycle
//!
//! 1. Register with the matchmaker; the participant's connection actor
//!    writes into this session's outbound channel
//! 2. Reader loop: decode text frames, normalize, submit to the matchmaker
//! 3. Writer task: serialize events, send pings, send the close frame
//! 4. On close, liveness timeout or shutdown: unregister, then let the
//!    writer drain

use crate::actors::OutboundFrame;
use crate::errors::ScError;
use crate::observability::metrics;
use crate::protocol::{ClientMessage, ServerMessage};

use super::SignalingState;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use common::types::ParticipantId;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Outbound frames buffered between the connection actor and the socket.
const OUTBOUND_BUFFER: usize = 64;

/// How long the writer may take to flush after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why the reader loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    ClientClosed,
    LivenessTimeout,
    TransportError,
    WriterClosed,
    MatchmakerUnavailable,
    Shutdown,
}

impl SessionEnd {
    const fn as_str(self) -> &'static str {
        match self {
            SessionEnd::ClientClosed => "client_closed",
            SessionEnd::LivenessTimeout => "liveness_timeout",
            SessionEnd::TransportError => "transport_error",
            SessionEnd::WriterClosed => "writer_closed",
            SessionEnd::MatchmakerUnavailable => "matchmaker_unavailable",
            SessionEnd::Shutdown => "shutdown",
        }
    }
}

/// Drive one upgraded socket until it closes.
pub async fn run(socket: WebSocket, display_label: String, state: SignalingState) {
    let (mut sink, stream) = socket.split();
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);

    let participant_id = match state.matchmaker.connect(display_label, tx.clone()).await {
        Ok(id) => id,
        Err(err) => {
            info!(target: "sc.ws", error = %err, "Connection refused");
            refuse(&mut sink, &err).await;
            return;
        }
    };

    info!(target: "sc.ws", participant_id = %participant_id, "Session started");

    let mut writer = tokio::spawn(write_loop(sink, rx, state.ping_interval, participant_id));
    let (end, writer_done) = read_loop(stream, &state, participant_id, &tx, &mut writer).await;

    if let Err(err) = state.matchmaker.disconnect(participant_id).await {
        // Already unregistered when the connection actor went first
        debug!(
            target: "sc.ws",
            participant_id = %participant_id,
            error = %err,
            "Disconnect not applied"
        );
    }
    drop(tx);

    if !writer_done && timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        warn!(
            target: "sc.ws",
            participant_id = %participant_id,
            "Writer did not drain in time"
        );
    }

    info!(
        target: "sc.ws",
        participant_id = %participant_id,
        reason = end.as_str(),
        "Session ended"
    );
}

/// Read client frames until the session ends. Returns whether the writer
/// task has already completed.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &SignalingState,
    participant_id: ParticipantId,
    tx: &mpsc::Sender<OutboundFrame>,
    writer: &mut tokio::task::JoinHandle<()>,
) -> (SessionEnd, bool) {
    loop {
        let next = tokio::select! {
            () = state.shutdown.cancelled() => return (SessionEnd::Shutdown, false),
            _ = &mut *writer => return (SessionEnd::WriterClosed, true),
            next = timeout(state.liveness_timeout, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => return (SessionEnd::LivenessTimeout, false),
            Ok(None) => return (SessionEnd::ClientClosed, false),
            Ok(Some(Err(e))) => {
                debug!(
                    target: "sc.ws",
                    participant_id = %participant_id,
                    error = %e,
                    "WebSocket receive failed"
                );
                return (SessionEnd::TransportError, false);
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                if let Some(end) = handle_text(state, participant_id, tx, &text).await {
                    return (end, false);
                }
            }
            Message::Binary(_) => report(
                tx,
                &ScError::InvalidRequest("Binary frames are not supported".to_string()),
            ),
            // Any inbound frame counts as liveness; pongs are sent by axum
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => return (SessionEnd::ClientClosed, false),
        }
    }
}

/// Decode and submit one text frame. Returns `Some` when the session
/// cannot continue.
async fn handle_text(
    state: &SignalingState,
    participant_id: ParticipantId,
    tx: &mpsc::Sender<OutboundFrame>,
    text: &str,
) -> Option<SessionEnd> {
    let started = Instant::now();
    let request = serde_json::from_str::<ClientMessage>(text)
        .map_err(|e| ScError::InvalidRequest(format!("Malformed message: {e}")))
        .and_then(|message| message.into_request(&state.limits));

    match request {
        Ok(request) => {
            debug!(
                target: "sc.ws",
                participant_id = %participant_id,
                message_type = request.message_type(),
                "Client request"
            );
            match state.matchmaker.submit(participant_id, request).await {
                Err(ScError::Internal(reason)) => {
                    warn!(
                        target: "sc.ws",
                        participant_id = %participant_id,
                        error = %reason,
                        "Matchmaker unavailable, ending session"
                    );
                    return Some(SessionEnd::MatchmakerUnavailable);
                }
                // Domain errors already reached the client as error events
                Ok(()) | Err(_) => {}
            }
        }
        Err(err) => {
            metrics::record_message_latency("invalid", started.elapsed());
            report(tx, &err);
        }
    }
    None
}

/// Answer a frame the session could not turn into a request.
fn report(tx: &mpsc::Sender<OutboundFrame>, err: &ScError) {
    metrics::record_protocol_error(err.metric_label());
    if tx
        .try_send(OutboundFrame::Event(ServerMessage::error(err)))
        .is_err()
    {
        debug!(target: "sc.ws", "Outbound buffer full, error event dropped");
    }
}

/// Serialize outbound frames to the socket and keep it alive with pings.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundFrame>,
    ping_interval: Duration,
    participant_id: ParticipantId,
) {
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(OutboundFrame::Event(message)) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(
                                target: "sc.ws",
                                participant_id = %participant_id,
                                error = %e,
                                "Failed to serialize event"
                            );
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(OutboundFrame::Close { reason }) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
                None => break,
            },

            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
    debug!(target: "sc.ws", participant_id = %participant_id, "Writer stopped");
}

/// Tell a client why it was not admitted, then close.
async fn refuse(sink: &mut SplitSink<WebSocket, Message>, err: &ScError) {
    if let Ok(text) = serde_json::to_string(&ServerMessage::error(err)) {
        let _ = sink.send(Message::Text(text)).await;
    }
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code::AGAIN,
            reason: err.client_message().into(),
        })))
        .await;
}
