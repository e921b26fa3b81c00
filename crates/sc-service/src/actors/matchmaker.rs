//! `MatchmakerActor` - singleton owner of all matchmaking state.
//!
//! The `MatchmakerActor` is the top-level actor in the SC hierarchy:
//!
//! - Singleton per SC instance
//! - Owns the [`Matchmaker`] core and applies every client request to it
//! - Supervises one `ConnectionActor` per participant and routes the core's
//!   outbound events to them
//! - Sweeps overdue proposals on a fixed interval
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! # Graceful Shutdown
//!
//! On SIGTERM, the matchmaker:
//! 1. Sets `accepting_new = false`
//! 2. Cancels the root `CancellationToken` (propagates to all children)
//! 3. Waits for connection actors to close their sockets

use crate::config::Config;
use crate::errors::ScError;
use crate::matchmaking::{MatchPolicy, Matchmaker, Outbound};
use crate::observability::metrics;
use crate::protocol::{Request, ServerMessage};

use super::connection::{ConnectionActor, ConnectionActorHandle, CONNECTION_CHANNEL_BUFFER};
use super::messages::{MatchmakerActorStatus, MatchmakerMessage, OutboundFrame, ParticipantInfo};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::ParticipantId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the matchmaker mailbox.
const MATCHMAKER_CHANNEL_BUFFER: usize = 4096;

/// How long shutdown waits for each connection actor.
const CONNECTION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime settings for the matchmaker actor.
#[derive(Debug, Clone)]
pub struct MatchmakerSettings {
    /// SC instance ID.
    pub sc_id: String,
    pub policy: MatchPolicy,
    /// How often overdue proposals are swept.
    pub sweep_interval: Duration,
    /// Mailbox size of each connection actor.
    pub connection_mailbox: usize,
}

impl MatchmakerSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            sc_id: config.sc_id.clone(),
            policy: MatchPolicy {
                proposal_timeout: config.proposal_timeout,
                reject_policy: config.reject_policy,
                max_participants: config.max_participants,
            },
            sweep_interval: config.proposal_sweep_interval,
            connection_mailbox: CONNECTION_CHANNEL_BUFFER,
        }
    }
}

impl Default for MatchmakerSettings {
    fn default() -> Self {
        Self {
            sc_id: format!("{}-local", crate::config::DEFAULT_SC_ID_PREFIX),
            policy: MatchPolicy::default(),
            sweep_interval: Duration::from_millis(crate::config::DEFAULT_PROPOSAL_SWEEP_INTERVAL_MS),
            connection_mailbox: CONNECTION_CHANNEL_BUFFER,
        }
    }
}

/// Handle to the `MatchmakerActor`.
///
/// This is the public interface for interacting with the matchmaker.
/// All methods are async and return results via oneshot channels.
#[derive(Clone, Debug)]
pub struct MatchmakerActorHandle {
    sender: mpsc::Sender<MatchmakerMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl MatchmakerActorHandle {
    /// Create a new `MatchmakerActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(settings: MatchmakerSettings, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(MATCHMAKER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let mailbox = MailboxMonitor::shared(ActorType::Matchmaker, settings.sc_id.clone());

        let actor = MatchmakerActor::new(
            settings,
            receiver,
            cancel_token.clone(),
            metrics,
            Arc::clone(&mailbox),
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            mailbox,
        }
    }

    async fn send(&self, message: MatchmakerMessage) -> Result<(), ScError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).await.map_err(|e| {
            self.mailbox.record_dequeue();
            ScError::Internal(format!("channel send failed: {e}"))
        })
    }

    /// Register a participant whose events are written to `outbound`.
    ///
    /// The participant's first event is `connected`.
    pub async fn connect(
        &self,
        display_label: String,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Result<ParticipantId, ScError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(MatchmakerMessage::Connect {
            display_label,
            outbound,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Unregister a participant whose connection is gone.
    pub async fn disconnect(&self, participant_id: ParticipantId) -> Result<(), ScError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(MatchmakerMessage::Disconnect {
            participant_id,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Apply a client request on behalf of `participant_id`.
    pub async fn submit(
        &self,
        participant_id: ParticipantId,
        request: Request,
    ) -> Result<(), ScError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(MatchmakerMessage::Client {
            participant_id,
            request,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get a snapshot of one participant.
    pub async fn get_participant(
        &self,
        participant_id: ParticipantId,
    ) -> Result<ParticipantInfo, ScError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(MatchmakerMessage::GetParticipant {
            participant_id,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current matchmaker status.
    pub async fn get_status(&self) -> Result<MatchmakerActorStatus, ScError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(MatchmakerMessage::GetStatus { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    pub async fn shutdown(&self) -> Result<(), ScError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(MatchmakerMessage::Shutdown { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Get a child token for servers and tasks tied to this actor.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed connection.
struct ManagedConnection {
    handle: ConnectionActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
}

/// The `MatchmakerActor` implementation.
///
/// This struct owns the actor state and runs the message loop.
pub struct MatchmakerActor {
    sc_id: String,
    receiver: mpsc::Receiver<MatchmakerMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    core: Matchmaker,
    connections: HashMap<ParticipantId, ManagedConnection>,
    /// Whether new participants are admitted.
    accepting_new: bool,
    sweep_interval: Duration,
    connection_mailbox: usize,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl MatchmakerActor {
    fn new(
        settings: MatchmakerSettings,
        receiver: mpsc::Receiver<MatchmakerMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
        mailbox: Arc<MailboxMonitor>,
    ) -> Self {
        Self {
            sc_id: settings.sc_id,
            receiver,
            cancel_token,
            core: Matchmaker::new(settings.policy),
            connections: HashMap::new(),
            accepting_new: true,
            sweep_interval: settings.sweep_interval,
            connection_mailbox: settings.connection_mailbox,
            metrics,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "sc.actor.matchmaker", fields(sc_id = %self.sc_id))]
    async fn run(mut self) {
        info!(
            target: "sc.actor.matchmaker",
            sc_id = %self.sc_id,
            "MatchmakerActor started"
        );

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Check for terminated connection actors
            self.check_connection_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.matchmaker",
                        sc_id = %self.sc_id,
                        "MatchmakerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                _ = sweep.tick() => {
                    let out = self.core.expire_proposals(Instant::now());
                    if !out.is_empty() {
                        self.dispatch(out);
                        self.publish_gauges();
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            self.publish_gauges();
                        }
                        None => {
                            info!(
                                target: "sc.actor.matchmaker",
                                sc_id = %self.sc_id,
                                "MatchmakerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sc.actor.matchmaker",
            sc_id = %self.sc_id,
            connections_remaining = self.connections.len(),
            messages_processed = self.mailbox.messages_processed(),
            "MatchmakerActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: MatchmakerMessage) {
        match message {
            MatchmakerMessage::Connect {
                display_label,
                outbound,
                respond_to,
            } => {
                let result = self.connect(display_label, outbound);
                let _ = respond_to.send(result);
            }

            MatchmakerMessage::Disconnect {
                participant_id,
                respond_to,
            } => {
                let result = self.disconnect(participant_id);
                let _ = respond_to.send(result);
            }

            MatchmakerMessage::Client {
                participant_id,
                request,
                respond_to,
            } => {
                let result = self.client_request(participant_id, request);
                let _ = respond_to.send(result);
            }

            MatchmakerMessage::GetParticipant {
                participant_id,
                respond_to,
            } => {
                let result = self.get_participant(participant_id);
                let _ = respond_to.send(result);
            }

            MatchmakerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            MatchmakerMessage::Shutdown { respond_to } => {
                let result = self.initiate_shutdown();
                let _ = respond_to.send(result);
            }
        }
    }

    /// Register a participant and spawn its connection actor.
    fn connect(
        &mut self,
        display_label: String,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Result<ParticipantId, ScError> {
        if !self.accepting_new {
            return Err(ScError::Draining);
        }

        let (participant_id, out) = self.core.register(display_label, Instant::now())?;

        let (handle, task_handle) = ConnectionActor::spawn(
            participant_id,
            outbound,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
            self.connection_mailbox,
        );
        self.connections.insert(
            participant_id,
            ManagedConnection {
                handle,
                task_handle,
            },
        );

        info!(
            target: "sc.actor.matchmaker",
            sc_id = %self.sc_id,
            participant_id = %participant_id,
            total_connections = self.connections.len(),
            "Participant connected"
        );

        self.dispatch(out);
        Ok(participant_id)
    }

    fn disconnect(&mut self, participant_id: ParticipantId) -> Result<(), ScError> {
        if let Some(managed) = self.connections.remove(&participant_id) {
            managed.handle.close("connection closed");
        }
        let out = self.core.unregister(participant_id, Instant::now())?;

        info!(
            target: "sc.actor.matchmaker",
            sc_id = %self.sc_id,
            participant_id = %participant_id,
            total_connections = self.connections.len(),
            "Participant disconnected"
        );

        self.dispatch(out);
        Ok(())
    }

    /// Apply a client request. Failures are reported to the participant as
    /// `error` events and also returned.
    fn client_request(
        &mut self,
        participant_id: ParticipantId,
        request: Request,
    ) -> Result<(), ScError> {
        let started = Instant::now();
        let message_type = request.message_type();

        let result = match self.core.handle(participant_id, request, started) {
            Ok(out) => {
                self.dispatch(out);
                Ok(())
            }
            Err(err) => {
                debug!(
                    target: "sc.actor.matchmaker",
                    participant_id = %participant_id,
                    message_type = message_type,
                    error = %err,
                    "Client request failed"
                );
                metrics::record_protocol_error(err.metric_label());
                self.dispatch(vec![Outbound::new(
                    participant_id,
                    ServerMessage::error(&err),
                )]);
                Err(err)
            }
        };

        metrics::record_message_latency(message_type, started.elapsed());
        result
    }

    fn get_participant(&self, participant_id: ParticipantId) -> Result<ParticipantInfo, ScError> {
        let participant = self.core.lookup(participant_id)?;
        Ok(ParticipantInfo {
            participant_id,
            state: participant.state,
            topic: participant.topic.clone(),
            call_partner: self.core.call_partner(participant_id),
        })
    }

    fn get_status(&self) -> MatchmakerActorStatus {
        let status = self.core.status();
        MatchmakerActorStatus {
            participants: status.participants,
            waiting: status.waiting,
            pending_matches: status.pending_matches,
            active_calls: status.active_calls,
            connection_count: self.connections.len(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    fn initiate_shutdown(&mut self) -> Result<(), ScError> {
        info!(
            target: "sc.actor.matchmaker",
            sc_id = %self.sc_id,
            connection_count = self.connections.len(),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;

        // Cancel the root token (propagates to all children)
        self.cancel_token.cancel();

        Ok(())
    }

    /// Route events to connection actors without waiting on any of them.
    ///
    /// An undeliverable participant is unregistered, and the events that
    /// produces are routed in the same pass.
    fn dispatch(&mut self, out: Vec<Outbound>) {
        let mut work: VecDeque<Outbound> = out.into();

        while let Some(Outbound { to, message }) = work.pop_front() {
            let Some(managed) = self.connections.get(&to) else {
                debug!(
                    target: "sc.actor.matchmaker",
                    participant_id = %to,
                    "No connection for participant, event dropped"
                );
                continue;
            };

            let relay_sender = message.relay_sender();
            let is_error = matches!(message, ServerMessage::Error { .. });
            match managed.handle.deliver(message) {
                Ok(()) => {}
                // Relay payloads may be dropped; the sender is told
                Err(ScError::MailboxFull) if relay_sender.is_some() => {
                    metrics::record_relay_dropped("mailbox_full");
                    if let Some(sender) = relay_sender.filter(|sender| *sender != to) {
                        work.push_back(Outbound::new(
                            sender,
                            ServerMessage::error(&ScError::MailboxFull),
                        ));
                    }
                }
                // Error notices carry no state
                Err(ScError::MailboxFull) if is_error => {}
                // A lifecycle event that cannot be queued leaves the client
                // out of step with its state; treat it as gone
                Err(ScError::MailboxFull) => {
                    warn!(
                        target: "sc.actor.matchmaker",
                        sc_id = %self.sc_id,
                        participant_id = %to,
                        "Connection mailbox full on lifecycle event, unregistering participant"
                    );
                    work.extend(self.drop_participant(to));
                }
                Err(_) => {
                    warn!(
                        target: "sc.actor.matchmaker",
                        sc_id = %self.sc_id,
                        participant_id = %to,
                        "Connection unavailable, unregistering participant"
                    );
                    work.extend(self.drop_participant(to));
                }
            }
        }
    }

    /// Remove a participant whose connection is gone or unresponsive.
    fn drop_participant(&mut self, participant_id: ParticipantId) -> Vec<Outbound> {
        if let Some(managed) = self.connections.remove(&participant_id) {
            managed.handle.close("connection unresponsive");
        }
        self.core
            .unregister(participant_id, Instant::now())
            .unwrap_or_default()
    }

    fn publish_gauges(&self) {
        let status = self.core.status();
        metrics::set_connections_active(self.connections.len());
        metrics::set_waiting_participants(status.waiting);
        metrics::set_pending_matches(status.pending_matches);
        metrics::set_active_calls(status.active_calls);
    }

    /// Perform graceful shutdown.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "sc.actor.matchmaker",
            sc_id = %self.sc_id,
            connection_count = self.connections.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        // Already cancelled via the parent token; be explicit
        for managed in self.connections.values() {
            managed.handle.cancel();
        }

        for (participant_id, managed) in self.connections.drain() {
            match tokio::time::timeout(CONNECTION_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "sc.actor.matchmaker",
                        sc_id = %self.sc_id,
                        participant_id = %participant_id,
                        "Connection actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sc.actor.matchmaker",
                        sc_id = %self.sc_id,
                        participant_id = %participant_id,
                        error = ?e,
                        "Connection actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sc.actor.matchmaker",
                        sc_id = %self.sc_id,
                        participant_id = %participant_id,
                        "Connection actor shutdown timed out"
                    );
                }
            }
        }

        self.publish_gauges();
        info!(
            target: "sc.actor.matchmaker",
            sc_id = %self.sc_id,
            "Graceful shutdown complete"
        );
    }

    /// Unregister participants whose connection actor has exited.
    async fn check_connection_health(&mut self) {
        let finished: Vec<ParticipantId> = self
            .connections
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        if finished.is_empty() {
            return;
        }

        for participant_id in finished {
            let Some(managed) = self.connections.remove(&participant_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "sc.actor.matchmaker",
                        sc_id = %self.sc_id,
                        participant_id = %participant_id,
                        "Connection actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "sc.actor.matchmaker",
                            sc_id = %self.sc_id,
                            participant_id = %participant_id,
                            error = ?join_error,
                            "Connection actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Connection);
                    }
                }
            }

            let out = self
                .core
                .unregister(participant_id, Instant::now())
                .unwrap_or_default();
            self.dispatch(out);
        }

        self.publish_gauges();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::matchmaking::ParticipantState;
    use crate::protocol::{PeerLeftReason, RejectReason, SignalKind};
    use serde_json::json;
    use tokio::time::timeout;

    fn spawn_matchmaker(settings: MatchmakerSettings) -> MatchmakerActorHandle {
        MatchmakerActorHandle::new(settings, ActorMetrics::new())
    }

    async fn connect(
        handle: &MatchmakerActorHandle,
        label: &str,
    ) -> (ParticipantId, mpsc::Receiver<OutboundFrame>) {
        let (tx, mut rx) = mpsc::channel(64);
        let id = handle.connect(label.to_string(), tx).await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            ServerMessage::Connected { participant_id: id }
        );
        (id, rx)
    }

    async fn next_event(rx: &mut mpsc::Receiver<OutboundFrame>) -> ServerMessage {
        match timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(OutboundFrame::Event(message))) => message,
            other => panic!("expected an event, got {other:?}"),
        }
    }

    async fn find_match(handle: &MatchmakerActorHandle, id: ParticipantId, topic: &str) {
        handle
            .submit(
                id,
                Request::FindMatch {
                    topic: topic.to_string(),
                    display_label: None,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_matchmaker_politics_scenario() {
        let handle = spawn_matchmaker(MatchmakerSettings::default());
        let (a, mut rx_a) = connect(&handle, "alice").await;
        let (b, mut rx_b) = connect(&handle, "bob").await;

        find_match(&handle, a, "Politics").await;
        assert!(matches!(
            next_event(&mut rx_a).await,
            ServerMessage::Waiting { .. }
        ));
        find_match(&handle, b, "Politics").await;

        assert!(matches!(
            next_event(&mut rx_a).await,
            ServerMessage::MatchProposal { partner_label, .. } if partner_label == "bob"
        ));
        assert!(matches!(
            next_event(&mut rx_b).await,
            ServerMessage::MatchProposal { partner_label, .. } if partner_label == "alice"
        ));

        handle.submit(a, Request::Accept).await.unwrap();
        handle.submit(b, Request::Accept).await.unwrap();

        assert_eq!(
            next_event(&mut rx_a).await,
            ServerMessage::MatchEstablished {
                partner_id: b,
                initiator: true,
                topic: "Politics".to_string()
            }
        );
        assert_eq!(
            next_event(&mut rx_b).await,
            ServerMessage::MatchEstablished {
                partner_id: a,
                initiator: false,
                topic: "Politics".to_string()
            }
        );

        let info = handle.get_participant(a).await.unwrap();
        assert_eq!(info.state, ParticipantState::InCall);
        assert_eq!(info.call_partner, Some(b));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_matchmaker_relay_and_disconnect() {
        let handle = spawn_matchmaker(MatchmakerSettings::default());
        let (a, mut rx_a) = connect(&handle, "alice").await;
        let (b, mut rx_b) = connect(&handle, "bob").await;
        find_match(&handle, a, "Tech").await;
        find_match(&handle, b, "Tech").await;
        handle.submit(a, Request::Accept).await.unwrap();
        handle.submit(b, Request::Accept).await.unwrap();
        for _ in 0..3 {
            next_event(&mut rx_a).await;
        }
        for _ in 0..2 {
            next_event(&mut rx_b).await;
        }

        let payload = json!({"sdp": "v=0"});
        handle
            .submit(
                a,
                Request::Relay {
                    kind: SignalKind::Offer,
                    payload: payload.clone(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut rx_b).await,
            ServerMessage::Offer { payload, sender: a }
        );

        handle.disconnect(a).await.unwrap();
        assert_eq!(
            next_event(&mut rx_b).await,
            ServerMessage::PeerLeft {
                reason: PeerLeftReason::Disconnected
            }
        );
        let info = handle.get_participant(b).await.unwrap();
        assert_eq!(info.state, ParticipantState::Idle);
        assert!(matches!(
            handle.get_participant(a).await,
            Err(ScError::ParticipantNotFound(_))
        ));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_failed_request_is_reported_as_error_event() {
        let handle = spawn_matchmaker(MatchmakerSettings::default());
        let (a, mut rx_a) = connect(&handle, "alice").await;

        let result = handle.submit(a, Request::Accept).await;
        assert!(matches!(result, Err(ScError::ProtocolViolation(_))));
        assert!(matches!(
            next_event(&mut rx_a).await,
            ServerMessage::Error { code: 8, .. }
        ));

        find_match(&handle, a, "Tech").await;
        next_event(&mut rx_a).await;
        let result = handle
            .submit(
                a,
                Request::FindMatch {
                    topic: "Tech".to_string(),
                    display_label: None,
                },
            )
            .await;
        assert!(matches!(result, Err(ScError::DuplicateRequest(_))));
        assert!(matches!(
            next_event(&mut rx_a).await,
            ServerMessage::Error { code: 5, .. }
        ));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_capacity_exceeded_on_connect() {
        let mut settings = MatchmakerSettings::default();
        settings.policy.max_participants = 1;
        let handle = spawn_matchmaker(settings);

        let _first = connect(&handle, "alice").await;
        let (tx, _rx) = mpsc::channel(4);
        let result = handle.connect("bob".to_string(), tx).await;
        assert!(matches!(result, Err(ScError::CapacityExceeded)));

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_proposal_timeout_is_swept() {
        let mut settings = MatchmakerSettings::default();
        settings.policy.proposal_timeout = Duration::from_secs(2);
        settings.sweep_interval = Duration::from_millis(100);
        let handle = spawn_matchmaker(settings);

        let (a, mut rx_a) = connect(&handle, "alice").await;
        let (b, mut rx_b) = connect(&handle, "bob").await;
        find_match(&handle, a, "Tech").await;
        find_match(&handle, b, "Tech").await;
        next_event(&mut rx_a).await;
        next_event(&mut rx_a).await;
        next_event(&mut rx_b).await;
        handle.submit(b, Request::Accept).await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(
            next_event(&mut rx_a).await,
            ServerMessage::MatchRejected {
                reason: RejectReason::Timeout,
                requeued: false
            }
        );
        assert_eq!(
            next_event(&mut rx_b).await,
            ServerMessage::MatchRejected {
                reason: RejectReason::Timeout,
                requeued: true
            }
        );
        let status = handle.get_status().await.unwrap();
        assert_eq!(status.pending_matches, 0);
        assert_eq!(status.waiting, 1);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_closed_writer_unregisters_participant() {
        let mut settings = MatchmakerSettings::default();
        settings.sweep_interval = Duration::from_millis(10);
        let handle = spawn_matchmaker(settings);

        let (a, rx_a) = connect(&handle, "alice").await;
        find_match(&handle, a, "Tech").await;
        drop(rx_a);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let status = handle.get_status().await.unwrap();
            if status.participants == 0 {
                assert_eq!(status.waiting, 0);
                assert_eq!(status.connection_count, 0);
                break;
            }
            assert!(Instant::now() < deadline, "participant never unregistered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        handle.cancel();
    }

    #[tokio::test]
    async fn test_full_partner_mailbox_reports_error_to_sender() {
        let mut settings = MatchmakerSettings::default();
        settings.connection_mailbox = 4;
        let handle = spawn_matchmaker(settings);

        let (a, mut rx_a) = connect(&handle, "alice").await;
        // b's writer is never drained; setup events still fit
        let (tx_b, _rx_b) = mpsc::channel(4);
        let b = handle.connect("bob".to_string(), tx_b).await.unwrap();

        find_match(&handle, a, "Tech").await;
        find_match(&handle, b, "Tech").await;
        handle.submit(a, Request::Accept).await.unwrap();
        handle.submit(b, Request::Accept).await.unwrap();
        for _ in 0..3 {
            next_event(&mut rx_a).await;
        }

        let mut reported = false;
        for n in 0..16 {
            handle
                .submit(
                    a,
                    Request::Relay {
                        kind: SignalKind::IceCandidate,
                        payload: json!(n),
                    },
                )
                .await
                .unwrap();
            if let Ok(Some(OutboundFrame::Event(ServerMessage::Error { code, .. }))) =
                timeout(Duration::from_millis(50), rx_a.recv()).await
            {
                assert_eq!(code, 10);
                reported = true;
                break;
            }
        }
        assert!(reported);

        // The call survives backpressure
        let info = handle.get_participant(a).await.unwrap();
        assert_eq!(info.call_partner, Some(b));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_lifecycle_event_to_full_mailbox_disconnects_participant() {
        let mut settings = MatchmakerSettings::default();
        settings.connection_mailbox = 4;
        let handle = spawn_matchmaker(settings);

        let (a, mut rx_a) = connect(&handle, "alice").await;
        // b's writer is never drained while a floods it
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let b = handle.connect("bob".to_string(), tx_b).await.unwrap();

        find_match(&handle, a, "Tech").await;
        find_match(&handle, b, "Tech").await;
        handle.submit(a, Request::Accept).await.unwrap();
        handle.submit(b, Request::Accept).await.unwrap();
        for _ in 0..3 {
            next_event(&mut rx_a).await;
        }

        for n in 0..20 {
            handle
                .submit(
                    a,
                    Request::Relay {
                        kind: SignalKind::IceCandidate,
                        payload: json!(n),
                    },
                )
                .await
                .unwrap();
            tokio::task::yield_now().await;
        }

        // peer_left cannot be queued for b, so b is dropped instead of being
        // left in a call that no longer exists
        handle.disconnect(a).await.unwrap();

        assert!(matches!(
            handle.get_participant(b).await,
            Err(ScError::ParticipantNotFound(_))
        ));
        let status = handle.get_status().await.unwrap();
        assert_eq!(status.participants, 0);
        assert_eq!(status.active_calls, 0);

        // b's writer sees the end of its stream, never a stale call
        let mut established = 0;
        loop {
            match timeout(Duration::from_secs(5), rx_b.recv()).await.unwrap() {
                Some(OutboundFrame::Event(ServerMessage::MatchEstablished { .. })) => {
                    established += 1;
                }
                Some(OutboundFrame::Event(ServerMessage::PeerLeft { .. })) => {
                    panic!("peer_left cannot fit a full mailbox")
                }
                Some(_) => {}
                None => break,
            }
        }
        assert_eq!(established, 1);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_disconnect_flushes_queued_events_before_close() {
        let handle = spawn_matchmaker(MatchmakerSettings::default());
        let (a, mut rx_a) = connect(&handle, "alice").await;

        find_match(&handle, a, "Tech").await;
        handle.disconnect(a).await.unwrap();

        assert_eq!(
            next_event(&mut rx_a).await,
            ServerMessage::Waiting {
                topic: "Tech".to_string()
            }
        );
        let frame = timeout(Duration::from_secs(5), rx_a.recv()).await.unwrap();
        assert_eq!(
            frame,
            Some(OutboundFrame::Close {
                reason: "connection closed".to_string()
            })
        );

        handle.cancel();
    }

    #[tokio::test]
    async fn test_matchmaker_shutdown() {
        let handle = spawn_matchmaker(MatchmakerSettings::default());
        let (_a, mut rx_a) = connect(&handle, "alice").await;

        let result = handle.shutdown().await;
        assert!(result.is_ok());
        assert!(handle.child_token().is_cancelled());

        // Connection actors close their sockets
        let frame = timeout(Duration::from_secs(5), rx_a.recv()).await.unwrap();
        assert!(matches!(frame, Some(OutboundFrame::Close { .. })));
    }

    #[tokio::test]
    async fn test_matchmaker_child_token() {
        let handle = spawn_matchmaker(MatchmakerSettings::default());
        let child = handle.child_token();

        assert!(!child.is_cancelled());
        handle.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_matchmaker_status() {
        let handle = spawn_matchmaker(MatchmakerSettings::default());

        let status = handle.get_status().await.unwrap();
        assert_eq!(status.participants, 0);
        assert!(!status.is_draining);

        let (a, _rx_a) = connect(&handle, "alice").await;
        let (_b, _rx_b) = connect(&handle, "bob").await;
        find_match(&handle, a, "Tech").await;

        let status = handle.get_status().await.unwrap();
        assert_eq!(status.participants, 2);
        assert_eq!(status.connection_count, 2);
        assert_eq!(status.waiting, 1);

        handle.cancel();
    }

    #[test]
    fn test_settings_from_config() {
        let vars = std::collections::HashMap::from([
            ("SC_ID".to_string(), "sc-test".to_string()),
            ("SC_PROPOSAL_TIMEOUT_SECONDS".to_string(), "5".to_string()),
            ("SC_REJECT_POLICY".to_string(), "idle_both".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        let settings = MatchmakerSettings::from_config(&config);

        assert_eq!(settings.sc_id, "sc-test");
        assert_eq!(settings.policy.proposal_timeout, Duration::from_secs(5));
        assert_eq!(
            settings.policy.reject_policy,
            crate::matchmaking::RejectPolicy::IdleBoth
        );
    }
}
