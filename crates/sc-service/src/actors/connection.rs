//! `ConnectionActor` - per-participant outbound actor.
//!
//! Each `ConnectionActor`:
//! - Serves exactly one participant (one WebSocket = one participant)
//! - Owns the bounded mailbox that the matchmaker delivers events into
//! - Forwards events, in order, to the transport writer
//!
//! # Lifecycle
//!
//! 1. Spawned by the matchmaker when a participant registers
//! 2. Runs until the writer goes away, it is told to close, or its token is
//!    cancelled
//! 3. Cancellation via child token propagates from `MatchmakerActor`

use crate::errors::ScError;
use crate::protocol::ServerMessage;

use super::messages::{ConnectionMessage, OutboundFrame};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::ParticipantId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
pub const CONNECTION_CHANNEL_BUFFER: usize = 256;

/// How long a close frame may wait for room in the writer channel.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionActorHandle {
    /// Queue an event for the client without waiting.
    ///
    /// # Errors
    ///
    /// - `ScError::MailboxFull` if the mailbox is at capacity; the event is dropped
    /// - `ScError::PeerUnavailable` if the actor has exited
    pub fn deliver(&self, message: ServerMessage) -> Result<(), ScError> {
        match self.sender.try_send(ConnectionMessage::Send { message }) {
            Ok(()) => {
                self.mailbox.record_enqueue();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.mailbox.record_drop();
                Err(ScError::MailboxFull)
            }
            Err(TrySendError::Closed(_)) => Err(ScError::PeerUnavailable),
        }
    }

    /// Close the connection after the events already queued.
    ///
    /// Never waits: when the mailbox is full or the actor has exited, the
    /// actor is cancelled instead and queued events may be lost.
    pub fn close(&self, reason: &str) {
        match self.sender.try_send(ConnectionMessage::Close {
            reason: reason.to_string(),
        }) {
            Ok(()) => self.mailbox.record_enqueue(),
            Err(_) => self.cancel_token.cancel(),
        }
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    participant_id: ParticipantId,
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Transport writer.
    outbound: mpsc::Sender<OutboundFrame>,
    /// Cancellation token (child of the matchmaker's token).
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
    is_closing: bool,
}

impl ConnectionActor {
    /// Spawn a new connection actor with a mailbox of `capacity` events.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        participant_id: ParticipantId,
        outbound: mpsc::Sender<OutboundFrame>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
        capacity: usize,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let mailbox = MailboxMonitor::shared(ActorType::Connection, participant_id.to_string());

        let actor = Self {
            participant_id,
            receiver,
            outbound,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: Arc::clone(&mailbox),
            is_closing: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            mailbox,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "sc.actor.connection",
        fields(participant_id = %self.participant_id)
    )]
    async fn run(mut self) {
        self.metrics.connection_created();
        debug!(
            target: "sc.actor.connection",
            participant_id = %self.participant_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "sc.actor.connection",
                        participant_id = %self.participant_id,
                        "ConnectionActor received cancellation signal"
                    );
                    self.graceful_close("connection closed").await;
                    break;
                }

                // Writer gone: nothing left to deliver to
                () = self.outbound.closed() => {
                    debug!(
                        target: "sc.actor.connection",
                        participant_id = %self.participant_id,
                        "Transport writer closed, exiting"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "sc.actor.connection",
                                participant_id = %self.participant_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.connection_closed();
        info!(
            target: "sc.actor.connection",
            participant_id = %self.participant_id,
            messages_processed = self.mailbox.messages_processed(),
            messages_dropped = self.mailbox.messages_dropped(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Send { message } => !self.handle_send(message).await,

            ConnectionMessage::Close { reason } => {
                self.graceful_close(&reason).await;
                true
            }
        }
    }

    /// Forward one event. Returns false once the writer is gone.
    async fn handle_send(&mut self, message: ServerMessage) -> bool {
        if self.is_closing {
            warn!(
                target: "sc.actor.connection",
                participant_id = %self.participant_id,
                "Attempted to send message while closing"
            );
            return true;
        }

        debug!(
            target: "sc.actor.connection",
            participant_id = %self.participant_id,
            message_type = message.message_type(),
            "Sending message to client"
        );

        // A stalled writer must not keep the actor from seeing cancellation
        tokio::select! {
            sent = self.outbound.send(OutboundFrame::Event(message)) => sent.is_ok(),
            () = self.cancel_token.cancelled() => false,
        }
    }

    /// Ask the writer to close the socket.
    async fn graceful_close(&mut self, reason: &str) {
        if self.is_closing {
            return;
        }
        self.is_closing = true;

        debug!(
            target: "sc.actor.connection",
            participant_id = %self.participant_id,
            reason = %reason,
            "Closing connection"
        );

        // The writer may already be gone or stalled
        let close = self.outbound.send(OutboundFrame::Close {
            reason: reason.to_string(),
        });
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, close).await.is_err() {
            warn!(
                target: "sc.actor.connection",
                participant_id = %self.participant_id,
                "Writer did not accept close frame in time"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn spawn_actor(
        capacity: usize,
    ) -> (
        ConnectionActorHandle,
        JoinHandle<()>,
        mpsc::Receiver<OutboundFrame>,
        CancellationToken,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let cancel_token = CancellationToken::new();
        let (handle, task) = ConnectionActor::spawn(
            ParticipantId::new(),
            tx,
            cancel_token.clone(),
            ActorMetrics::new(),
            capacity,
        );
        (handle, task, rx, cancel_token)
    }

    #[tokio::test]
    async fn test_connection_actor_forwards_in_order() {
        let (handle, _task, mut rx, _token) = spawn_actor(8);

        handle.deliver(ServerMessage::SearchCancelled).unwrap();
        handle.deliver(ServerMessage::LeftCall).unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            OutboundFrame::Event(ServerMessage::SearchCancelled)
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            OutboundFrame::Event(ServerMessage::LeftCall)
        );

        handle.cancel();
    }

    #[tokio::test]
    async fn test_connection_actor_close() {
        let (handle, task, mut rx, _token) = spawn_actor(8);

        handle.deliver(ServerMessage::LeftCall).unwrap();
        handle.close("test close");

        // Queued events are flushed before the close
        assert_eq!(
            rx.recv().await.unwrap(),
            OutboundFrame::Event(ServerMessage::LeftCall)
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            OutboundFrame::Close {
                reason: "test close".to_string()
            }
        );
        let result = timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_connection_actor_cancellation_closes_writer() {
        let (_handle, task, mut rx, token) = spawn_actor(8);

        token.cancel();

        let result = timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
        assert!(matches!(rx.recv().await, Some(OutboundFrame::Close { .. })));
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_event() {
        // Writer channel of one that nobody drains: the actor blocks on the
        // second forward and its own mailbox fills up behind it.
        let (tx, _rx) = mpsc::channel(1);
        let (handle, task) = ConnectionActor::spawn(
            ParticipantId::new(),
            tx,
            CancellationToken::new(),
            ActorMetrics::new(),
            1,
        );

        let mut saw_full = false;
        for _ in 0..16 {
            match handle.deliver(ServerMessage::LeftCall) {
                Ok(()) => tokio::task::yield_now().await,
                Err(ScError::MailboxFull) => {
                    saw_full = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert!(saw_full);

        // A close that cannot be queued cancels the actor instead
        handle.close("unresponsive");
        let result = timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_deliver_after_writer_gone_is_peer_unavailable() {
        let (handle, task, rx, _token) = spawn_actor(8);

        drop(rx);
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

        assert!(matches!(
            handle.deliver(ServerMessage::LeftCall),
            Err(ScError::PeerUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_active_connection_gauge() {
        let metrics = ActorMetrics::new();
        let (tx, rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let (handle, task) = ConnectionActor::spawn(
            ParticipantId::new(),
            tx,
            token.clone(),
            Arc::clone(&metrics),
            CONNECTION_CHANNEL_BUFFER,
        );

        // Once an event is forwarded the actor is running
        handle.deliver(ServerMessage::LeftCall).unwrap();
        let mut rx = rx;
        rx.recv().await.unwrap();
        assert_eq!(metrics.connection_count(), 1);

        token.cancel();
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(metrics.connection_count(), 0);
    }
}
