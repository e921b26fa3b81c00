//! WebSocket participant for end-to-end tests.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Default wait for an expected frame.
pub const WS_EVENT_TIMEOUT: Duration = Duration::from_secs(3);

/// What the server sent, reduced to what tests assert on.
#[derive(Debug, Clone, PartialEq)]
pub enum WsFrame {
    Event(Value),
    Close { code: Option<u16> },
    /// Stream ended without a close frame.
    Ended,
}

/// A raw WebSocket client speaking the JSON protocol.
pub struct WsTestClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTestClient {
    /// # Errors
    ///
    /// Returns an error if the upgrade fails.
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect to {} failed: {}", url, e))?;
        Ok(Self { stream })
    }

    /// Connect and consume the `connected` greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the upgrade fails or the greeting is missing.
    pub async fn connect_ready(url: &str) -> Result<(Self, String), anyhow::Error> {
        let mut client = Self::connect(url).await?;
        let participant_id = client.expect_connected().await?;
        Ok((client, participant_id))
    }

    /// Send a JSON value as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is closed.
    pub async fn send_json(&mut self, value: &Value) -> Result<(), anyhow::Error> {
        self.send_text(&value.to_string()).await
    }

    /// Send an arbitrary text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is closed.
    pub async fn send_text(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send failed: {}", e))
    }

    /// # Errors
    ///
    /// Returns an error if the socket is closed.
    pub async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), anyhow::Error> {
        self.stream
            .send(Message::binary(bytes))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send failed: {}", e))
    }

    /// Close from the client side.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake cannot be started.
    pub async fn close(&mut self) -> Result<(), anyhow::Error> {
        self.stream
            .close(None)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket close failed: {}", e))
    }

    /// Next frame that is not a ping or pong.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, transport failure or a non-JSON text frame.
    pub async fn next_frame(&mut self, wait: Duration) -> Result<WsFrame, anyhow::Error> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let next = tokio::time::timeout_at(deadline, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("No frame within {:?}", wait))?;

            let message = match next {
                None => return Ok(WsFrame::Ended),
                Some(Err(e)) => return Err(anyhow::anyhow!("WebSocket receive failed: {}", e)),
                Some(Ok(message)) => message,
            };

            match message {
                Message::Text(text) => {
                    let value: Value = serde_json::from_str(text.as_str())
                        .map_err(|e| anyhow::anyhow!("Non-JSON text frame: {}", e))?;
                    return Ok(WsFrame::Event(value));
                }
                Message::Close(frame) => {
                    return Ok(WsFrame::Close {
                        code: frame.map(|f| u16::from(f.code)),
                    })
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                Message::Binary(_) => return Err(anyhow::anyhow!("Unexpected binary frame")),
            }
        }
    }

    /// Next JSON event.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout or if the socket closed instead.
    pub async fn recv_event(&mut self) -> Result<Value, anyhow::Error> {
        match self.next_frame(WS_EVENT_TIMEOUT).await? {
            WsFrame::Event(value) => Ok(value),
            other => Err(anyhow::anyhow!("Expected an event, got {:?}", other)),
        }
    }

    /// Next event, which must have `type == expected_type`.
    ///
    /// # Errors
    ///
    /// Returns an error naming the event actually received.
    pub async fn expect_type(&mut self, expected_type: &str) -> Result<Value, anyhow::Error> {
        let event = self.recv_event().await?;
        if event["type"] == expected_type {
            Ok(event)
        } else {
            Err(anyhow::anyhow!(
                "Expected {} event, got {}",
                expected_type,
                event
            ))
        }
    }

    /// Consume `connected` and return the assigned participant id.
    ///
    /// # Errors
    ///
    /// Returns an error if the greeting is missing or malformed.
    pub async fn expect_connected(&mut self) -> Result<String, anyhow::Error> {
        let event = self.expect_type("connected").await?;
        event["participantId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("connected without participantId: {}", event))
    }

    /// Next frame must be a close (or end of stream). Returns the close code.
    ///
    /// # Errors
    ///
    /// Returns an error if an event arrives instead.
    pub async fn expect_close(&mut self) -> Result<Option<u16>, anyhow::Error> {
        match self.next_frame(WS_EVENT_TIMEOUT).await {
            Ok(WsFrame::Close { code }) => Ok(code),
            Ok(WsFrame::Ended) => Ok(None),
            Ok(WsFrame::Event(value)) => Err(anyhow::anyhow!("Expected close, got {}", value)),
            // A reset after the close frame also counts as closed
            Err(e) if e.to_string().contains("receive failed") => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Assert nothing but pings arrive for `wait`.
    ///
    /// # Errors
    ///
    /// Returns an error describing the frame that arrived.
    pub async fn expect_silence(&mut self, wait: Duration) -> Result<(), anyhow::Error> {
        match self.next_frame(wait).await {
            Err(e) if e.to_string().starts_with("No frame") => Ok(()),
            Ok(frame) => Err(anyhow::anyhow!("Expected silence, got {:?}", frame)),
            Err(e) => Err(e),
        }
    }
}
