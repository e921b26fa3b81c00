//! Test server harness for E2E testing
//!
//! Provides `TestScServer` for spawning a real signaling listener in tests.

use crate::fixtures::test_config_vars;
use sc_service::actors::{ActorMetrics, MatchmakerActorHandle, MatchmakerSettings};
use sc_service::config::Config;
use sc_service::ws::{signaling_router, SignalingState};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Test harness for spawning the signaling server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_connect_e2e() -> Result<(), anyhow::Error> {
///     let server = TestScServer::spawn().await?;
///     let mut alice = WsTestClient::connect(&server.ws_url("alice")).await?;
///     alice.expect_connected().await?;
///     Ok(())
/// }
/// ```
pub struct TestScServer {
    addr: SocketAddr,
    config: Config,
    matchmaker: MatchmakerActorHandle,
    shutdown: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestScServer {
    /// Spawn a server with [`test_config_vars`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is rejected or the port cannot
    /// be bound.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(HashMap::new()).await
    }

    /// Spawn a server with `overrides` applied on top of [`test_config_vars`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is rejected or the port cannot
    /// be bound.
    pub async fn spawn_with(overrides: HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let mut vars = test_config_vars();
        vars.extend(overrides);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let matchmaker = MatchmakerActorHandle::new(
            MatchmakerSettings::from_config(&config),
            ActorMetrics::new(),
        );
        let shutdown = matchmaker.child_token();
        let state = SignalingState::from_config(&config, matchmaker.clone(), shutdown.clone());
        let app = signaling_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let server_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await });
            if let Err(e) = server.await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            matchmaker,
            shutdown,
            _handle: handle,
        })
    }

    /// Base HTTP URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket URL carrying `label` as the display label.
    pub fn ws_url(&self, label: &str) -> String {
        format!("ws://{}/ws?label={}", self.addr, label)
    }

    /// WebSocket URL without a label.
    pub fn ws_url_anonymous(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle to the server's matchmaker, for status assertions.
    pub fn matchmaker(&self) -> &MatchmakerActorHandle {
        &self.matchmaker
    }

    /// Begin shutdown: every session closes its socket.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for TestScServer {
    fn drop(&mut self) {
        self._handle.abort();
        self.matchmaker.cancel();
    }
}
