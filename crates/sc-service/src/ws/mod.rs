//! WebSocket transport for client signaling.
//!
//! - `GET /` - plain-text banner
//! - `GET /ws?label=<display label>` - WebSocket upgrade, one socket per participant
//!
//! Each socket runs a [`session`]: a reader that decodes client frames into
//! requests for the matchmaker, and a writer that serializes the
//! participant's events and keeps the socket alive with pings.

pub mod session;

use crate::actors::MatchmakerActorHandle;
use crate::config::Config;
use crate::protocol::InputLimits;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Banner served on `GET /`.
pub const BANNER: &str = "Debate signaling controller. Connect a WebSocket to /ws?label=<name>.";

/// Shared state for the signaling router.
#[derive(Clone, Debug)]
pub struct SignalingState {
    pub matchmaker: MatchmakerActorHandle,
    pub limits: Arc<InputLimits>,
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// Inbound silence after which the socket is dropped.
    pub liveness_timeout: Duration,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
}

impl SignalingState {
    #[must_use]
    pub fn from_config(
        config: &Config,
        matchmaker: MatchmakerActorHandle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            matchmaker,
            limits: Arc::new(config.input_limits.clone()),
            ping_interval: config.ping_interval,
            liveness_timeout: config.liveness_timeout,
            shutdown,
        }
    }
}

/// Query parameters accepted on upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(default, alias = "email")]
    pub label: Option<String>,
}

/// Create the signaling router.
pub fn signaling_router(state: SignalingState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index_handler() -> &'static str {
    BANNER
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<SignalingState>,
) -> Response {
    let display_label = state.limits.normalize_label(params.label.as_deref());
    debug!(target: "sc.ws", "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| session::run(socket, display_label, state))
}
