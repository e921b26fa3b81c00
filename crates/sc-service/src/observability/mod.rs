//! Observability module for the Signaling Controller.
//!
//! # Privacy by Default
//!
//! Actor loops use `#[instrument(skip_all)]` with explicit safe fields.
//! Participant ids, message kinds and topic lengths are logged; display
//! labels, topics and relay payloads are not.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sc_connections_active` | Gauge | none | Connected participants |
//! | `sc_waiting_participants` | Gauge | none | Queue size |
//! | `sc_pending_matches` | Gauge | none | Open proposals |
//! | `sc_active_calls` | Gauge | none | Established calls |
//! | `sc_match_proposals_total` | Counter | none | Proposals issued |
//! | `sc_match_outcomes_total` | Counter | `outcome` | How proposals ended |
//! | `sc_queue_wait_seconds` | Histogram | none | Time from enqueue to proposal |
//! | `sc_relay_messages_total` | Counter | `kind` | Forwarded negotiation payloads |
//! | `sc_relay_dropped_total` | Counter | `reason` | Payloads not forwarded |
//! | `sc_protocol_errors_total` | Counter | `error_type` | Requests answered with `error` |
//! | `sc_message_latency_seconds` | Histogram | `message_type` | Request processing latency |
//! | `sc_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `sc_messages_dropped_total` | Counter | `actor_type` | Events dropped on full mailboxes |
//! | `sc_actor_panics_total` | Counter | `actor_type` | Actor panics |

pub mod health;
pub mod metrics;

// Re-exports for convenience
pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
