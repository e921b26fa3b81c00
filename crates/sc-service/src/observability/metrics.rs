//! Metrics definitions for the Signaling Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sc_` prefix for Signaling Controller
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `actor_type`: 2 values (matchmaker, connection)
//! - `message_type`: bounded by the client message vocabulary (9 values)
//! - `outcome`: established, rejected, abandoned, timeout
//! - `kind`: offer, answer, ice_candidate, signal
//! - `reason`: bounded drop reasons
//! - `error_type`: bounded by `ScError::metric_label`
//!
//! Topics and display labels are never used as label values.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Message handling latency - in-process, expected well under 10ms
        .set_buckets_for_metric(
            Matcher::Prefix("sc_message".to_string()),
            &[
                0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        // Queue wait - human time scale
        .set_buckets_for_metric(
            Matcher::Prefix("sc_queue_wait".to_string()),
            &[
                0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
            ],
        )
        .map_err(|e| format!("Failed to set queue wait buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Population Metrics (Gauges)
// ============================================================================

/// Set the number of connected participants.
///
/// Metric: `sc_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_connections_active").set(count as f64);
}

/// Set the number of participants waiting in the queue.
///
/// Metric: `sc_waiting_participants`
pub fn set_waiting_participants(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_waiting_participants").set(count as f64);
}

/// Set the number of open proposals.
///
/// Metric: `sc_pending_matches`
pub fn set_pending_matches(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_pending_matches").set(count as f64);
}

/// Set the number of established calls.
///
/// Metric: `sc_active_calls`
pub fn set_active_calls(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_active_calls").set(count as f64);
}

// ============================================================================
// Matchmaking Metrics
// ============================================================================

/// Record a newly proposed pairing.
///
/// Metric: `sc_match_proposals_total`
pub fn record_match_proposal() {
    counter!("sc_match_proposals_total").increment(1);
}

/// Record how a proposal ended.
///
/// Metric: `sc_match_outcomes_total`
/// Labels: `outcome` (established, rejected, abandoned, timeout)
pub fn record_match_outcome(outcome: &'static str) {
    counter!("sc_match_outcomes_total", "outcome" => outcome).increment(1);
}

/// Record how long a participant waited before being proposed.
///
/// Metric: `sc_queue_wait_seconds`
pub fn record_queue_wait(duration: Duration) {
    histogram!("sc_queue_wait_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Relay Metrics (Counters)
// ============================================================================

/// Record a relayed negotiation payload.
///
/// Metric: `sc_relay_messages_total`
/// Labels: `kind` (offer, answer, ice_candidate, signal)
pub fn record_relay_message(kind: &'static str) {
    counter!("sc_relay_messages_total", "kind" => kind).increment(1);
}

/// Record a relay payload that was not delivered.
///
/// Metric: `sc_relay_dropped_total`
/// Labels: `reason` (no_call, peer_gone, mailbox_full)
pub fn record_relay_dropped(reason: &'static str) {
    counter!("sc_relay_dropped_total", "reason" => reason).increment(1);
}

/// Record a client request that failed.
///
/// Metric: `sc_protocol_errors_total`
/// Labels: `error_type` (see `ScError::metric_label`)
pub fn record_protocol_error(error_type: &'static str) {
    counter!("sc_protocol_errors_total", "error_type" => error_type).increment(1);
}

// ============================================================================
// Actor Metrics
// ============================================================================

/// Record client message processing latency inside the matchmaker.
///
/// Metric: `sc_message_latency_seconds`
/// Labels: `message_type`
pub fn record_message_latency(message_type: &'static str, duration: Duration) {
    histogram!("sc_message_latency_seconds", "message_type" => message_type)
        .record(duration.as_secs_f64());
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `sc_actor_mailbox_depth`
/// Labels: `actor_type` (matchmaker, connection)
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

/// Record messages dropped due to backpressure.
///
/// Metric: `sc_messages_dropped_total`
/// Labels: `actor_type`
///
/// Non-zero values indicate the system is overloaded.
pub fn record_message_dropped(actor_type: &str) {
    counter!("sc_messages_dropped_total", "actor_type" => actor_type.to_string()).increment(1);
}

/// Record an actor panic event.
///
/// Metric: `sc_actor_panics_total`
/// Labels: `actor_type`
///
/// ALERT: Any non-zero value indicates a bug and should trigger investigation.
pub fn record_actor_panic(actor_type: &str) {
    counter!("sc_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}
