//! Pre-configured settings for SC testing.

use sc_service::actors::{ActorMetrics, MatchmakerActorHandle, MatchmakerSettings};
use sc_service::matchmaking::{MatchPolicy, RejectPolicy};
use std::collections::HashMap;
use std::time::Duration;

/// Topics used across scenario tests.
pub const POLITICS: &str = "Politics";
pub const TECH: &str = "Tech";

/// Matchmaker settings with short timers.
#[must_use]
pub fn fast_settings() -> MatchmakerSettings {
    MatchmakerSettings {
        sc_id: "sc-test".to_string(),
        policy: MatchPolicy {
            proposal_timeout: Duration::from_secs(2),
            reject_policy: RejectPolicy::RequeuePartner,
            max_participants: 1_000,
        },
        sweep_interval: Duration::from_millis(50),
        ..MatchmakerSettings::default()
    }
}

/// [`fast_settings`] with a different reject policy.
#[must_use]
pub fn settings_with_policy(reject_policy: RejectPolicy) -> MatchmakerSettings {
    let mut settings = fast_settings();
    settings.policy.reject_policy = reject_policy;
    settings
}

/// Spawn a matchmaker actor with fresh metrics.
#[must_use]
pub fn spawn_matchmaker(settings: MatchmakerSettings) -> MatchmakerActorHandle {
    MatchmakerActorHandle::new(settings, ActorMetrics::new())
}

/// Environment for a server bound to a random local port.
#[must_use]
pub fn test_config_vars() -> HashMap<String, String> {
    HashMap::from([
        ("SC_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("SC_HEALTH_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("SC_ID".to_string(), "sc-test".to_string()),
        ("SC_PROPOSAL_TIMEOUT_SECONDS".to_string(), "2".to_string()),
        ("SC_PROPOSAL_SWEEP_INTERVAL_MS".to_string(), "50".to_string()),
        ("SC_PING_INTERVAL_SECONDS".to_string(), "1".to_string()),
        ("SC_LIVENESS_TIMEOUT_SECONDS".to_string(), "5".to_string()),
    ])
}
