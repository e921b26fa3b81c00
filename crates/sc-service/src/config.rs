//! Signaling Controller configuration.
//!
//! Configuration is loaded from environment variables. Every value has a
//! default; malformed values that would change matchmaking behavior are
//! rejected rather than silently replaced.

use crate::matchmaking::RejectPolicy;
use crate::protocol::InputLimits;

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default signaling (WebSocket) bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8001";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default maximum number of connected participants.
pub const DEFAULT_MAX_PARTICIPANTS: usize = 10_000;

/// Default decision window for a proposed match.
pub const DEFAULT_PROPOSAL_TIMEOUT_SECONDS: u64 = 30;

/// Default interval between sweeps for expired proposals.
pub const DEFAULT_PROPOSAL_SWEEP_INTERVAL_MS: u64 = 1000;

/// Default interval between server WebSocket pings.
pub const DEFAULT_PING_INTERVAL_SECONDS: u64 = 20;

/// Default silence after which a connection is considered gone.
pub const DEFAULT_LIVENESS_TIMEOUT_SECONDS: u64 = 60;

/// Topic used when a client omits one.
pub const DEFAULT_TOPIC: &str = "general";

/// Display label used when a client omits one.
pub const DEFAULT_LABEL: &str = "Anonymous";

/// Default maximum topic length (characters).
pub const DEFAULT_MAX_TOPIC_LENGTH: usize = 128;

/// Default maximum display label length (characters).
pub const DEFAULT_MAX_LABEL_LENGTH: usize = 64;

/// Default instance ID prefix.
pub const DEFAULT_SC_ID_PREFIX: &str = "sc";

/// Signaling Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Signaling server bind address (default: "0.0.0.0:8001").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this instance.
    pub sc_id: String,

    /// Maximum concurrently connected participants.
    pub max_participants: usize,

    /// Decision window for a proposed match.
    pub proposal_timeout: Duration,

    /// How often overdue proposals are swept.
    pub proposal_sweep_interval: Duration,

    /// How often the server pings each WebSocket.
    pub ping_interval: Duration,

    /// Inbound silence after which a connection is dropped.
    pub liveness_timeout: Duration,

    /// What happens to the other side when a proposal is declined.
    pub reject_policy: RejectPolicy,

    /// Boundary normalization limits for topics and labels.
    pub input_limits: InputLimits,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("SC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_participants = parse_or(vars, "SC_MAX_PARTICIPANTS", DEFAULT_MAX_PARTICIPANTS)?;

        let proposal_timeout = Duration::from_secs(parse_positive(
            vars,
            "SC_PROPOSAL_TIMEOUT_SECONDS",
            DEFAULT_PROPOSAL_TIMEOUT_SECONDS,
        )?);

        let proposal_sweep_interval = Duration::from_millis(parse_positive(
            vars,
            "SC_PROPOSAL_SWEEP_INTERVAL_MS",
            DEFAULT_PROPOSAL_SWEEP_INTERVAL_MS,
        )?);

        let ping_interval = Duration::from_secs(parse_positive(
            vars,
            "SC_PING_INTERVAL_SECONDS",
            DEFAULT_PING_INTERVAL_SECONDS,
        )?);

        let liveness_timeout = Duration::from_secs(parse_positive(
            vars,
            "SC_LIVENESS_TIMEOUT_SECONDS",
            DEFAULT_LIVENESS_TIMEOUT_SECONDS,
        )?);

        // A liveness window shorter than the ping cadence would drop idle but healthy peers
        if liveness_timeout <= ping_interval {
            return Err(ConfigError::InvalidValue(format!(
                "SC_LIVENESS_TIMEOUT_SECONDS ({}) must exceed SC_PING_INTERVAL_SECONDS ({})",
                liveness_timeout.as_secs(),
                ping_interval.as_secs()
            )));
        }

        let reject_policy = match vars.get("SC_REJECT_POLICY") {
            Some(raw) => raw
                .parse()
                .map_err(|e: String| ConfigError::InvalidValue(format!("SC_REJECT_POLICY: {e}")))?,
            None => RejectPolicy::default(),
        };

        let default_topic = non_blank_or(vars, "SC_DEFAULT_TOPIC", DEFAULT_TOPIC)?;
        let default_label = non_blank_or(vars, "SC_DEFAULT_LABEL", DEFAULT_LABEL)?;
        let max_topic_length =
            parse_positive(vars, "SC_MAX_TOPIC_LENGTH", DEFAULT_MAX_TOPIC_LENGTH)?;
        let max_label_length =
            parse_positive(vars, "SC_MAX_LABEL_LENGTH", DEFAULT_MAX_LABEL_LENGTH)?;

        if default_topic.chars().count() > max_topic_length {
            return Err(ConfigError::InvalidValue(
                "SC_DEFAULT_TOPIC exceeds SC_MAX_TOPIC_LENGTH".to_string(),
            ));
        }

        // Generate instance ID
        let sc_id = vars.get("SC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_SC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            health_bind_address,
            sc_id,
            max_participants,
            proposal_timeout,
            proposal_sweep_interval,
            ping_interval,
            liveness_timeout,
            reject_policy,
            input_limits: InputLimits {
                default_topic,
                default_label,
                max_topic_length,
                max_label_length,
            },
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}: {raw:?} is not a number"))),
        None => Ok(default),
    }
}

fn parse_positive<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let value = parse_or(vars, key, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(format!("{key} must be greater than zero")));
    }
    Ok(value)
}

fn non_blank_or(
    vars: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<String, ConfigError> {
    match vars.get(key) {
        Some(raw) if raw.trim().is_empty() => {
            Err(ConfigError::InvalidValue(format!("{key} must not be blank")))
        }
        Some(raw) => Ok(raw.trim().to_string()),
        None => Ok(default.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.max_participants, DEFAULT_MAX_PARTICIPANTS);
        assert_eq!(
            config.proposal_timeout,
            Duration::from_secs(DEFAULT_PROPOSAL_TIMEOUT_SECONDS)
        );
        assert_eq!(
            config.proposal_sweep_interval,
            Duration::from_millis(DEFAULT_PROPOSAL_SWEEP_INTERVAL_MS)
        );
        assert_eq!(config.ping_interval, Duration::from_secs(20));
        assert_eq!(config.liveness_timeout, Duration::from_secs(60));
        assert_eq!(config.reject_policy, RejectPolicy::RequeuePartner);
        assert_eq!(config.input_limits.default_topic, "general");
        assert_eq!(config.input_limits.default_label, "Anonymous");
        assert_eq!(config.input_limits.max_topic_length, 128);
        assert_eq!(config.input_limits.max_label_length, 64);
        // Instance ID should be auto-generated
        assert!(config.sc_id.starts_with("sc-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            ("SC_BIND_ADDRESS".to_string(), "127.0.0.1:9001".to_string()),
            (
                "SC_HEALTH_BIND_ADDRESS".to_string(),
                "127.0.0.1:9081".to_string(),
            ),
            ("SC_ID".to_string(), "sc-custom-001".to_string()),
            ("SC_MAX_PARTICIPANTS".to_string(), "50".to_string()),
            ("SC_PROPOSAL_TIMEOUT_SECONDS".to_string(), "10".to_string()),
            ("SC_PROPOSAL_SWEEP_INTERVAL_MS".to_string(), "250".to_string()),
            ("SC_PING_INTERVAL_SECONDS".to_string(), "5".to_string()),
            ("SC_LIVENESS_TIMEOUT_SECONDS".to_string(), "15".to_string()),
            ("SC_REJECT_POLICY".to_string(), "idle_both".to_string()),
            ("SC_DEFAULT_TOPIC".to_string(), " Open Floor ".to_string()),
            ("SC_DEFAULT_LABEL".to_string(), "Guest".to_string()),
            ("SC_MAX_TOPIC_LENGTH".to_string(), "32".to_string()),
            ("SC_MAX_LABEL_LENGTH".to_string(), "16".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:9001");
        assert_eq!(config.health_bind_address, "127.0.0.1:9081");
        assert_eq!(config.sc_id, "sc-custom-001");
        assert_eq!(config.max_participants, 50);
        assert_eq!(config.proposal_timeout, Duration::from_secs(10));
        assert_eq!(config.proposal_sweep_interval, Duration::from_millis(250));
        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert_eq!(config.liveness_timeout, Duration::from_secs(15));
        assert_eq!(config.reject_policy, RejectPolicy::IdleBoth);
        assert_eq!(config.input_limits.default_topic, "Open Floor");
        assert_eq!(config.input_limits.default_label, "Guest");
        assert_eq!(config.input_limits.max_topic_length, 32);
        assert_eq!(config.input_limits.max_label_length, 16);
    }

    #[test]
    fn test_zero_proposal_timeout_rejected() {
        let vars = HashMap::from([(
            "SC_PROPOSAL_TIMEOUT_SECONDS".to_string(),
            "0".to_string(),
        )]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_non_numeric_value_rejected() {
        let vars = HashMap::from([("SC_MAX_PARTICIPANTS".to_string(), "lots".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("SC_MAX_PARTICIPANTS"))
        );
    }

    #[test]
    fn test_liveness_must_exceed_ping_interval() {
        let vars = HashMap::from([
            ("SC_PING_INTERVAL_SECONDS".to_string(), "30".to_string()),
            ("SC_LIVENESS_TIMEOUT_SECONDS".to_string(), "30".to_string()),
        ]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_unknown_reject_policy_rejected() {
        let vars = HashMap::from([("SC_REJECT_POLICY".to_string(), "shuffle".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("SC_REJECT_POLICY"))
        );
    }

    #[test]
    fn test_blank_default_topic_rejected() {
        let vars = HashMap::from([("SC_DEFAULT_TOPIC".to_string(), "   ".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }
}
