//! Signaling relay configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default listener address for WebSocket, event stream, health and metrics.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default expected `iss` claim on user tokens.
pub const DEFAULT_JWT_ISSUER: &str = "meet-app";

/// Default read deadline, extended by every Pong.
pub const DEFAULT_PONG_WAIT_SECONDS: u64 = 60;

/// Default per-write timeout.
pub const DEFAULT_WRITE_WAIT_SECONDS: u64 = 10;

/// Default maximum inbound frame size.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 8192;

/// Default per-client outbound queue capacity.
pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 256;

/// Default registry mailbox capacity.
pub const DEFAULT_REGISTRY_MAILBOX_CAPACITY: usize = 1024;

/// Default per-subscriber event queue capacity.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

/// Signaling relay configuration.
#[derive(Clone)]
pub struct Config {
    /// HS256 secret for user tokens.
    /// Protected by `SecretString` to prevent accidental logging.
    pub jwt_secret: SecretString,

    /// Listener address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Expected token issuer (default: "meet-app").
    pub jwt_issuer: String,

    /// Tolerance for a future `iat` (default: 300s, max 600s).
    pub jwt_clock_skew: Duration,

    /// Read deadline without a Pong before the connection is dead (default: 60s).
    pub pong_wait: Duration,

    /// Bound on any single transport write (default: 10s).
    pub write_wait: Duration,

    /// Largest inbound frame accepted (default: 8192 bytes).
    pub max_message_bytes: usize,

    /// Per-client outbound queue capacity (default: 256).
    pub client_queue_capacity: usize,

    /// Registry actor mailbox capacity (default: 1024).
    pub registry_mailbox_capacity: usize,

    /// Per-subscriber event queue capacity (default: 256).
    pub event_queue_capacity: usize,

    /// Broadcast `screen-share-stopped` when the sharer disconnects (default: true).
    pub announce_share_stop_on_disconnect: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("jwt_secret", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_clock_skew", &self.jwt_clock_skew)
            .field("pong_wait", &self.pong_wait)
            .field("write_wait", &self.write_wait)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("client_queue_capacity", &self.client_queue_capacity)
            .field("registry_mailbox_capacity", &self.registry_mailbox_capacity)
            .field("event_queue_capacity", &self.event_queue_capacity)
            .field(
                "announce_share_stop_on_disconnect",
                &self.announce_share_stop_on_disconnect,
            )
            .finish()
    }
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
    ///
    /// # Errors
    ///
    /// See [`Config::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// - `MissingEnvVar` if `JWT_SECRET` is absent
    /// - `InvalidValue` if a set variable does not parse, a capacity or
    ///   timeout is zero, or the clock skew exceeds 600 seconds
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let secret = vars
            .get("JWT_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("JWT_SECRET".to_string()))?;
        if secret.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "JWT_SECRET must not be empty".to_string(),
            ));
        }
        let jwt_secret = SecretString::from(secret.clone());

        let bind_address = vars
            .get("RELAY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let jwt_issuer = vars
            .get("RELAY_JWT_ISSUER")
            .cloned()
            .unwrap_or_else(|| DEFAULT_JWT_ISSUER.to_string());

        let clock_skew_seconds = parse_var(
            vars,
            "RELAY_JWT_CLOCK_SKEW_SECONDS",
            DEFAULT_CLOCK_SKEW.as_secs(),
        )?;
        if clock_skew_seconds > MAX_CLOCK_SKEW.as_secs() {
            return Err(ConfigError::InvalidValue(format!(
                "RELAY_JWT_CLOCK_SKEW_SECONDS must be at most {}",
                MAX_CLOCK_SKEW.as_secs()
            )));
        }

        // Timing and capacity
        let pong_wait_seconds =
            parse_nonzero(vars, "RELAY_PONG_WAIT_SECONDS", DEFAULT_PONG_WAIT_SECONDS)?;
        let write_wait_seconds =
            parse_nonzero(vars, "RELAY_WRITE_WAIT_SECONDS", DEFAULT_WRITE_WAIT_SECONDS)?;
        let max_message_bytes =
            parse_nonzero(vars, "RELAY_MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES)?;
        let client_queue_capacity = parse_nonzero(
            vars,
            "RELAY_CLIENT_QUEUE_CAPACITY",
            DEFAULT_CLIENT_QUEUE_CAPACITY,
        )?;
        let registry_mailbox_capacity = parse_nonzero(
            vars,
            "RELAY_REGISTRY_MAILBOX_CAPACITY",
            DEFAULT_REGISTRY_MAILBOX_CAPACITY,
        )?;
        let event_queue_capacity = parse_nonzero(
            vars,
            "RELAY_EVENT_QUEUE_CAPACITY",
            DEFAULT_EVENT_QUEUE_CAPACITY,
        )?;

        let announce_share_stop_on_disconnect =
            match vars.get("RELAY_ANNOUNCE_SHARE_STOP_ON_DISCONNECT") {
                None => true,
                Some(raw) => parse_bool(raw).ok_or_else(|| {
                    ConfigError::InvalidValue(format!(
                        "RELAY_ANNOUNCE_SHARE_STOP_ON_DISCONNECT={raw}"
                    ))
                })?,
            };

        Ok(Config {
            jwt_secret,
            bind_address,
            jwt_issuer,
            jwt_clock_skew: Duration::from_secs(clock_skew_seconds),
            pong_wait: Duration::from_secs(pong_wait_seconds),
            write_wait: Duration::from_secs(write_wait_seconds),
            max_message_bytes,
            client_queue_capacity,
            registry_mailbox_capacity,
            event_queue_capacity,
            announce_share_stop_on_disconnect,
        })
    }

    /// Interval between pings: nine tenths of the read deadline.
    #[must_use]
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
    }
}

fn parse_nonzero<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    let value = parse_var(vars, name, default)?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue(format!("{name} must be greater than zero")));
    }
    Ok(value)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
