//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports [`secrecy`] so every crate in the workspace names secrets the
//! same way. `SecretString` implements `Debug` with redaction, so a struct
//! that derives `Debug` and holds one can be logged with `{:?}` or passed to
//! `tracing` without leaking the value. Secrets are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct TokenSettings {
//!     issuer: String,
//!     signing_secret: SecretString,
//! }
//!
//! let settings = TokenSettings {
//!     issuer: "meet-app".to_string(),
//!     signing_secret: SecretString::from("change-me"),
//! };
//!
//! assert!(!format!("{settings:?}").contains("change-me"));
//! assert_eq!(settings.signing_secret.expose_secret(), "change-me");
//! ```
//!
//! Use `SecretString` for the token signing secret and for raw bearer tokens
//! held longer than a single validation call.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hs256-signing-key");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hs256-signing-key"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("relay-secret");
        assert_eq!(secret.expose_secret(), "relay-secret");
    }

    #[test]
    fn test_deserialized_secret_stays_redacted() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct SigningConfig {
            issuer: String,
            secret: SecretString,
        }

        let json = r#"{"issuer": "meet-app", "secret": "do-not-log"}"#;
        let config: SigningConfig = serde_json::from_str(json).expect("deserialize");

        assert_eq!(config.secret.expose_secret(), "do-not-log");
        let debug = format!("{config:?}");
        assert!(debug.contains("meet-app"));
        assert!(!debug.contains("do-not-log"));
    }
}
