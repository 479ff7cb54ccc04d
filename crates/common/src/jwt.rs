//! User access token validation.
//!
//! The relay never issues tokens. It accepts HS256 tokens minted by the
//! account service and checks them once, at the transport boundary.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only HS256 is accepted
//! - `exp`, `nbf` and `iss` are validated by `jsonwebtoken`; `iat` is checked
//!   here against a bounded clock skew
//! - Every failure renders the same generic message. The specific reason is
//!   logged at debug level under `common.jwt`
//! - `email` is redacted in `Debug` output

use crate::secret::{ExposeSecret, SecretString};
use crate::types::UserId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum accepted token size in bytes (8KB).
///
/// Oversized tokens are rejected before base64 decoding or signature work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance for the `iat` claim (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Upper bound for a configured clock skew (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Display name used when a token carries no username.
pub const UNKNOWN_USERNAME: &str = "Unknown";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during token validation.
///
/// All variants share one client-facing message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Signature, structure, issuer or time-window validation failed.
    #[error("The access token is invalid or expired")]
    Rejected,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Claims
// =============================================================================

/// Claims carried by a user access token.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct UserClaims {
    /// Authenticated user.
    pub user_id: UserId,

    /// Contact address, redacted in Debug output.
    #[serde(default)]
    pub email: String,

    /// Display name shown to other participants.
    #[serde(default)]
    pub username: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// Not-before timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// Issuer.
    pub iss: String,
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("user_id", &self.user_id)
            .field("email", &"[REDACTED]")
            .field("username", &self.username)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("nbf", &self.nbf)
            .field("iss", &self.iss)
            .finish()
    }
}

impl UserClaims {
    /// Display name for this user, falling back to [`UNKNOWN_USERNAME`].
    #[must_use]
    pub fn display_name(&self) -> &str {
        let trimmed = self.username.trim();
        if trimmed.is_empty() {
            UNKNOWN_USERNAME
        } else {
            trimmed
        }
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Validate an HS256 user token and return its claims.
///
/// # Errors
///
/// - `TokenTooLarge` if the token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `Rejected` for a bad signature, wrong algorithm, wrong issuer, or an
///   expired or not-yet-valid token
/// - `IatTooFarInFuture` if `iat` is beyond `clock_skew`
pub fn validate_user_token(
    token: &str,
    secret: &SecretString,
    issuer: &str,
    clock_skew: Duration,
) -> Result<UserClaims, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.set_issuer(&[issuer]);
    validation.set_required_spec_claims(&["exp", "iss"]);

    let key = DecodingKey::from_secret(secret.expose_secret().as_bytes());
    let data = decode::<UserClaims>(token, &key, &validation).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Token verification failed");
        JwtValidationError::Rejected
    })?;

    validate_iat(data.claims.iat, clock_skew)?;

    Ok(data.claims)
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if the iat timestamp is
/// more than `clock_skew` in the future.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    let clock_skew = clock_skew.min(MAX_CLOCK_SKEW);
    // Bounded by MAX_CLOCK_SKEW, fits in i64
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "unit-test-secret";
    const ISSUER: &str = "meet-app";

    fn claims_at(now: i64) -> UserClaims {
        UserClaims {
            user_id: UserId::new(),
            email: "alice@example.com".to_string(),
            username: "Alice".to_string(),
            exp: now + 3600,
            iat: now,
            nbf: Some(now),
            iss: ISSUER.to_string(),
        }
    }

    fn sign(claims: &UserClaims, secret: &str, alg: Algorithm) -> String {
        encode(
            &Header::new(alg),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn secret() -> SecretString {
        SecretString::from(SECRET)
    }

    #[test]
    fn test_valid_token_round_trips_claims() {
        let claims = claims_at(chrono::Utc::now().timestamp());
        let token = sign(&claims, SECRET, Algorithm::HS256);

        let validated = validate_user_token(&token, &secret(), ISSUER, DEFAULT_CLOCK_SKEW).unwrap();
        assert_eq!(validated.user_id, claims.user_id);
        assert_eq!(validated.display_name(), "Alice");
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = sign(
            &claims_at(chrono::Utc::now().timestamp()),
            "other-secret",
            Algorithm::HS256,
        );
        assert_eq!(
            validate_user_token(&token, &secret(), ISSUER, DEFAULT_CLOCK_SKEW),
            Err(JwtValidationError::Rejected)
        );
    }

    #[test]
    fn test_wrong_algorithm_is_rejected() {
        let token = sign(
            &claims_at(chrono::Utc::now().timestamp()),
            SECRET,
            Algorithm::HS512,
        );
        assert_eq!(
            validate_user_token(&token, &secret(), ISSUER, DEFAULT_CLOCK_SKEW),
            Err(JwtValidationError::Rejected)
        );
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let now = chrono::Utc::now().timestamp();
        let mut claims = claims_at(now - 7200);
        claims.exp = now - 3600;
        let token = sign(&claims, SECRET, Algorithm::HS256);

        assert_eq!(
            validate_user_token(&token, &secret(), ISSUER, DEFAULT_CLOCK_SKEW),
            Err(JwtValidationError::Rejected)
        );
    }

    #[test]
    fn test_wrong_issuer_is_rejected() {
        let mut claims = claims_at(chrono::Utc::now().timestamp());
        claims.iss = "someone-else".to_string();
        let token = sign(&claims, SECRET, Algorithm::HS256);

        assert_eq!(
            validate_user_token(&token, &secret(), ISSUER, DEFAULT_CLOCK_SKEW),
            Err(JwtValidationError::Rejected)
        );
    }

    #[test]
    fn test_oversized_token_rejected_before_parsing() {
        let token = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(
            validate_user_token(&token, &secret(), ISSUER, DEFAULT_CLOCK_SKEW),
            Err(JwtValidationError::TokenTooLarge)
        );
    }

    #[test]
    fn test_future_iat_is_rejected() {
        let now = chrono::Utc::now().timestamp();
        let mut claims = claims_at(now);
        claims.iat = now + 3600;
        claims.nbf = None;
        let token = sign(&claims, SECRET, Algorithm::HS256);

        assert_eq!(
            validate_user_token(&token, &secret(), ISSUER, DEFAULT_CLOCK_SKEW),
            Err(JwtValidationError::IatTooFarInFuture)
        );
    }

    #[test]
    fn test_iat_boundaries() {
        let now = 1_700_000_000;
        let skew = Duration::from_secs(300);

        assert!(validate_iat_at(now, skew, now).is_ok());
        assert!(validate_iat_at(now + 300, skew, now).is_ok());
        assert_eq!(
            validate_iat_at(now + 301, skew, now),
            Err(JwtValidationError::IatTooFarInFuture)
        );
    }

    #[test]
    fn test_iat_skew_is_capped() {
        let now = 1_700_000_000;
        let huge = Duration::from_secs(86_400);

        assert!(validate_iat_at(now + 600, huge, now).is_ok());
        assert!(validate_iat_at(now + 601, huge, now).is_err());
    }

    #[test]
    fn test_error_messages_are_generic() {
        for err in [
            JwtValidationError::TokenTooLarge,
            JwtValidationError::Rejected,
            JwtValidationError::IatTooFarInFuture,
        ] {
            assert_eq!(err.to_string(), "The access token is invalid or expired");
        }
    }

    #[test]
    fn test_missing_username_falls_back() {
        let mut claims = claims_at(0);
        claims.username = "   ".to_string();
        assert_eq!(claims.display_name(), UNKNOWN_USERNAME);
    }

    #[test]
    fn test_debug_redacts_email() {
        let claims = claims_at(0);
        let debug = format!("{claims:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("alice@example.com"));
    }
}
