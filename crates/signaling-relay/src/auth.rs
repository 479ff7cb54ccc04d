//! Request authentication.
//!
//! Browsers cannot set headers on a WebSocket upgrade or an `EventSource`,
//! so the token is taken from `Authorization: Bearer` when present and from
//! the `token` query parameter otherwise.

use crate::errors::RelayError;
use crate::routes::AppState;
use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use common::jwt::validate_user_token;
use common::types::UserId;
use serde::Deserialize;
use tracing::debug;

/// Identity established from a validated user token.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub display_name: String,
    pub email: Option<String>,
}

impl std::fmt::Debug for AuthenticatedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedUser")
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Pull the raw token out of the request, header first.
fn extract_token(parts: &Parts) -> Option<String> {
    if let Some(value) = parts.headers.get(AUTHORIZATION) {
        let bearer = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if let Some(token) = bearer {
            return Some(token.to_string());
        }
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = RelayError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = extract_token(parts) else {
            debug!(target: "relay.auth", path = %parts.uri.path(), "Missing access token");
            return Err(RelayError::Unauthorized("Missing access token".to_string()));
        };

        let config = &state.config;
        let claims = validate_user_token(
            &token,
            &config.jwt_secret,
            &config.jwt_issuer,
            config.jwt_clock_skew,
        )
        .map_err(|e| {
            debug!(target: "relay.auth", path = %parts.uri.path(), error = ?e, "Token rejected");
            RelayError::Unauthorized(e.to_string())
        })?;

        let email = Some(claims.email.trim().to_string()).filter(|e| !e.is_empty());
        Ok(Self {
            user_id: claims.user_id,
            display_name: claims.display_name().to_string(),
            email,
        })
    }
}
