//! Signaling relay error types.
//!
//! One error type serves both surfaces: `client_message()` is what a
//! WebSocket client sees in an `error` frame, and the `IntoResponse` impl is
//! what an HTTP caller sees before the upgrade. Internal details are logged
//! server-side but never sent to clients.

use crate::protocol::ProtocolError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::types::UserId;
use serde::Serialize;
use thiserror::Error;

/// Signaling relay error type.
///
/// Maps to numeric error codes:
/// - `Protocol`, `BadRequest`: `BAD_REQUEST` (1)
/// - `Unauthorized`: `UNAUTHORIZED` (2)
/// - `PermissionDenied`: `FORBIDDEN` (3)
/// - `NotFound`, `RecipientUnavailable`: `NOT_FOUND` (4)
/// - `Conflict`: `CONFLICT` (5)
/// - `Config`, `Internal`: `INTERNAL_ERROR` (6)
#[derive(Debug, Error)]
pub enum RelayError {
    /// Inbound message could not be decoded into a client message.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Conflicting state (e.g., screen share already owned).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Referenced entity does not exist (e.g., a join request).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Directed message for a user who is not in the room.
    #[error("Recipient unavailable: {0}")]
    RecipientUnavailable(UserId),

    /// Caller is not allowed to perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Missing or invalid access token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed HTTP request (e.g., a bad `meeting_id`).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (e.g., the registry actor is gone).
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl RelayError {
    /// Returns the numeric error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            RelayError::Protocol(_) | RelayError::BadRequest(_) => 1, // BAD_REQUEST
            RelayError::Unauthorized(_) => 2,                         // UNAUTHORIZED
            RelayError::PermissionDenied(_) => 3,                     // FORBIDDEN
            RelayError::NotFound(_) | RelayError::RecipientUnavailable(_) => 4, // NOT_FOUND
            RelayError::Conflict(_) => 5,                             // CONFLICT
            RelayError::Config(_) | RelayError::Internal(_) => 6,     // INTERNAL_ERROR
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Protocol(e) => e.client_message(),
            RelayError::Config(_) | RelayError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            RelayError::RecipientUnavailable(_) => "Recipient is not available".to_string(),
            RelayError::Unauthorized(_) => "Invalid or expired token".to_string(),
            RelayError::Conflict(msg)
            | RelayError::NotFound(msg)
            | RelayError::PermissionDenied(msg)
            | RelayError::BadRequest(msg) => msg.clone(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Protocol(_) | RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RelayError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            RelayError::NotFound(_) | RelayError::RecipientUnavailable(_) => StatusCode::NOT_FOUND,
            RelayError::Conflict(_) => StatusCode::CONFLICT,
            RelayError::Config(_) | RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code_name(&self) -> &'static str {
        match self {
            RelayError::Protocol(_) | RelayError::BadRequest(_) => "BAD_REQUEST",
            RelayError::Unauthorized(_) => "INVALID_TOKEN",
            RelayError::PermissionDenied(_) => "FORBIDDEN",
            RelayError::NotFound(_) | RelayError::RecipientUnavailable(_) => "NOT_FOUND",
            RelayError::Conflict(_) => "CONFLICT",
            RelayError::Config(_) | RelayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Log actual error server-side, return generic message to client
            tracing::error!(target: "relay.http", error = %self, "Request failed");
        }

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code_name().to_string(),
                message: self.client_message(),
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"signaling-relay\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::MessageKind;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            RelayError::Protocol(ProtocolError::UnknownKind(MessageKind::Unknown)).error_code(),
            1
        );
        assert_eq!(RelayError::BadRequest("x".to_string()).error_code(), 1);
        assert_eq!(RelayError::Unauthorized("expired".to_string()).error_code(), 2);
        assert_eq!(
            RelayError::PermissionDenied("not admitted".to_string()).error_code(),
            3
        );
        assert_eq!(
            RelayError::NotFound("Join request not found".to_string()).error_code(),
            4
        );
        assert_eq!(RelayError::RecipientUnavailable(UserId::new()).error_code(), 4);
        assert_eq!(RelayError::Conflict("sharing".to_string()).error_code(), 5);
        assert_eq!(RelayError::Config("bad".to_string()).error_code(), 6);
        assert_eq!(RelayError::Internal("gone".to_string()).error_code(), 6);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let internal = RelayError::Internal("channel send failed: registry closed".to_string());
        assert_eq!(internal.client_message(), "An internal error occurred");

        let config = RelayError::Config("JWT_SECRET is empty".to_string());
        assert!(!config.client_message().contains("JWT_SECRET"));

        let auth = RelayError::Unauthorized("signature mismatch".to_string());
        assert_eq!(auth.client_message(), "Invalid or expired token");
    }

    #[test]
    fn test_protocol_errors_use_wire_text() {
        let err: RelayError = ProtocolError::MissingRecipient(MessageKind::Offer).into();
        assert_eq!(
            err.client_message(),
            "Recipient is required for signaling messages"
        );
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", RelayError::Conflict("screen share active".to_string())),
            "Conflict: screen share active"
        );
        assert_eq!(
            format!("{}", RelayError::NotFound("Join request not found".to_string())),
            "Not found: Join request not found"
        );
    }

    #[tokio::test]
    async fn test_unauthorized_response_has_www_authenticate() {
        let response = RelayError::Unauthorized("missing token".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let header = response
            .headers()
            .get("WWW-Authenticate")
            .expect("header present")
            .to_str()
            .unwrap()
            .to_string();
        assert!(header.contains("invalid_token"));

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
        assert_eq!(body["error"]["message"], "Invalid or expired token");
    }

    #[tokio::test]
    async fn test_internal_response_is_generic() {
        let response = RelayError::Internal("registry mailbox closed".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get("WWW-Authenticate").is_none());

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body["error"]["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn test_bad_request_response() {
        let response = RelayError::BadRequest("Invalid meeting ID".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["message"], "Invalid meeting ID");
    }
}
