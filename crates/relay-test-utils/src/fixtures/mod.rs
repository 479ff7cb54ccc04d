//! Pre-configured test data fixtures for relay testing.
//!
//! Provides:
//! - Test users that mint HS256 access tokens
//! - Shared secret and issuer matching [`crate::server::TestServer`]

use chrono::Utc;
use common::types::{RoomId, UserId};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use uuid::Uuid;

/// HS256 secret used by every test server.
pub const TEST_JWT_SECRET: &str = "relay-test-secret-do-not-use-in-production";

/// Issuer the test server expects.
pub const TEST_JWT_ISSUER: &str = "meet-app";

/// Test user fixture.
#[derive(Debug, Clone)]
pub struct TestUser {
    /// User ID carried in the token.
    pub user_id: UserId,
    /// Display name.
    pub username: String,
    /// Contact address.
    pub email: String,
}

impl TestUser {
    /// Create a new test user with a random ID.
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        let username = username.into();
        let email = format!("{}@example.com", username.to_lowercase());
        Self {
            user_id: UserId::new(),
            username,
            email,
        }
    }

    /// Create a test user with a random name.
    #[must_use]
    pub fn random() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self::new(format!("user-{}", suffix.get(..8).unwrap_or("x")))
    }

    /// Set an explicit user ID (for reconnect tests).
    #[must_use]
    pub fn with_id(mut self, user_id: UserId) -> Self {
        self.user_id = user_id;
        self
    }

    /// A valid token for the test server, expiring in one hour.
    #[must_use]
    pub fn token(&self) -> String {
        let now = Utc::now().timestamp();
        self.token_with_times(now, now + 3600)
    }

    /// A token that expired ten minutes ago.
    #[must_use]
    pub fn expired_token(&self) -> String {
        let now = Utc::now().timestamp();
        self.token_with_times(now - 7200, now - 600)
    }

    /// A token signed with the wrong secret.
    #[must_use]
    pub fn forged_token(&self) -> String {
        let now = Utc::now().timestamp();
        sign(&self.claims(now, now + 3600), "not-the-test-secret")
    }

    fn token_with_times(&self, iat: i64, exp: i64) -> String {
        sign(&self.claims(iat, exp), TEST_JWT_SECRET)
    }

    fn claims(&self, iat: i64, exp: i64) -> serde_json::Value {
        json!({
            "user_id": self.user_id,
            "email": self.email,
            "username": self.username,
            "iat": iat,
            "exp": exp,
            "iss": TEST_JWT_ISSUER,
        })
    }
}

fn sign(claims: &serde_json::Value, secret: &str) -> String {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("HS256 signing of test claims cannot fail")
}

/// A fresh room ID.
#[must_use]
pub fn test_room() -> RoomId {
    RoomId::new()
}
