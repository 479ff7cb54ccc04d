//! # Relay Test Utilities
//!
//! Shared test utilities for the signaling relay.
//!
//! ## Modules
//!
//! - `fixtures` - Test users that mint access tokens
//! - `server` - In-process relay on an ephemeral port
//! - `client` - WebSocket client with envelope assertions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = TestServer::start().await;
//!     let room = test_room();
//!     let host = TestUser::new("Host");
//!
//!     let mut client = TestSignalingClient::connect(&server, room, &host).await;
//!     client.host_join().await;
//!     client.expect_kind(MessageKind::Ready).await;
//! }
//! ```

pub mod client;
pub mod fixtures;
pub mod server;

pub use client::TestSignalingClient;
pub use fixtures::{test_room, TestUser, TEST_JWT_ISSUER, TEST_JWT_SECRET};
pub use server::TestServer;
pub use signaling_relay::protocol::MessageKind;
