//! Room event stream (SSE) tests.
//!
//! The stream is opened through the router with `oneshot`, while the
//! membership changes that feed it come from real WebSocket clients against
//! the same registry.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use relay_test_utils::{test_room, MessageKind, TestServer, TestSignalingClient, TestUser};
use serde_json::Value;
use signaling_relay::events::RoomEvent;
use tower::ServiceExt;

/// Accumulates SSE text until complete events can be read.
struct EventReader {
    body: Body,
    buffer: String,
}

impl EventReader {
    /// Next `(event, data)` pair, ignoring keep-alive comments.
    async fn next_event(&mut self) -> (String, String) {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                let mut event = String::new();
                let mut data = String::new();
                for line in block.lines() {
                    if let Some(v) = line.strip_prefix("event:") {
                        event = v.trim().to_string();
                    } else if let Some(v) = line.strip_prefix("data:") {
                        data.push_str(v.trim_start());
                    }
                }
                if event.is_empty() && data.is_empty() {
                    continue;
                }
                return (event, data);
            }

            let frame = tokio::time::timeout(Duration::from_secs(5), self.body.frame())
                .await
                .expect("no SSE data within 5s")
                .expect("stream ended")
                .expect("body error");
            if let Ok(bytes) = frame.into_data() {
                self.buffer.push_str(&String::from_utf8_lossy(&bytes));
            }
        }
    }
}

async fn open_stream(server: &TestServer, path: &str, token: Option<&str>) -> (StatusCode, Body) {
    let mut request = Request::builder().uri(path);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = server
        .router()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    (response.status(), response.into_body())
}

#[tokio::test]
async fn test_stream_reports_membership_changes() {
    let server = TestServer::start().await;
    let room = test_room();
    let watcher = TestUser::new("Watcher");
    let host_user = TestUser::new("Host");

    let (status, body) = open_stream(
        &server,
        &format!("/api/v1/meetings/{room}/events"),
        Some(&watcher.token()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let mut reader = EventReader {
        body,
        buffer: String::new(),
    };

    let (event, data) = reader.next_event().await;
    assert_eq!(event, "connected");
    let data: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(data["message"], "Connected to meeting events");
    assert_eq!(server.events().subscriber_count(room), 1);

    // Awaiting connections are not participants yet
    let mut host = TestSignalingClient::connect(&server, room, &host_user).await;
    host.host_join().await;
    host.expect_kind(MessageKind::Ready).await;

    let (event, data) = reader.next_event().await;
    assert_eq!(event, "participant_joined");
    let joined: RoomEvent = serde_json::from_str(&data).unwrap();
    assert_eq!(joined.data["user_id"], host_user.user_id.to_string());
    assert_eq!(joined.data["username"], "Host");

    host.send_kind("screen-share-started", None, serde_json::json!({}))
        .await;
    host.expect_kind(MessageKind::ScreenShareStarted).await;
    let (event, _) = reader.next_event().await;
    assert_eq!(event, "screen_share_started");

    host.close().await;
    let (event, data) = reader.next_event().await;
    assert_eq!(event, "screen_share_stopped");
    let stopped: RoomEvent = serde_json::from_str(&data).unwrap();
    assert_eq!(stopped.data["user_id"], host_user.user_id.to_string());

    let (event, _) = reader.next_event().await;
    assert_eq!(event, "participant_left");

    // Dropping the body unsubscribes
    drop(reader);
    assert_eq!(server.events().subscriber_count(room), 0);
}

#[tokio::test]
async fn test_stream_is_scoped_to_room() {
    let server = TestServer::start().await;
    let watched = test_room();
    let other = test_room();
    let watcher = TestUser::new("Watcher");

    let (_, body) = open_stream(
        &server,
        &format!("/api/v1/meetings/{watched}/events"),
        Some(&watcher.token()),
    )
    .await;
    let mut reader = EventReader {
        body,
        buffer: String::new(),
    };
    assert_eq!(reader.next_event().await.0, "connected");

    let mut elsewhere = TestSignalingClient::connect(&server, other, &TestUser::new("Else")).await;
    elsewhere.host_join().await;
    elsewhere.expect_kind(MessageKind::Ready).await;

    let mut here = TestSignalingClient::connect(&server, watched, &TestUser::new("Here")).await;
    here.host_join().await;
    here.expect_kind(MessageKind::Ready).await;

    // The first event seen is from the watched room
    let (event, data) = reader.next_event().await;
    assert_eq!(event, "participant_joined");
    let joined: RoomEvent = serde_json::from_str(&data).unwrap();
    assert_eq!(joined.data["username"], "Here");
}

#[tokio::test]
async fn test_own_join_is_not_echoed_to_own_stream() {
    let server = TestServer::start().await;
    let room = test_room();
    let alice_user = TestUser::new("Alice");

    let (_, body) = open_stream(
        &server,
        &format!("/api/v1/meetings/{room}/events"),
        Some(&alice_user.token()),
    )
    .await;
    let mut reader = EventReader {
        body,
        buffer: String::new(),
    };
    assert_eq!(reader.next_event().await.0, "connected");

    let mut alice = TestSignalingClient::connect(&server, room, &alice_user).await;
    alice.host_join().await;
    alice.expect_kind(MessageKind::Ready).await;

    let mut bob = TestSignalingClient::connect(&server, room, &TestUser::new("Bob")).await;
    bob.host_join().await;
    bob.expect_kind(MessageKind::Ready).await;

    // Alice's stream skips her own join and sees Bob's
    let (event, data) = reader.next_event().await;
    assert_eq!(event, "participant_joined");
    let joined: RoomEvent = serde_json::from_str(&data).unwrap();
    assert_eq!(joined.data["username"], "Bob");
}

#[tokio::test]
async fn test_stream_rejects_bad_requests() {
    let server = TestServer::start().await;
    let room = test_room();
    let user = TestUser::new("Watcher");

    let (status, _) = open_stream(&server, &format!("/api/v1/meetings/{room}/events"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = open_stream(
        &server,
        &format!("/api/v1/meetings/{room}/events"),
        Some(&user.expired_token()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = open_stream(
        &server,
        "/api/v1/meetings/not-a-room/events",
        Some(&user.token()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
