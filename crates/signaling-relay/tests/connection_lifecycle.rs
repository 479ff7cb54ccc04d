//! Connection lifecycle tests.
//!
//! Covers:
//! - Handshake authentication and room selection
//! - Heartbeat timeout of silent clients
//! - Superseding a user's earlier connection
//! - Explicit leave and registry shutdown

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use relay_test_utils::{test_room, MessageKind, TestServer, TestSignalingClient, TestUser};
use tokio::time::{sleep, Instant};
use tokio_tungstenite::tungstenite;

const QUIET: Duration = Duration::from_millis(200);

fn handshake_status(result: Result<impl Sized, tungstenite::Error>) -> u16 {
    match result {
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("expected an HTTP rejection, got {other}"),
        Ok(_) => panic!("expected the handshake to be rejected"),
    }
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_handshake_requires_valid_token() {
    let server = TestServer::start().await;
    let room = test_room();
    let user = TestUser::new("Alice");

    let no_token = format!("ws://{}/ws?meeting_id={room}", server.addr());
    assert_eq!(
        handshake_status(TestSignalingClient::try_connect_url(&no_token).await),
        401
    );

    let expired = server.ws_url(room, &user.expired_token());
    assert_eq!(
        handshake_status(TestSignalingClient::try_connect_url(&expired).await),
        401
    );

    let forged = server.ws_url(room, &user.forged_token());
    assert_eq!(
        handshake_status(TestSignalingClient::try_connect_url(&forged).await),
        401
    );

    // Nothing was registered
    assert!(server.registry().room_snapshot(room).await.unwrap().is_none());
}

#[tokio::test]
async fn test_handshake_requires_meeting_id() {
    let server = TestServer::start().await;
    let token = TestUser::new("Alice").token();

    let missing = format!("ws://{}/ws?token={token}", server.addr());
    assert_eq!(
        handshake_status(TestSignalingClient::try_connect_url(&missing).await),
        400
    );

    let garbage = format!("ws://{}/ws?meeting_id=lobby&token={token}", server.addr());
    assert_eq!(
        handshake_status(TestSignalingClient::try_connect_url(&garbage).await),
        400
    );
}

#[tokio::test]
async fn test_new_connection_starts_awaiting() {
    let server = TestServer::start().await;
    let room = test_room();
    let user = TestUser::new("Alice");

    let mut client = TestSignalingClient::connect(&server, room, &user).await;
    // No greeting until the client asks for something
    client.expect_silence(QUIET).await;

    let snapshot = server.registry().room_snapshot(room).await.unwrap().unwrap();
    assert_eq!(snapshot.awaiting, vec![user.user_id]);
    assert!(snapshot.admitted.is_empty());
}

// ============================================================================
// Heartbeat
// ============================================================================

#[tokio::test]
async fn test_silent_client_times_out() {
    let server = TestServer::start_with(|config| {
        config.pong_wait = Duration::from_millis(600);
    })
    .await;
    let room = test_room();

    // Never polled, so pings are never answered
    let _silent = TestSignalingClient::connect(&server, room, &TestUser::new("Silent")).await;
    assert!(server.registry().room_snapshot(room).await.unwrap().is_some());

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if server.registry().room_snapshot(room).await.unwrap().is_none() {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "silent connection was not reaped"
        );
        sleep(Duration::from_millis(50)).await;
    }
}

// ============================================================================
// Supersede, leave, shutdown
// ============================================================================

#[tokio::test]
async fn test_reconnect_supersedes_previous_connection() {
    let server = TestServer::start().await;
    let room = test_room();
    let host_user = TestUser::new("Host");

    let mut observer = TestSignalingClient::connect(&server, room, &TestUser::new("Observer")).await;
    let mut first = TestSignalingClient::connect(&server, room, &host_user).await;
    first.host_join().await;
    first.expect_kind(MessageKind::Ready).await;
    observer.host_join().await;
    observer.expect_kind(MessageKind::Ready).await;
    first.expect_kind(MessageKind::PeerJoined).await;

    let mut second = TestSignalingClient::connect(&server, room, &host_user).await;
    first.expect_closed(Duration::from_secs(3)).await;

    // The old connection departed as an admitted member
    let left = observer.expect_kind(MessageKind::PeerLeft).await;
    assert_eq!(left.from, Some(host_user.user_id));

    // The new connection is awaiting and the old teardown left it alone
    sleep(QUIET).await;
    let snapshot = server.registry().room_snapshot(room).await.unwrap().unwrap();
    assert_eq!(snapshot.awaiting, vec![host_user.user_id]);

    second.host_join().await;
    second.expect_kind(MessageKind::Ready).await;
    observer.expect_kind(MessageKind::PeerJoined).await;
}

#[tokio::test]
async fn test_leave_closes_connection() {
    let server = TestServer::start().await;
    let room = test_room();
    let leaver_user = TestUser::new("Leaver");

    let mut stayer = TestSignalingClient::connect(&server, room, &TestUser::new("Stayer")).await;
    stayer.host_join().await;
    stayer.expect_kind(MessageKind::Ready).await;

    let mut leaver = TestSignalingClient::connect(&server, room, &leaver_user).await;
    leaver.host_join().await;
    leaver.expect_kind(MessageKind::Ready).await;
    stayer.expect_kind(MessageKind::PeerJoined).await;

    leaver.send_kind("leave", None, serde_json::Value::Null).await;
    leaver.expect_closed(Duration::from_secs(3)).await;

    let left = stayer.expect_kind(MessageKind::PeerLeft).await;
    assert_eq!(left.from, Some(leaver_user.user_id));
    stayer.expect_silence(QUIET).await;
}

#[tokio::test]
async fn test_last_member_leaving_discards_room() {
    let server = TestServer::start().await;
    let room = test_room();

    let client = TestSignalingClient::connect(&server, room, &TestUser::new("Only")).await;
    assert!(server.registry().room_snapshot(room).await.unwrap().is_some());
    client.close().await;

    let deadline = Instant::now() + Duration::from_secs(3);
    while server.registry().room_snapshot(room).await.unwrap().is_some() {
        assert!(Instant::now() < deadline, "room was not discarded");
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.registry().metrics().snapshot().rooms_active, 0);
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let server = TestServer::start().await;
    let room = test_room();

    let mut client = TestSignalingClient::connect(&server, room, &TestUser::new("Alice")).await;
    client.host_join().await;
    client.expect_kind(MessageKind::Ready).await;

    server.shutdown();
    client.expect_closed(Duration::from_secs(3)).await;
}
