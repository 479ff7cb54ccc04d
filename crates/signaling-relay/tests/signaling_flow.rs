//! End-to-end negotiation and screen-share tests.
//!
//! Covers:
//! - Directed offer/answer/candidate relay with the sender stamped
//! - Media-state broadcast
//! - Frame validation replies
//! - Screen-share ownership, replay and release on disconnect

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use relay_test_utils::{test_room, MessageKind, TestServer, TestSignalingClient, TestUser};
use serde_json::json;
use signaling_relay::protocol::{ScreenShareInfo, ScreenShareStopped};

const QUIET: Duration = Duration::from_millis(200);

/// Host plus one approved guest in a fresh room, with all admission traffic
/// already drained.
async fn two_party_room(server: &TestServer) -> (TestSignalingClient, TestSignalingClient) {
    let room = test_room();
    let host_user = TestUser::new("Host");
    let guest_user = TestUser::new("Guest");

    let mut host = TestSignalingClient::connect(server, room, &host_user).await;
    host.host_join().await;
    host.expect_kind(MessageKind::Ready).await;

    let mut guest = TestSignalingClient::connect(server, room, &guest_user).await;
    guest.request_to_join(host_user.user_id).await;
    guest.expect_kind(MessageKind::JoinRequestPending).await;
    host.expect_kind(MessageKind::PendingJoinRequest).await;
    host.approve(guest_user.user_id).await;
    guest.expect_kind(MessageKind::JoinApproved).await;
    guest.expect_kind(MessageKind::Ready).await;
    host.expect_kind(MessageKind::PeerJoined).await;

    (host, guest)
}

// ============================================================================
// Negotiation relay
// ============================================================================

#[tokio::test]
async fn test_offer_answer_candidate_relay() {
    let server = TestServer::start().await;
    let (mut host, mut guest) = two_party_room(&server).await;

    host.send_kind(
        "offer",
        Some(guest.user_id()),
        json!({ "type": "offer", "sdp": "v=0 host" }),
    )
    .await;
    let offer = guest.expect_kind(MessageKind::Offer).await;
    assert_eq!(offer.from, Some(host.user_id()));
    assert_eq!(offer.to, Some(guest.user_id()));
    assert_eq!(offer.meeting_id, Some(host.room_id));
    assert_eq!(offer.data["sdp"], "v=0 host");

    guest
        .send_kind(
            "answer",
            Some(host.user_id()),
            json!({ "type": "answer", "sdp": "v=0 guest" }),
        )
        .await;
    let answer = host.expect_kind(MessageKind::Answer).await;
    assert_eq!(answer.from, Some(guest.user_id()));
    assert_eq!(answer.data["type"], "answer");

    guest
        .send_kind(
            "ice-candidate",
            Some(host.user_id()),
            json!({ "candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host", "sdpMid": "0" }),
        )
        .await;
    let candidate = host.expect_kind(MessageKind::IceCandidate).await;
    assert_eq!(candidate.from, Some(guest.user_id()));
    assert_eq!(candidate.data["sdpMid"], "0");

    // Directed traffic never echoes back
    host.expect_silence(QUIET).await;
    guest.expect_silence(QUIET).await;
}

#[tokio::test]
async fn test_media_state_broadcast_excludes_sender() {
    let server = TestServer::start().await;
    let (mut host, mut guest) = two_party_room(&server).await;

    guest
        .send_kind(
            "media-state-changed",
            None,
            json!({ "audio_enabled": false, "is_screen_sharing": true }),
        )
        .await;

    let changed = host.expect_kind(MessageKind::MediaStateChanged).await;
    assert_eq!(changed.from, Some(guest.user_id()));
    assert_eq!(changed.to, None);
    assert_eq!(
        changed.data,
        json!({ "audio_enabled": false, "is_screen_sharing": true })
    );
    guest.expect_silence(QUIET).await;
}

#[tokio::test]
async fn test_offer_to_absent_peer_reports_error() {
    let server = TestServer::start().await;
    let (mut host, mut guest) = two_party_room(&server).await;
    let before = server
        .registry()
        .room_snapshot(host.room_id)
        .await
        .unwrap()
        .unwrap();

    host.send_kind(
        "offer",
        Some(TestUser::random().user_id),
        json!({ "type": "offer", "sdp": "v=0" }),
    )
    .await;

    host.expect_error("Recipient is not available").await;
    guest.expect_silence(QUIET).await;

    let after = server
        .registry()
        .room_snapshot(host.room_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.awaiting, before.awaiting);
    assert_eq!(after.admitted, before.admitted);
    assert_eq!(server.registry().metrics().snapshot().deliveries_dropped, 1);
}

// ============================================================================
// Frame validation
// ============================================================================

#[tokio::test]
async fn test_invalid_frames() {
    let server = TestServer::start().await;
    let (mut host, mut guest) = two_party_room(&server).await;

    // Not JSON at all: skipped without a reply
    host.send_text("{{ not json").await;
    host.expect_silence(QUIET).await;

    host.send_kind("teleport", None, json!({})).await;
    host.expect_error("Unknown message type").await;

    // Server-only kinds are not accepted from clients
    host.send_kind("peer-joined", None, json!({})).await;
    host.expect_error("Unknown message type").await;

    host.send_kind("offer", None, json!({ "type": "offer", "sdp": "v=0" }))
        .await;
    host.expect_error("Recipient is required for signaling messages")
        .await;

    host.send_kind(
        "ice-candidate",
        Some("00000000-0000-0000-0000-000000000000".parse().unwrap()),
        json!({ "candidate": "c" }),
    )
    .await;
    host.expect_error("Recipient is required for signaling messages")
        .await;

    // The connection survives all of it
    host.send_kind(
        "offer",
        Some(guest.user_id()),
        json!({ "type": "offer", "sdp": "v=0" }),
    )
    .await;
    guest.expect_kind(MessageKind::Offer).await;
}

#[tokio::test]
async fn test_awaiting_client_cannot_signal() {
    let server = TestServer::start().await;
    let (mut host, _guest) = two_party_room(&server).await;

    let mut lurker =
        TestSignalingClient::connect(&server, host.room_id, &TestUser::new("Lurker")).await;
    lurker
        .send_kind(
            "offer",
            Some(host.user_id()),
            json!({ "type": "offer", "sdp": "v=0" }),
        )
        .await;

    lurker.expect_kind(MessageKind::Error).await;
    host.expect_silence(QUIET).await;
}

// ============================================================================
// Screen share
// ============================================================================

#[tokio::test]
async fn test_screen_share_lifecycle() {
    let server = TestServer::start().await;
    let (mut host, mut guest) = two_party_room(&server).await;

    let host_id = host.user_id();
    host.send_kind("screen-share-started", None, json!({ "username": "Presenter" }))
        .await;

    // The sharer is told too
    for client in [&mut host, &mut guest] {
        let started = client.expect_kind(MessageKind::ScreenShareStarted).await;
        let info: ScreenShareInfo = started.data_as().unwrap();
        assert_eq!(info.username, "Presenter");
        assert_eq!(started.from, Some(host_id));
    }

    // A second sharer is refused
    guest.send_kind("screen-share-started", None, json!({})).await;
    guest.expect_error("Failed to start screen sharing").await;
    host.expect_silence(QUIET).await;

    // Stopping someone else's share does nothing
    guest.send_kind("screen-share-stopped", None, json!({})).await;
    host.expect_silence(QUIET).await;
    guest.expect_silence(QUIET).await;

    host.send_kind("screen-share-stopped", None, json!({})).await;
    let stopped = guest.expect_kind(MessageKind::ScreenShareStopped).await;
    let data: ScreenShareStopped = stopped.data_as().unwrap();
    assert_eq!(data.user_id, host_id);
    host.expect_silence(QUIET).await;

    // The slot is free again
    guest.send_kind("screen-share-started", None, json!({})).await;
    let started = host.expect_kind(MessageKind::ScreenShareStarted).await;
    let info: ScreenShareInfo = started.data_as().unwrap();
    assert_eq!(info.user_id, guest.user_id());
    assert_eq!(info.username, "Guest");
}

#[tokio::test]
async fn test_late_joiner_sees_active_share() {
    let server = TestServer::start().await;
    let (mut host, mut guest) = two_party_room(&server).await;

    guest.send_kind("screen-share-started", None, json!({})).await;
    host.expect_kind(MessageKind::ScreenShareStarted).await;
    guest.expect_kind(MessageKind::ScreenShareStarted).await;

    let late_user = TestUser::new("Late");
    let mut late = TestSignalingClient::connect(&server, host.room_id, &late_user).await;
    late.request_to_join(host.user_id()).await;
    late.expect_kind(MessageKind::JoinRequestPending).await;
    host.expect_kind(MessageKind::PendingJoinRequest).await;
    host.approve(late_user.user_id).await;

    late.expect_kind(MessageKind::JoinApproved).await;
    let roster = late.expect_kind(MessageKind::Ready).await;
    assert_eq!(roster.data.as_array().map(Vec::len), Some(2));
    let replay = late.expect_kind(MessageKind::ScreenShareStarted).await;
    assert_eq!(replay.from, Some(guest.user_id()));
    let info: ScreenShareInfo = replay.data_as().unwrap();
    assert_eq!(info.user_id, guest.user_id());
}

#[tokio::test]
async fn test_share_released_when_sharer_disconnects() {
    let server = TestServer::start().await;
    let (mut host, mut guest) = two_party_room(&server).await;
    let guest_id = guest.user_id();

    guest.send_kind("screen-share-started", None, json!({})).await;
    host.expect_kind(MessageKind::ScreenShareStarted).await;
    guest.expect_kind(MessageKind::ScreenShareStarted).await;

    guest.close().await;

    let stopped = host.expect_kind(MessageKind::ScreenShareStopped).await;
    let data: ScreenShareStopped = stopped.data_as().unwrap();
    assert_eq!(data.user_id, guest_id);
    let left = host.expect_kind(MessageKind::PeerLeft).await;
    assert_eq!(left.from, Some(guest_id));

    host.send_kind("screen-share-started", None, json!({})).await;
    host.expect_kind(MessageKind::ScreenShareStarted).await;
}
