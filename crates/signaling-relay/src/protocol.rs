//! Signaling wire protocol.
//!
//! Every frame is a JSON object:
//!
//! ```text
//! { "type": "<kind>", "from": "<uuid>", "to": "<uuid>", "meeting_id": "<uuid>", "data": {...} }
//! ```
//!
//! Inbound frames are decoded once, at the connection boundary, into a
//! [`ClientMessage`]. `from` and `meeting_id` on inbound frames are ignored;
//! the relay stamps both from the connection's identity. Outbound frames are
//! built from a [`ServerMessage`] and an [`Envelope`].

use common::types::{RoomId, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

// =============================================================================
// Client-facing messages
// =============================================================================

/// Error text sent when a negotiation message names no recipient.
pub const MISSING_RECIPIENT_MESSAGE: &str = "Recipient is required for signaling messages";

/// Error text sent for unknown or server-only kinds.
pub const UNKNOWN_KIND_MESSAGE: &str = "Unknown message type";

/// Error text sent when the host named in a join request is not connected.
pub const HOST_UNAVAILABLE_MESSAGE: &str = "Host is not available";

/// Error text sent when a resolver names a request that does not exist.
pub const REQUEST_NOT_FOUND_MESSAGE: &str = "Join request not found";

/// Error text sent when a screen share cannot be started.
pub const SCREEN_SHARE_FAILED_MESSAGE: &str = "Failed to start screen sharing";

/// Notice sent with `join-approved` when a returning user skips the host.
pub const AUTO_APPROVED_MESSAGE: &str = "Auto-approved (returning user)";

/// Notice sent with `join-approved` after a host approval.
pub const APPROVED_MESSAGE: &str = "Your join request has been approved";

/// Notice sent with `join-rejected`.
pub const REJECTED_MESSAGE: &str = "Your join request has been rejected";

/// Notice sent with `join-request-pending`.
pub const PENDING_MESSAGE: &str = "Waiting for host approval";

// =============================================================================
// Message kinds
// =============================================================================

/// The closed vocabulary of message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Offer,
    Answer,
    IceCandidate,
    Join,
    Leave,
    PeerJoined,
    PeerLeft,
    MediaStateChanged,
    HostJoin,
    JoinRequest,
    JoinRequestPending,
    PendingJoinRequest,
    ApproveJoinRequest,
    RejectJoinRequest,
    JoinApproved,
    JoinRejected,
    ScreenShareStarted,
    ScreenShareStopped,
    Ready,
    Error,
    /// Any `type` string outside the vocabulary.
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Offer => "offer",
            MessageKind::Answer => "answer",
            MessageKind::IceCandidate => "ice-candidate",
            MessageKind::Join => "join",
            MessageKind::Leave => "leave",
            MessageKind::PeerJoined => "peer-joined",
            MessageKind::PeerLeft => "peer-left",
            MessageKind::MediaStateChanged => "media-state-changed",
            MessageKind::HostJoin => "host-join",
            MessageKind::JoinRequest => "join-request",
            MessageKind::JoinRequestPending => "join-request-pending",
            MessageKind::PendingJoinRequest => "pending-join-request",
            MessageKind::ApproveJoinRequest => "approve-join-request",
            MessageKind::RejectJoinRequest => "reject-join-request",
            MessageKind::JoinApproved => "join-approved",
            MessageKind::JoinRejected => "join-rejected",
            MessageKind::ScreenShareStarted => "screen-share-started",
            MessageKind::ScreenShareStopped => "screen-share-stopped",
            MessageKind::Ready => "ready",
            MessageKind::Error => "error",
            MessageKind::Unknown => "unknown",
        }
    }

    /// Negotiation kinds must name a recipient.
    #[must_use]
    pub const fn requires_recipient(&self) -> bool {
        matches!(
            self,
            MessageKind::Offer | MessageKind::Answer | MessageKind::IceCandidate
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// SDP type of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// `RTCSessionDescriptionInit` as sent by browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    #[serde(default)]
    pub sdp: String,
}

/// `RTCIceCandidateInit` as sent by browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Media toggle announced by a participant. Fields the relay does not know
/// about are carried through to the other peers unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_enabled: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Body of a `join-request`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JoinRequestPayload {
    pub host_user_id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

/// Body of `approve-join-request` and `reject-join-request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AdmissionTarget {
    pub user_id: UserId,
}

/// Body of a client `screen-share-started`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScreenShareRequest {
    #[serde(default)]
    pub username: Option<String>,
}

/// A participant as other participants see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub user_id: UserId,
    pub username: String,
}

/// An outstanding admission request, as shown to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequestInfo {
    pub user_id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Unix epoch seconds.
    pub timestamp: i64,
}

/// Current screen-share owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenShareInfo {
    pub user_id: UserId,
    pub username: String,
    /// Unix epoch seconds.
    pub timestamp: i64,
}

/// Body of a server `screen-share-stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenShareStopped {
    pub user_id: UserId,
}

/// Free-text body for `error`, `join-approved`, `join-rejected` and
/// `join-request-pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub message: String,
}

impl Notice {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// =============================================================================
// Decode errors
// =============================================================================

/// Reasons an inbound frame could not become a [`ClientMessage`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The kind is outside the vocabulary or only the server may send it.
    #[error("unsupported message kind: {0}")]
    UnknownKind(MessageKind),

    /// A negotiation message without `to`.
    #[error("{0} requires a recipient")]
    MissingRecipient(MessageKind),

    /// The `data` field does not match the kind.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: MessageKind, reason: String },
}

impl ProtocolError {
    /// Text sent back to the client in an `error` message.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ProtocolError::UnknownKind(_) => UNKNOWN_KIND_MESSAGE.to_string(),
            ProtocolError::MissingRecipient(_) => MISSING_RECIPIENT_MESSAGE.to_string(),
            ProtocolError::InvalidPayload { kind, .. } => match kind {
                MessageKind::JoinRequest => "Invalid join request data".to_string(),
                MessageKind::ApproveJoinRequest => "Invalid approval data".to_string(),
                MessageKind::RejectJoinRequest => "Invalid rejection data".to_string(),
                MessageKind::ScreenShareStarted => "Invalid screen share data".to_string(),
                other => format!("Invalid {other} data"),
            },
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Raw inbound frame. Fields other than these are ignored.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub to: Option<UserId>,
    #[serde(default)]
    pub data: Value,
}

/// A decoded client message with a typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Offer {
        to: UserId,
        description: SessionDescription,
    },
    Answer {
        to: UserId,
        description: SessionDescription,
    },
    IceCandidate {
        to: UserId,
        candidate: IceCandidate,
    },
    /// Broadcast unless `to` is set.
    MediaStateChanged {
        to: Option<UserId>,
        state: MediaState,
    },
    HostJoin,
    JoinRequest(JoinRequestPayload),
    ApproveJoinRequest(AdmissionTarget),
    RejectJoinRequest(AdmissionTarget),
    ScreenShareStarted(ScreenShareRequest),
    ScreenShareStopped,
    Join,
    Leave,
}

impl ClientMessage {
    /// Parse and decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Malformed`] when the text is not a frame at all,
    /// and [`DecodeError::Protocol`] when the frame is well-formed JSON but not
    /// an acceptable client message.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let frame: InboundFrame = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
        Self::decode(frame).map_err(DecodeError::Protocol)
    }

    /// Decode a parsed frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for unknown or server-only kinds, missing
    /// recipients and payloads that do not match the kind.
    pub fn decode(frame: InboundFrame) -> Result<Self, ProtocolError> {
        let InboundFrame { kind, to, data } = frame;
        // A nil UUID recipient means broadcast.
        let to = to.filter(|id| !id.as_uuid().is_nil());

        if kind.requires_recipient() && to.is_none() {
            return Err(ProtocolError::MissingRecipient(kind));
        }

        match (kind, to) {
            (MessageKind::Offer, Some(to)) => Ok(ClientMessage::Offer {
                to,
                description: payload(kind, data)?,
            }),
            (MessageKind::Answer, Some(to)) => Ok(ClientMessage::Answer {
                to,
                description: payload(kind, data)?,
            }),
            (MessageKind::IceCandidate, Some(to)) => Ok(ClientMessage::IceCandidate {
                to,
                candidate: payload(kind, data)?,
            }),
            (MessageKind::MediaStateChanged, to) => Ok(ClientMessage::MediaStateChanged {
                to,
                state: payload(kind, data)?,
            }),
            (MessageKind::HostJoin, _) => Ok(ClientMessage::HostJoin),
            (MessageKind::JoinRequest, _) => Ok(ClientMessage::JoinRequest(payload(kind, data)?)),
            (MessageKind::ApproveJoinRequest, _) => {
                Ok(ClientMessage::ApproveJoinRequest(payload(kind, data)?))
            }
            (MessageKind::RejectJoinRequest, _) => {
                Ok(ClientMessage::RejectJoinRequest(payload(kind, data)?))
            }
            (MessageKind::ScreenShareStarted, _) => {
                let request = if data.is_null() {
                    ScreenShareRequest::default()
                } else {
                    payload(kind, data)?
                };
                Ok(ClientMessage::ScreenShareStarted(request))
            }
            (MessageKind::ScreenShareStopped, _) => Ok(ClientMessage::ScreenShareStopped),
            (MessageKind::Join, _) => Ok(ClientMessage::Join),
            (MessageKind::Leave, _) => Ok(ClientMessage::Leave),
            (other, _) => Err(ProtocolError::UnknownKind(other)),
        }
    }

    /// Kind this message was decoded from.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            ClientMessage::Offer { .. } => MessageKind::Offer,
            ClientMessage::Answer { .. } => MessageKind::Answer,
            ClientMessage::IceCandidate { .. } => MessageKind::IceCandidate,
            ClientMessage::MediaStateChanged { .. } => MessageKind::MediaStateChanged,
            ClientMessage::HostJoin => MessageKind::HostJoin,
            ClientMessage::JoinRequest(_) => MessageKind::JoinRequest,
            ClientMessage::ApproveJoinRequest(_) => MessageKind::ApproveJoinRequest,
            ClientMessage::RejectJoinRequest(_) => MessageKind::RejectJoinRequest,
            ClientMessage::ScreenShareStarted(_) => MessageKind::ScreenShareStarted,
            ClientMessage::ScreenShareStopped => MessageKind::ScreenShareStopped,
            ClientMessage::Join => MessageKind::Join,
            ClientMessage::Leave => MessageKind::Leave,
        }
    }
}

/// Why an inbound text frame was not dispatched.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not JSON, or missing `type`. Logged and skipped.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Reported back to the sender.
    #[error(transparent)]
    Protocol(ProtocolError),
}

fn payload<T: DeserializeOwned>(kind: MessageKind, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

// =============================================================================
// Outbound
// =============================================================================

/// A message the relay sends to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    MediaStateChanged(MediaState),
    PeerJoined(PeerInfo),
    PeerLeft(PeerInfo),
    /// Roster replay: every other admitted member.
    Ready(Vec<PeerInfo>),
    JoinRequestPending(Notice),
    PendingJoinRequest(JoinRequestInfo),
    JoinApproved(Notice),
    JoinRejected(Notice),
    ScreenShareStarted(ScreenShareInfo),
    ScreenShareStopped(ScreenShareStopped),
    Error(Notice),
}

impl ServerMessage {
    /// Build an `error` message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(Notice::new(message))
    }

    /// Wire kind of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            ServerMessage::Offer(_) => MessageKind::Offer,
            ServerMessage::Answer(_) => MessageKind::Answer,
            ServerMessage::IceCandidate(_) => MessageKind::IceCandidate,
            ServerMessage::MediaStateChanged(_) => MessageKind::MediaStateChanged,
            ServerMessage::PeerJoined(_) => MessageKind::PeerJoined,
            ServerMessage::PeerLeft(_) => MessageKind::PeerLeft,
            ServerMessage::Ready(_) => MessageKind::Ready,
            ServerMessage::JoinRequestPending(_) => MessageKind::JoinRequestPending,
            ServerMessage::PendingJoinRequest(_) => MessageKind::PendingJoinRequest,
            ServerMessage::JoinApproved(_) => MessageKind::JoinApproved,
            ServerMessage::JoinRejected(_) => MessageKind::JoinRejected,
            ServerMessage::ScreenShareStarted(_) => MessageKind::ScreenShareStarted,
            ServerMessage::ScreenShareStopped(_) => MessageKind::ScreenShareStopped,
            ServerMessage::Error(_) => MessageKind::Error,
        }
    }

    fn data(&self) -> Result<Value, serde_json::Error> {
        match self {
            ServerMessage::Offer(d) | ServerMessage::Answer(d) => serde_json::to_value(d),
            ServerMessage::IceCandidate(c) => serde_json::to_value(c),
            ServerMessage::MediaStateChanged(s) => serde_json::to_value(s),
            ServerMessage::PeerJoined(p) | ServerMessage::PeerLeft(p) => serde_json::to_value(p),
            ServerMessage::Ready(peers) => serde_json::to_value(peers),
            ServerMessage::JoinRequestPending(n)
            | ServerMessage::JoinApproved(n)
            | ServerMessage::JoinRejected(n)
            | ServerMessage::Error(n) => serde_json::to_value(n),
            ServerMessage::PendingJoinRequest(r) => serde_json::to_value(r),
            ServerMessage::ScreenShareStarted(s) => serde_json::to_value(s),
            ServerMessage::ScreenShareStopped(s) => serde_json::to_value(s),
        }
    }
}

/// Wire envelope. Used to encode outbound frames and, in tests, to read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    /// Stamp `message` for delivery in `room_id`.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the payload cannot be converted.
    pub fn outbound(
        room_id: RoomId,
        from: Option<UserId>,
        to: Option<UserId>,
        message: &ServerMessage,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: message.kind(),
            from,
            to,
            meeting_id: Some(room_id),
            data: message.data()?,
        })
    }

    /// Serialize to a text frame.
    ///
    /// # Errors
    ///
    /// Returns the serializer error.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize `data` as `T`.
    ///
    /// # Errors
    ///
    /// Returns the serializer error when `data` has a different shape.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user() -> UserId {
        "6f1c2b8e-3d4a-4b5c-9e6f-7a8b9c0d1e2f".parse().unwrap()
    }

    #[test]
    fn test_kind_wire_names() {
        for (kind, name) in [
            (MessageKind::IceCandidate, "ice-candidate"),
            (MessageKind::MediaStateChanged, "media-state-changed"),
            (MessageKind::PendingJoinRequest, "pending-join-request"),
            (MessageKind::ScreenShareStopped, "screen-share-stopped"),
            (MessageKind::Ready, "ready"),
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(name));
            assert_eq!(kind.as_str(), name);
        }
    }

    #[test]
    fn test_unrecognized_type_is_unknown() {
        let frame: InboundFrame =
            serde_json::from_value(json!({"type": "dance", "data": {}})).unwrap();
        assert_eq!(frame.kind, MessageKind::Unknown);
        assert_eq!(
            ClientMessage::decode(frame),
            Err(ProtocolError::UnknownKind(MessageKind::Unknown))
        );
    }

    #[test]
    fn test_server_only_kinds_are_rejected() {
        for kind in ["peer-joined", "ready", "join-approved", "error"] {
            let err = ClientMessage::parse(&json!({"type": kind}).to_string()).unwrap_err();
            match err {
                DecodeError::Protocol(e) => assert_eq!(e.client_message(), UNKNOWN_KIND_MESSAGE),
                DecodeError::Malformed(e) => panic!("unexpected malformed: {e}"),
            }
        }
    }

    #[test]
    fn test_offer_requires_recipient() {
        let frame = json!({
            "type": "offer",
            "data": {"type": "offer", "sdp": "v=0"}
        });
        let err = ClientMessage::decode(serde_json::from_value(frame).unwrap()).unwrap_err();

        assert_eq!(err, ProtocolError::MissingRecipient(MessageKind::Offer));
        assert_eq!(err.client_message(), MISSING_RECIPIENT_MESSAGE);
    }

    #[test]
    fn test_nil_recipient_counts_as_missing() {
        let frame = json!({
            "type": "answer",
            "to": "00000000-0000-0000-0000-000000000000",
            "data": {"type": "answer", "sdp": "v=0"}
        });
        let err = ClientMessage::decode(serde_json::from_value(frame).unwrap()).unwrap_err();
        assert_eq!(err, ProtocolError::MissingRecipient(MessageKind::Answer));
    }

    #[test]
    fn test_ice_candidate_decodes_browser_shape() {
        let text = json!({
            "type": "ice-candidate",
            "to": user(),
            "data": {
                "candidate": "candidate:1 1 udp 2122260223 10.0.0.1 54400 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            }
        })
        .to_string();

        let message = ClientMessage::parse(&text).unwrap();
        let ClientMessage::IceCandidate { to, candidate } = message else {
            panic!("expected ice candidate");
        };
        assert_eq!(to, user());
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_m_line_index, Some(0));
        assert!(candidate.username_fragment.is_none());
    }

    #[test]
    fn test_wire_from_and_meeting_id_are_ignored() {
        let text = json!({
            "type": "host-join",
            "from": "not-even-a-uuid",
            "meeting_id": 42
        })
        .to_string();
        assert_eq!(ClientMessage::parse(&text).unwrap(), ClientMessage::HostJoin);
    }

    #[test]
    fn test_join_request_payload() {
        let text = json!({
            "type": "join-request",
            "data": {"host_user_id": user(), "email": "bob@example.com"}
        })
        .to_string();

        let ClientMessage::JoinRequest(request) = ClientMessage::parse(&text).unwrap() else {
            panic!("expected join request");
        };
        assert_eq!(request.host_user_id, user());
        assert_eq!(request.email.as_deref(), Some("bob@example.com"));
    }

    #[test]
    fn test_join_request_with_bad_host_id() {
        let text = json!({"type": "join-request", "data": {"host_user_id": "nope"}}).to_string();
        let DecodeError::Protocol(err) = ClientMessage::parse(&text).unwrap_err() else {
            panic!("expected protocol error");
        };
        assert_eq!(err.client_message(), "Invalid join request data");
    }

    #[test]
    fn test_media_state_payload() {
        let muted = json!({"type": "media-state-changed", "data": {"audio_enabled": false}})
            .to_string();
        assert_eq!(
            ClientMessage::parse(&muted).unwrap(),
            ClientMessage::MediaStateChanged {
                to: None,
                state: MediaState {
                    audio_enabled: Some(false),
                    ..MediaState::default()
                },
            }
        );

        // An empty object is a valid (if uninformative) update
        let empty = json!({"type": "media-state-changed", "data": {}}).to_string();
        assert!(ClientMessage::parse(&empty).is_ok());

        let not_an_object = json!({"type": "media-state-changed", "data": "muted"}).to_string();
        assert!(matches!(
            ClientMessage::parse(&not_an_object),
            Err(DecodeError::Protocol(ProtocolError::InvalidPayload { .. }))
        ));
    }

    #[test]
    fn test_media_state_extra_fields_pass_through() {
        let text = json!({
            "type": "media-state-changed",
            "data": {"video_enabled": true, "is_screen_sharing": true, "layout": {"tile": 2}}
        })
        .to_string();
        let ClientMessage::MediaStateChanged { state, .. } = ClientMessage::parse(&text).unwrap()
        else {
            panic!("expected media-state-changed");
        };

        let envelope = Envelope::outbound(
            RoomId::new(),
            Some(user()),
            None,
            &ServerMessage::MediaStateChanged(state),
        )
        .unwrap();
        let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(
            value["data"],
            json!({"video_enabled": true, "is_screen_sharing": true, "layout": {"tile": 2}})
        );
    }

    #[test]
    fn test_screen_share_start_without_data() {
        let text = json!({"type": "screen-share-started"}).to_string();
        assert_eq!(
            ClientMessage::parse(&text).unwrap(),
            ClientMessage::ScreenShareStarted(ScreenShareRequest::default())
        );
    }

    #[test]
    fn test_non_json_is_malformed() {
        assert!(matches!(
            ClientMessage::parse("{not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"data": {}}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_outbound_envelope_shape() {
        let room = RoomId::new();
        let message = ServerMessage::PeerJoined(PeerInfo {
            user_id: user(),
            username: "Alice".to_string(),
        });

        let envelope = Envelope::outbound(room, Some(user()), None, &message).unwrap();
        let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "peer-joined");
        assert_eq!(value["from"], json!(user()));
        assert_eq!(value["meeting_id"], json!(room));
        assert_eq!(value["data"]["username"], "Alice");
        assert!(value.get("to").is_none());
    }

    #[test]
    fn test_ready_carries_peer_list() {
        let message = ServerMessage::Ready(vec![PeerInfo {
            user_id: user(),
            username: "Alice".to_string(),
        }]);
        let envelope = Envelope::outbound(RoomId::new(), None, None, &message).unwrap();

        let peers: Vec<PeerInfo> = envelope.data_as().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].user_id, user());
    }

    #[test]
    fn test_empty_ready_still_has_data() {
        let envelope =
            Envelope::outbound(RoomId::new(), None, None, &ServerMessage::Ready(Vec::new()))
                .unwrap();
        let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["data"], json!([]));
    }
}
