//! Message types for the room registry actor.
//!
//! Every request carries a `oneshot` reply channel; the registry never
//! blocks on a reply being read.

use crate::client::{Client, ClientInfo};
use crate::delivery::DeliveryReport;
use crate::errors::RelayError;
use crate::protocol::{JoinRequestInfo, Notice, PeerInfo, ScreenShareInfo, ServerMessage};
use common::types::{ConnectionId, RoomId, UserId};
use tokio::sync::oneshot;

/// Messages sent to `RoomRegistry`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Register a new connection as awaiting admission.
    AddAwaiting {
        room_id: RoomId,
        client: Client,
        respond_to: oneshot::Sender<Result<(), RelayError>>,
    },

    /// Move a user from awaiting to admitted.
    Admit {
        room_id: RoomId,
        user_id: UserId,
        /// Sent to the newcomer before the roster, if present.
        approval: Option<Notice>,
        respond_to: oneshot::Sender<Result<AdmitOutcome, RelayError>>,
    },

    /// Unregister one connection. Stale ids are ignored.
    Remove {
        room_id: RoomId,
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<(), RelayError>>,
    },

    /// Record a join request and notify the host.
    RequestAdmission {
        room_id: RoomId,
        request: JoinRequestInfo,
        host_user_id: UserId,
        respond_to: oneshot::Sender<Result<RequestOutcome, RelayError>>,
    },

    /// Approve or reject an outstanding join request.
    ResolveAdmission {
        room_id: RoomId,
        resolver: UserId,
        requester: UserId,
        approve: bool,
        respond_to: oneshot::Sender<Result<Resolution, RelayError>>,
    },

    /// Deliver a signaling message, directed or broadcast.
    Route {
        sender: ClientInfo,
        recipient: Option<UserId>,
        message: ServerMessage,
        /// Broadcasts also reach the sender.
        include_sender: bool,
        respond_to: oneshot::Sender<Result<DeliveryReport, RelayError>>,
    },

    StartScreenShare {
        room_id: RoomId,
        user_id: UserId,
        username: Option<String>,
        respond_to: oneshot::Sender<Result<ScreenShareInfo, RelayError>>,
    },

    StopScreenShare {
        room_id: RoomId,
        user_id: UserId,
        respond_to: oneshot::Sender<Result<bool, RelayError>>,
    },

    /// Deliver a server message to one connection (errors, acks).
    Notify {
        room_id: RoomId,
        connection_id: ConnectionId,
        message: ServerMessage,
        respond_to: oneshot::Sender<Result<(), RelayError>>,
    },

    /// Read-only view of a room. `None` when the room does not exist.
    GetRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Option<RoomSnapshot>>,
    },

    /// Counts across all rooms.
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
}

/// Result of an admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// The user moved from awaiting to admitted.
    Admitted {
        peer: PeerInfo,
        report: DeliveryReport,
    },
    /// The user was already admitted; nothing was broadcast.
    AlreadyAdmitted { report: DeliveryReport },
    /// The user is not connected to the room.
    NotAwaiting,
}

impl AdmitOutcome {
    /// Whether this call performed the transition.
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmitOutcome::Admitted { .. })
    }
}

/// Result of recording a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOutcome {
    /// An earlier request from the same user was overwritten.
    pub replaced: bool,
    /// The named host was connected and received the request.
    pub host_notified: bool,
    pub report: DeliveryReport,
}

/// Result of approving or rejecting a join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Approved(AdmitOutcome),
    Rejected { report: DeliveryReport },
}

/// A connection leaving a room, by removal or by being superseded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub connection_id: ConnectionId,
    pub peer: PeerInfo,
    pub was_admitted: bool,
    /// The departing user held the screen-share token.
    pub share_released: bool,
    pub report: DeliveryReport,
}

/// Point-in-time view of one room. User id lists are sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub awaiting: Vec<UserId>,
    pub admitted: Vec<UserId>,
    pub pending_requests: Vec<UserId>,
    pub screen_share: Option<ScreenShareInfo>,
}

/// Registry-wide counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStatus {
    pub rooms: usize,
    pub connections: usize,
    pub is_shutting_down: bool,
}
