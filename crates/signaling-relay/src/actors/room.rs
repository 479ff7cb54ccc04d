//! Membership state for one room.
//!
//! `Room` is plain data owned by the registry actor; it never awaits and
//! never touches a transport. Every operation either mutates membership or
//! queues encoded frames onto member outboxes, and reports what it did so
//! the actor can update metrics and publish room events.
//!
//! A user id is in at most one of `awaiting` and `admitted`. The only
//! transition between them is `admit`.

use super::messages::{AdmitOutcome, Departure, RequestOutcome, Resolution, RoomSnapshot};
use crate::client::{Client, ClientInfo};
use crate::delivery::{DeliveryOutcome, DeliveryReport};
use crate::errors::RelayError;
use crate::protocol::{
    Envelope, JoinRequestInfo, Notice, PeerInfo, ScreenShareInfo, ScreenShareStopped,
    ServerMessage, APPROVED_MESSAGE, PENDING_MESSAGE, REJECTED_MESSAGE, REQUEST_NOT_FOUND_MESSAGE,
    SCREEN_SHARE_FAILED_MESSAGE,
};
use common::types::{ConnectionId, RoomId, UserId};
use std::collections::HashMap;
use tracing::{debug, error, warn};

pub(crate) struct Room {
    room_id: RoomId,
    awaiting: HashMap<UserId, Client>,
    admitted: HashMap<UserId, Client>,
    requests: HashMap<UserId, JoinRequestInfo>,
    screen_share: Option<ScreenShareInfo>,
}

impl Room {
    pub(crate) fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            awaiting: HashMap::new(),
            admitted: HashMap::new(),
            requests: HashMap::new(),
            screen_share: None,
        }
    }

    /// No connection in either set.
    pub(crate) fn is_empty(&self) -> bool {
        self.awaiting.is_empty() && self.admitted.is_empty()
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.awaiting.len() + self.admitted.len()
    }

    /// Insert `client` as awaiting admission. An existing connection for the
    /// same user, in either set, is superseded and departs.
    pub(crate) fn add_awaiting(&mut self, client: Client, announce_share_stop: bool) -> Option<Departure> {
        let user_id = client.user_id();

        let superseded = if let Some(old) = self.admitted.remove(&user_id) {
            Some(self.depart(old, true, announce_share_stop))
        } else {
            self.awaiting
                .remove(&user_id)
                .map(|old| self.depart(old, false, announce_share_stop))
        };

        if let Some(departure) = &superseded {
            debug!(
                target: "relay.registry",
                room_id = %self.room_id,
                user_id = %user_id,
                old_connection_id = %departure.connection_id,
                "Superseded existing connection"
            );
        }

        self.awaiting.insert(user_id, client);
        superseded
    }

    /// Promote `user_id` from awaiting to admitted.
    ///
    /// The newcomer receives `approval` (if any), then the roster and the
    /// current screen share. Every other admitted member receives
    /// `peer-joined`.
    pub(crate) fn admit(&mut self, user_id: UserId, approval: Option<Notice>) -> AdmitOutcome {
        let Some(client) = self.awaiting.remove(&user_id) else {
            if let Some(client) = self.admitted.get(&user_id) {
                let mut report = DeliveryReport::default();
                if let Some(notice) = approval {
                    report.record(self.send_direct(client, None, &ServerMessage::JoinApproved(notice)));
                }
                return AdmitOutcome::AlreadyAdmitted { report };
            }
            debug!(
                target: "relay.registry",
                room_id = %self.room_id,
                user_id = %user_id,
                "Admit ignored: user is not awaiting admission"
            );
            return AdmitOutcome::NotAwaiting;
        };

        // Admission settles any outstanding request
        self.requests.remove(&user_id);

        let mut report = DeliveryReport::default();
        if let Some(notice) = approval {
            report.record(self.send_direct(&client, None, &ServerMessage::JoinApproved(notice)));
        }

        let peer = client.info().peer_info();
        report = report.merge(self.broadcast(
            Some(user_id),
            Some(user_id),
            &ServerMessage::PeerJoined(peer.clone()),
        ));

        let roster: Vec<PeerInfo> = self
            .admitted
            .values()
            .map(|member| member.info().peer_info())
            .collect();
        let roster_size = roster.len();
        report.record(self.send_direct(&client, None, &ServerMessage::Ready(roster)));

        if let Some(share) = &self.screen_share {
            report.record(self.send_direct(
                &client,
                Some(share.user_id),
                &ServerMessage::ScreenShareStarted(share.clone()),
            ));
        }

        self.admitted.insert(user_id, client);

        debug!(
            target: "relay.registry",
            room_id = %self.room_id,
            user_id = %user_id,
            roster_size = roster_size,
            "Client admitted"
        );

        AdmitOutcome::Admitted { peer, report }
    }

    /// Remove the connection `connection_id` from whichever set holds it.
    /// Returns `None` when it is not (or no longer) registered.
    pub(crate) fn remove(
        &mut self,
        connection_id: ConnectionId,
        announce_share_stop: bool,
    ) -> Option<Departure> {
        let (user_id, was_admitted) = self.locate(connection_id)?;
        let client = if was_admitted {
            self.admitted.remove(&user_id)?
        } else {
            self.awaiting.remove(&user_id)?
        };

        self.requests.remove(&user_id);
        Some(self.depart(client, was_admitted, announce_share_stop))
    }

    /// Record a request and notify the requester and the named host.
    pub(crate) fn request_admission(
        &mut self,
        request: JoinRequestInfo,
        host_user_id: UserId,
    ) -> RequestOutcome {
        let requester = request.user_id;
        let replaced = self.requests.insert(requester, request.clone()).is_some();
        if replaced {
            warn!(
                target: "relay.registry",
                room_id = %self.room_id,
                user_id = %requester,
                "Join request replaced an outstanding request"
            );
        }

        let mut report = DeliveryReport::default();
        if let Some(outcome) = self.send_to(
            requester,
            None,
            &ServerMessage::JoinRequestPending(Notice::new(PENDING_MESSAGE)),
        ) {
            report.record(outcome);
        }

        let host_notified = match self.send_to(
            host_user_id,
            Some(requester),
            &ServerMessage::PendingJoinRequest(request),
        ) {
            Some(outcome) => {
                report.record(outcome);
                true
            }
            None => false,
        };

        RequestOutcome {
            replaced,
            host_notified,
            report,
        }
    }

    /// Settle the request of `requester`.
    ///
    /// # Errors
    ///
    /// - `PermissionDenied` if `resolver` is not admitted
    /// - `NotFound` if there is no outstanding request for `requester`
    pub(crate) fn resolve_admission(
        &mut self,
        resolver: UserId,
        requester: UserId,
        approve: bool,
    ) -> Result<Resolution, RelayError> {
        if !self.admitted.contains_key(&resolver) {
            return Err(RelayError::PermissionDenied(
                "Only admitted participants can resolve join requests".to_string(),
            ));
        }

        if self.requests.remove(&requester).is_none() {
            return Err(RelayError::NotFound(REQUEST_NOT_FOUND_MESSAGE.to_string()));
        }

        if approve {
            let outcome = self.admit(
                requester,
                Some(Notice::new(APPROVED_MESSAGE)),
            );
            return Ok(Resolution::Approved(outcome));
        }

        let mut report = DeliveryReport::default();
        if let Some(outcome) = self.send_to(
            requester,
            None,
            &ServerMessage::JoinRejected(Notice::new(REJECTED_MESSAGE)),
        ) {
            report.record(outcome);
        }
        Ok(Resolution::Rejected { report })
    }

    /// Deliver `message` for `sender`.
    ///
    /// Directed messages go to `recipient` in admitted or awaiting. Broadcasts
    /// go to every admitted member except the sender, unless
    /// `include_sender` is set. The sender's own connection must be the
    /// admitted one; a superseded connection of the same user is refused.
    ///
    /// # Errors
    ///
    /// - `PermissionDenied` if the sender connection is not admitted
    /// - `RecipientUnavailable` if the recipient is in neither set
    pub(crate) fn route(
        &self,
        sender: &ClientInfo,
        recipient: Option<UserId>,
        message: &ServerMessage,
        include_sender: bool,
    ) -> Result<DeliveryReport, RelayError> {
        let sender_admitted = self
            .admitted
            .get(&sender.user_id)
            .is_some_and(|client| client.connection_id() == sender.connection_id);
        if !sender_admitted {
            return Err(RelayError::PermissionDenied(
                "Only admitted participants can send signaling messages".to_string(),
            ));
        }
        let sender = Some(sender.user_id);

        match recipient {
            Some(to) => {
                let outcome = self
                    .send_to(to, sender, message)
                    .ok_or(RelayError::RecipientUnavailable(to))?;
                let mut report = DeliveryReport::default();
                report.record(outcome);
                Ok(report)
            }
            None => {
                let exclude = if include_sender { None } else { sender };
                Ok(self.broadcast(sender, exclude, message))
            }
        }
    }

    /// Take the screen-share token for `user_id`.
    ///
    /// Idempotent for the current owner.
    ///
    /// # Errors
    ///
    /// - `PermissionDenied` if the user is not admitted
    /// - `Conflict` if another user holds the token
    pub(crate) fn start_screen_share(
        &mut self,
        user_id: UserId,
        username: Option<String>,
        now: i64,
    ) -> Result<ScreenShareInfo, RelayError> {
        let Some(client) = self.admitted.get(&user_id) else {
            return Err(RelayError::PermissionDenied(
                "Only admitted participants can share their screen".to_string(),
            ));
        };

        match &self.screen_share {
            Some(current) if current.user_id != user_id => {
                debug!(
                    target: "relay.registry",
                    room_id = %self.room_id,
                    user_id = %user_id,
                    owner = %current.user_id,
                    "Screen share refused: another participant is sharing"
                );
                Err(RelayError::Conflict(SCREEN_SHARE_FAILED_MESSAGE.to_string()))
            }
            Some(current) => Ok(current.clone()),
            None => {
                let username = username
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| client.info().display_name.clone());
                let info = ScreenShareInfo {
                    user_id,
                    username,
                    timestamp: now,
                };
                self.screen_share = Some(info.clone());
                Ok(info)
            }
        }
    }

    /// Release the token if `user_id` holds it. Returns whether it did.
    pub(crate) fn stop_screen_share(&mut self, user_id: UserId) -> bool {
        if self
            .screen_share
            .as_ref()
            .is_some_and(|share| share.user_id == user_id)
        {
            self.screen_share = None;
            true
        } else {
            false
        }
    }

    /// Deliver a server message to one connection, wherever it is.
    pub(crate) fn notify(
        &self,
        connection_id: ConnectionId,
        message: &ServerMessage,
    ) -> Option<DeliveryOutcome> {
        let (user_id, was_admitted) = self.locate(connection_id)?;
        let client = if was_admitted {
            self.admitted.get(&user_id)
        } else {
            self.awaiting.get(&user_id)
        }?;
        Some(self.send_direct(client, None, message))
    }

    pub(crate) fn snapshot(&self) -> RoomSnapshot {
        let mut awaiting: Vec<UserId> = self.awaiting.keys().copied().collect();
        let mut admitted: Vec<UserId> = self.admitted.keys().copied().collect();
        let mut pending_requests: Vec<UserId> = self.requests.keys().copied().collect();
        awaiting.sort();
        admitted.sort();
        pending_requests.sort();

        RoomSnapshot {
            room_id: self.room_id,
            awaiting,
            admitted,
            pending_requests,
            screen_share: self.screen_share.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn locate(&self, connection_id: ConnectionId) -> Option<(UserId, bool)> {
        self.admitted
            .values()
            .find(|c| c.connection_id() == connection_id)
            .map(|c| (c.user_id(), true))
            .or_else(|| {
                self.awaiting
                    .values()
                    .find(|c| c.connection_id() == connection_id)
                    .map(|c| (c.user_id(), false))
            })
    }

    /// Release everything `client` held and tell the room it left. The
    /// client is dropped on return, closing its queue.
    fn depart(&mut self, client: Client, was_admitted: bool, announce_share_stop: bool) -> Departure {
        let user_id = client.user_id();
        let mut report = DeliveryReport::default();

        let share_released = self.stop_screen_share(user_id);
        if share_released && announce_share_stop && was_admitted {
            report = report.merge(self.broadcast(
                Some(user_id),
                Some(user_id),
                &ServerMessage::ScreenShareStopped(ScreenShareStopped { user_id }),
            ));
        }

        let peer = client.info().peer_info();
        if was_admitted {
            report = report.merge(self.broadcast(
                Some(user_id),
                Some(user_id),
                &ServerMessage::PeerLeft(peer.clone()),
            ));
        }

        Departure {
            connection_id: client.connection_id(),
            peer,
            was_admitted,
            share_released,
            report,
        }
    }

    /// Directed delivery: admitted first, then awaiting. `None` if the user
    /// is in neither set.
    fn send_to(
        &self,
        to: UserId,
        from: Option<UserId>,
        message: &ServerMessage,
    ) -> Option<DeliveryOutcome> {
        let client = self.admitted.get(&to).or_else(|| self.awaiting.get(&to))?;
        Some(self.send_direct(client, from, message))
    }

    fn send_direct(
        &self,
        client: &Client,
        from: Option<UserId>,
        message: &ServerMessage,
    ) -> DeliveryOutcome {
        match self.encode(from, Some(client.user_id()), message) {
            Some(frame) => client.deliver(frame),
            None => DeliveryOutcome::Dropped,
        }
    }

    /// Deliver to every admitted member except `exclude`.
    fn broadcast(
        &self,
        from: Option<UserId>,
        exclude: Option<UserId>,
        message: &ServerMessage,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let Some(frame) = self.encode(from, None, message) else {
            return report;
        };

        for (user_id, client) in &self.admitted {
            if Some(*user_id) == exclude {
                continue;
            }
            report.record(client.deliver(frame.clone()));
        }
        report
    }

    fn encode(
        &self,
        from: Option<UserId>,
        to: Option<UserId>,
        message: &ServerMessage,
    ) -> Option<String> {
        match Envelope::outbound(self.room_id, from, to, message).and_then(|e| e.to_json()) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!(
                    target: "relay.registry",
                    room_id = %self.room_id,
                    kind = %message.kind(),
                    error = %e,
                    "Failed to encode outbound message"
                );
                None
            }
        }
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
    use crate::protocol::{MessageKind, SdpType, SessionDescription};
    use tokio::sync::mpsc;

    struct Peer {
        info: ClientInfo,
        rx: mpsc::Receiver<String>,
    }

    impl Peer {
        fn drain(&mut self) -> Vec<Envelope> {
            let mut out = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                out.push(serde_json::from_str(&frame).unwrap());
            }
            out
        }

        fn kinds(&mut self) -> Vec<MessageKind> {
            self.drain().into_iter().map(|e| e.kind).collect()
        }

        fn is_closed(&mut self) -> bool {
            matches!(
                self.rx.try_recv(),
                Err(mpsc::error::TryRecvError::Disconnected)
            )
        }
    }

    fn connect(room: &mut Room, name: &str) -> Peer {
        connect_with_capacity(room, name, 16)
    }

    fn connect_with_capacity(room: &mut Room, name: &str, capacity: usize) -> Peer {
        let info = ClientInfo::new(UserId::new(), name, room.room_id);
        let (client, rx) = Client::new(info.clone(), capacity);
        assert!(room.add_awaiting(client, true).is_none());
        Peer { info, rx }
    }

    fn admitted(room: &mut Room, name: &str) -> Peer {
        let mut peer = connect(room, name);
        assert!(matches!(
            room.admit(peer.info.user_id, None),
            AdmitOutcome::Admitted { .. }
        ));
        peer.drain();
        peer
    }

    fn offer() -> ServerMessage {
        ServerMessage::Offer(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "v=0".to_string(),
        })
    }

    fn request_from(peer: &Peer) -> JoinRequestInfo {
        JoinRequestInfo {
            user_id: peer.info.user_id,
            username: peer.info.display_name.clone(),
            email: None,
            timestamp: 1_700_000_000,
        }
    }

    fn assert_exclusive(room: &Room) {
        for user in room.awaiting.keys() {
            assert!(
                !room.admitted.contains_key(user),
                "user {user} in both sets"
            );
        }
    }

    #[test]
    fn test_admit_sends_roster_and_peer_joined() {
        let mut room = Room::new(RoomId::new());
        let mut alice = admitted(&mut room, "Alice");
        let mut bob = admitted(&mut room, "Bob");
        alice.drain();

        let mut carol = connect(&mut room, "Carol");
        let outcome = room.admit(carol.info.user_id, None);
        let AdmitOutcome::Admitted { peer, report } = outcome else {
            panic!("expected admission");
        };
        assert_eq!(peer.username, "Carol");
        assert_eq!(report.delivered, 3);

        for existing in [&mut alice, &mut bob] {
            let frames = existing.drain();
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].kind, MessageKind::PeerJoined);
            assert_eq!(frames[0].from, Some(carol.info.user_id));
        }

        let frames = carol.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, MessageKind::Ready);
        let mut roster: Vec<UserId> = frames[0]
            .data_as::<Vec<PeerInfo>>()
            .unwrap()
            .into_iter()
            .map(|p| p.user_id)
            .collect();
        roster.sort();
        let mut expected = vec![alice.info.user_id, bob.info.user_id];
        expected.sort();
        assert_eq!(roster, expected);
        assert_exclusive(&room);
    }

    #[test]
    fn test_first_admit_gets_empty_roster() {
        let mut room = Room::new(RoomId::new());
        let mut host = connect(&mut room, "Host");
        room.admit(host.info.user_id, None);

        let frames = host.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, MessageKind::Ready);
        assert!(frames[0].data_as::<Vec<PeerInfo>>().unwrap().is_empty());
    }

    #[test]
    fn test_admit_unknown_user_is_noop() {
        let mut room = Room::new(RoomId::new());
        assert_eq!(room.admit(UserId::new(), None), AdmitOutcome::NotAwaiting);
        assert!(room.is_empty());
    }

    #[test]
    fn test_admit_twice_does_not_rebroadcast() {
        let mut room = Room::new(RoomId::new());
        let mut alice = admitted(&mut room, "Alice");
        let bob = admitted(&mut room, "Bob");
        alice.drain();

        assert!(matches!(
            room.admit(bob.info.user_id, None),
            AdmitOutcome::AlreadyAdmitted { .. }
        ));
        assert!(alice.drain().is_empty());
    }

    #[test]
    fn test_admit_replays_active_screen_share() {
        let mut room = Room::new(RoomId::new());
        let sharer = admitted(&mut room, "Sharer");
        let mut other = admitted(&mut room, "Other");
        room.start_screen_share(sharer.info.user_id, None, 1_700_000_123)
            .unwrap();
        other.drain();

        let mut late = connect(&mut room, "Late");
        room.admit(late.info.user_id, None);

        let frames = late.drain();
        assert_eq!(
            frames.iter().map(|f| f.kind).collect::<Vec<_>>(),
            vec![MessageKind::Ready, MessageKind::ScreenShareStarted]
        );
        let share: ScreenShareInfo = frames[1].data_as().unwrap();
        assert_eq!(share.user_id, sharer.info.user_id);
        assert_eq!(share.timestamp, 1_700_000_123);
        assert_eq!(frames[1].to, Some(late.info.user_id));

        // Replay is directed; existing members only see peer-joined
        assert_eq!(other.kinds(), vec![MessageKind::PeerJoined]);
    }

    #[test]
    fn test_remove_admitted_broadcasts_peer_left_once() {
        let mut room = Room::new(RoomId::new());
        let mut alice = admitted(&mut room, "Alice");
        let mut bob = admitted(&mut room, "Bob");
        alice.drain();

        let departure = room.remove(bob.info.connection_id, true).unwrap();
        assert!(departure.was_admitted);
        assert_eq!(alice.kinds(), vec![MessageKind::PeerLeft]);
        assert!(bob.is_closed());

        // Idempotent
        assert!(room.remove(bob.info.connection_id, true).is_none());
        assert!(alice.drain().is_empty());
    }

    #[test]
    fn test_remove_awaiting_is_silent() {
        let mut room = Room::new(RoomId::new());
        let mut alice = admitted(&mut room, "Alice");
        let mut guest = connect(&mut room, "Guest");
        room.request_admission(request_from(&guest), alice.info.user_id);
        alice.drain();

        let departure = room.remove(guest.info.connection_id, true).unwrap();
        assert!(!departure.was_admitted);
        assert!(alice.drain().is_empty());
        assert!(guest.is_closed());
        assert!(room.snapshot().pending_requests.is_empty());
    }

    #[test]
    fn test_last_member_leaving_empties_room() {
        let mut room = Room::new(RoomId::new());
        let alice = admitted(&mut room, "Alice");
        room.remove(alice.info.connection_id, true);
        assert!(room.is_empty());
    }

    #[test]
    fn test_reconnect_supersedes_old_connection() {
        let mut room = Room::new(RoomId::new());
        let mut alice = admitted(&mut room, "Alice");
        let mut old_bob = admitted(&mut room, "Bob");
        alice.drain();

        let new_info = ClientInfo::new(old_bob.info.user_id, "Bob", room.room_id);
        let (client, _rx) = Client::new(new_info.clone(), 16);
        let departure = room.add_awaiting(client, true).unwrap();

        assert_eq!(departure.connection_id, old_bob.info.connection_id);
        assert!(departure.was_admitted);
        assert!(old_bob.is_closed());
        assert_eq!(alice.kinds(), vec![MessageKind::PeerLeft]);

        let snapshot = room.snapshot();
        assert_eq!(snapshot.awaiting, vec![new_info.user_id]);
        assert!(!snapshot.admitted.contains(&new_info.user_id));

        // The old connection's teardown must not evict the new one
        assert!(room.remove(old_bob.info.connection_id, true).is_none());
        assert_eq!(room.snapshot().awaiting, vec![new_info.user_id]);
    }

    #[test]
    fn test_request_notifies_host_and_requester() {
        let mut room = Room::new(RoomId::new());
        let mut host = admitted(&mut room, "Host");
        let mut guest = connect(&mut room, "Guest");

        let outcome = room.request_admission(request_from(&guest), host.info.user_id);
        assert!(outcome.host_notified);
        assert!(!outcome.replaced);

        assert_eq!(guest.kinds(), vec![MessageKind::JoinRequestPending]);
        let frames = host.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, MessageKind::PendingJoinRequest);
        assert_eq!(frames[0].from, Some(guest.info.user_id));
        let info: JoinRequestInfo = frames[0].data_as().unwrap();
        assert_eq!(info.username, "Guest");
    }

    #[test]
    fn test_request_with_absent_host() {
        let mut room = Room::new(RoomId::new());
        let guest = connect(&mut room, "Guest");

        let outcome = room.request_admission(request_from(&guest), UserId::new());
        assert!(!outcome.host_notified);
        assert_eq!(room.snapshot().pending_requests, vec![guest.info.user_id]);
    }

    #[test]
    fn test_repeated_request_replaces() {
        let mut room = Room::new(RoomId::new());
        let host = admitted(&mut room, "Host");
        let guest = connect(&mut room, "Guest");

        room.request_admission(request_from(&guest), host.info.user_id);
        let second = room.request_admission(request_from(&guest), host.info.user_id);
        assert!(second.replaced);
        assert_eq!(room.snapshot().pending_requests.len(), 1);
    }

    #[test]
    fn test_approve_promotes_requester() {
        let mut room = Room::new(RoomId::new());
        let mut host = admitted(&mut room, "Host");
        let mut guest = connect(&mut room, "Guest");
        room.request_admission(request_from(&guest), host.info.user_id);
        host.drain();
        guest.drain();

        let resolution = room
            .resolve_admission(host.info.user_id, guest.info.user_id, true)
            .unwrap();
        assert!(matches!(
            resolution,
            Resolution::Approved(AdmitOutcome::Admitted { .. })
        ));

        assert_eq!(
            guest.kinds(),
            vec![MessageKind::JoinApproved, MessageKind::Ready]
        );
        assert_eq!(host.kinds(), vec![MessageKind::PeerJoined]);

        let snapshot = room.snapshot();
        assert!(snapshot.admitted.contains(&guest.info.user_id));
        assert!(snapshot.awaiting.is_empty());
        assert!(snapshot.pending_requests.is_empty());
        assert_exclusive(&room);
    }

    #[test]
    fn test_reject_leaves_membership_unchanged() {
        let mut room = Room::new(RoomId::new());
        let mut host = admitted(&mut room, "Host");
        let mut guest = connect(&mut room, "Guest");
        room.request_admission(request_from(&guest), host.info.user_id);
        host.drain();
        guest.drain();

        let resolution = room
            .resolve_admission(host.info.user_id, guest.info.user_id, false)
            .unwrap();
        assert!(matches!(resolution, Resolution::Rejected { .. }));

        let frames = guest.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, MessageKind::JoinRejected);
        assert_eq!(frames[0].to, Some(guest.info.user_id));
        assert!(host.drain().is_empty());

        let snapshot = room.snapshot();
        assert_eq!(snapshot.awaiting, vec![guest.info.user_id]);
        assert!(snapshot.pending_requests.is_empty());
    }

    #[test]
    fn test_resolve_missing_request_is_not_found() {
        let mut room = Room::new(RoomId::new());
        let host = admitted(&mut room, "Host");

        let err = room
            .resolve_admission(host.info.user_id, UserId::new(), true)
            .unwrap_err();
        assert!(matches!(err, RelayError::NotFound(ref m) if m == REQUEST_NOT_FOUND_MESSAGE));
    }

    #[test]
    fn test_resolve_twice_fails_second_time() {
        let mut room = Room::new(RoomId::new());
        let host = admitted(&mut room, "Host");
        let guest = connect(&mut room, "Guest");
        room.request_admission(request_from(&guest), host.info.user_id);

        room.resolve_admission(host.info.user_id, guest.info.user_id, false)
            .unwrap();
        assert!(room
            .resolve_admission(host.info.user_id, guest.info.user_id, true)
            .is_err());
        assert_eq!(room.snapshot().awaiting, vec![guest.info.user_id]);
    }

    #[test]
    fn test_awaiting_user_cannot_resolve() {
        let mut room = Room::new(RoomId::new());
        let host = admitted(&mut room, "Host");
        let guest = connect(&mut room, "Guest");
        let other = connect(&mut room, "Other");
        room.request_admission(request_from(&guest), host.info.user_id);

        let err = room
            .resolve_admission(other.info.user_id, guest.info.user_id, true)
            .unwrap_err();
        assert!(matches!(err, RelayError::PermissionDenied(_)));
        assert_eq!(room.snapshot().pending_requests, vec![guest.info.user_id]);
    }

    #[test]
    fn test_directed_route_reaches_only_recipient() {
        let mut room = Room::new(RoomId::new());
        let alice = admitted(&mut room, "Alice");
        let mut bob = admitted(&mut room, "Bob");
        let mut carol = admitted(&mut room, "Carol");
        bob.drain();
        carol.drain();

        let report = room
            .route(&alice.info, Some(bob.info.user_id), &offer(), false)
            .unwrap();
        assert_eq!(report.delivered, 1);

        let frames = bob.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].from, Some(alice.info.user_id));
        assert_eq!(frames[0].to, Some(bob.info.user_id));
        assert!(carol.drain().is_empty());
    }

    #[test]
    fn test_directed_route_to_awaiting_recipient() {
        let mut room = Room::new(RoomId::new());
        let alice = admitted(&mut room, "Alice");
        let mut guest = connect(&mut room, "Guest");

        room.route(&alice.info, Some(guest.info.user_id), &offer(), false)
            .unwrap();
        assert_eq!(guest.kinds(), vec![MessageKind::Offer]);
    }

    #[test]
    fn test_directed_route_to_absent_recipient_fails() {
        let mut room = Room::new(RoomId::new());
        let alice = admitted(&mut room, "Alice");
        let stranger = UserId::new();

        let err = room
            .route(&alice.info, Some(stranger), &offer(), false)
            .unwrap_err();
        assert!(matches!(err, RelayError::RecipientUnavailable(id) if id == stranger));
        assert_eq!(room.connection_count(), 1);
    }

    #[test]
    fn test_broadcast_excludes_sender_and_awaiting() {
        let mut room = Room::new(RoomId::new());
        let mut alice = admitted(&mut room, "Alice");
        let mut bob = admitted(&mut room, "Bob");
        let mut guest = connect(&mut room, "Guest");
        alice.drain();
        guest.drain();

        let report = room
            .route(&alice.info, None, &offer(), false)
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert!(alice.drain().is_empty());
        assert_eq!(bob.kinds(), vec![MessageKind::Offer]);
        assert!(guest.drain().is_empty());
    }

    #[test]
    fn test_awaiting_sender_cannot_route() {
        let mut room = Room::new(RoomId::new());
        let mut alice = admitted(&mut room, "Alice");
        let guest = connect(&mut room, "Guest");

        let err = room
            .route(&guest.info, Some(alice.info.user_id), &offer(), false)
            .unwrap_err();
        assert!(matches!(err, RelayError::PermissionDenied(_)));
        assert!(alice.drain().is_empty());
    }

    #[test]
    fn test_superseded_connection_cannot_route() {
        let mut room = Room::new(RoomId::new());
        let mut alice = admitted(&mut room, "Alice");
        let old_bob = admitted(&mut room, "Bob");

        let new_info = ClientInfo::new(old_bob.info.user_id, "Bob", room.room_id);
        let (client, _rx) = Client::new(new_info.clone(), 16);
        assert!(room.add_awaiting(client, true).is_some());
        assert!(room.admit(new_info.user_id, None).is_admitted());
        alice.drain();

        let err = room
            .route(&old_bob.info, Some(alice.info.user_id), &offer(), false)
            .unwrap_err();
        assert!(matches!(err, RelayError::PermissionDenied(_)));
        assert!(alice.drain().is_empty());

        // The live connection for the same user still routes
        room.route(&new_info, Some(alice.info.user_id), &offer(), false)
            .unwrap();
        assert_eq!(alice.kinds(), vec![MessageKind::Offer]);
    }

    #[test]
    fn test_full_queue_drops_only_that_delivery() {
        let mut room = Room::new(RoomId::new());
        let alice = admitted(&mut room, "Alice");
        let mut slow = connect_with_capacity(&mut room, "Slow", 1);
        room.admit(slow.info.user_id, None); // fills the queue with `ready`
        let mut fast = admitted(&mut room, "Fast");

        let report = room
            .route(&alice.info, None, &offer(), false)
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(fast.kinds(), vec![MessageKind::Offer]);
        // Slow still holds ready and possibly nothing else
        assert_eq!(slow.kinds(), vec![MessageKind::Ready]);
    }

    #[test]
    fn test_screen_share_is_exclusive() {
        let mut room = Room::new(RoomId::new());
        let owner = admitted(&mut room, "Owner");
        let other = admitted(&mut room, "Other");

        let info = room
            .start_screen_share(owner.info.user_id, Some("Owner's screen".to_string()), 10)
            .unwrap();
        assert_eq!(info.username, "Owner's screen");

        let err = room
            .start_screen_share(other.info.user_id, None, 11)
            .unwrap_err();
        assert!(matches!(err, RelayError::Conflict(ref m) if m == SCREEN_SHARE_FAILED_MESSAGE));
        assert_eq!(
            room.snapshot().screen_share.map(|s| s.user_id),
            Some(owner.info.user_id)
        );

        // Idempotent for the owner, original timestamp kept
        let again = room.start_screen_share(owner.info.user_id, None, 12).unwrap();
        assert_eq!(again.timestamp, 10);
    }

    #[test]
    fn test_screen_share_username_falls_back_to_display_name() {
        let mut room = Room::new(RoomId::new());
        let owner = admitted(&mut room, "Owner");
        let info = room
            .start_screen_share(owner.info.user_id, Some("  ".to_string()), 1)
            .unwrap();
        assert_eq!(info.username, "Owner");
    }

    #[test]
    fn test_awaiting_user_cannot_share() {
        let mut room = Room::new(RoomId::new());
        let guest = connect(&mut room, "Guest");
        assert!(matches!(
            room.start_screen_share(guest.info.user_id, None, 1),
            Err(RelayError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_stop_screen_share_only_by_owner() {
        let mut room = Room::new(RoomId::new());
        let owner = admitted(&mut room, "Owner");
        let other = admitted(&mut room, "Other");
        room.start_screen_share(owner.info.user_id, None, 1).unwrap();

        assert!(!room.stop_screen_share(other.info.user_id));
        assert!(room.snapshot().screen_share.is_some());
        assert!(room.stop_screen_share(owner.info.user_id));
        assert!(room.snapshot().screen_share.is_none());
        assert!(!room.stop_screen_share(owner.info.user_id));
    }

    #[test]
    fn test_sharer_disconnect_announces_stop_before_peer_left() {
        let mut room = Room::new(RoomId::new());
        let owner = admitted(&mut room, "Owner");
        let mut other = admitted(&mut room, "Other");
        room.start_screen_share(owner.info.user_id, None, 1).unwrap();
        other.drain();

        let departure = room.remove(owner.info.connection_id, true).unwrap();
        assert!(departure.share_released);

        let frames = other.drain();
        assert_eq!(
            frames.iter().map(|f| f.kind).collect::<Vec<_>>(),
            vec![MessageKind::ScreenShareStopped, MessageKind::PeerLeft]
        );
        let stopped: ScreenShareStopped = frames[0].data_as().unwrap();
        assert_eq!(stopped.user_id, owner.info.user_id);
        assert!(room.snapshot().screen_share.is_none());
    }

    #[test]
    fn test_sharer_disconnect_without_announcement() {
        let mut room = Room::new(RoomId::new());
        let owner = admitted(&mut room, "Owner");
        let mut other = admitted(&mut room, "Other");
        room.start_screen_share(owner.info.user_id, None, 1).unwrap();
        other.drain();

        let departure = room.remove(owner.info.connection_id, false).unwrap();
        assert!(departure.share_released);
        assert_eq!(other.kinds(), vec![MessageKind::PeerLeft]);
        assert!(room.snapshot().screen_share.is_none());
    }

    #[test]
    fn test_notify_reaches_awaiting_connection() {
        let mut room = Room::new(RoomId::new());
        let mut guest = connect(&mut room, "Guest");

        let outcome = room.notify(guest.info.connection_id, &ServerMessage::error("nope"));
        assert_eq!(outcome, Some(DeliveryOutcome::Delivered));

        let frames = guest.drain();
        assert_eq!(frames[0].kind, MessageKind::Error);
        assert_eq!(frames[0].data["message"], "nope");
        assert!(room
            .notify(ConnectionId::new(), &ServerMessage::error("x"))
            .is_none());
    }
}
