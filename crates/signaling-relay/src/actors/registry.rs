//! `RoomRegistry` - the single actor that owns every room.
//!
//! All membership mutations and all routing decisions go through this
//! actor's mailbox, so admission is atomic with respect to routing and
//! per-recipient order is the order the registry handled the messages in.
//!
//! Rooms are created on the first `AddAwaiting` and discarded as soon as
//! both of their sets are empty.

use super::messages::{
    AdmitOutcome, Departure, RegistryMessage, RegistryStatus, RequestOutcome, Resolution,
    RoomSnapshot,
};
use super::metrics::{AdmissionOutcome, MailboxMonitor, RegistryMetrics};
use super::room::Room;
use crate::client::{Client, ClientInfo};
use crate::delivery::DeliveryReport;
use crate::errors::RelayError;
use crate::events::{EventHub, EventType, RoomEvent};
use crate::protocol::{
    JoinRequestInfo, MessageKind, Notice, ScreenShareInfo, ScreenShareStopped, ServerMessage,
};
use common::types::{ConnectionId, RoomId, UserId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Registry construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct RegistrySettings {
    pub mailbox_capacity: usize,
    /// Broadcast `screen-share-stopped` when a sharer disconnects.
    pub announce_share_stop: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: crate::config::DEFAULT_REGISTRY_MAILBOX_CAPACITY,
            announce_share_stop: true,
        }
    }
}

/// Handle to the `RoomRegistry` actor.
#[derive(Clone)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<RegistryMetrics>,
}

impl RoomRegistryHandle {
    async fn request<T>(
        &self,
        message: RegistryMessage,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, RelayError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Register a connection as awaiting admission in `room_id`.
    ///
    /// Any existing connection of the same user in that room is superseded
    /// and its queue closed.
    pub async fn add_awaiting(&self, room_id: RoomId, client: Client) -> Result<(), RelayError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::AddAwaiting {
                room_id,
                client,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Admit `user_id` without an approval notice (host-join).
    pub async fn admit(&self, room_id: RoomId, user_id: UserId) -> Result<AdmitOutcome, RelayError> {
        self.admit_inner(room_id, user_id, None).await
    }

    /// Admit `user_id`, sending `join-approved` with `message` first.
    pub async fn admit_with_approval(
        &self,
        room_id: RoomId,
        user_id: UserId,
        message: &str,
    ) -> Result<AdmitOutcome, RelayError> {
        self.admit_inner(room_id, user_id, Some(Notice::new(message)))
            .await
    }

    async fn admit_inner(
        &self,
        room_id: RoomId,
        user_id: UserId,
        approval: Option<Notice>,
    ) -> Result<AdmitOutcome, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::Admit {
                room_id,
                user_id,
                approval,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Unregister a connection. Safe to call more than once.
    pub async fn remove(&self, room_id: RoomId, connection_id: ConnectionId) -> Result<(), RelayError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::Remove {
                room_id,
                connection_id,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Record a join request for `request.user_id` and notify the host.
    pub async fn request_admission(
        &self,
        room_id: RoomId,
        request: JoinRequestInfo,
        host_user_id: UserId,
    ) -> Result<RequestOutcome, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::RequestAdmission {
                room_id,
                request,
                host_user_id,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Approve or reject the outstanding request of `requester`.
    pub async fn resolve_admission(
        &self,
        room_id: RoomId,
        resolver: UserId,
        requester: UserId,
        approve: bool,
    ) -> Result<Resolution, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::ResolveAdmission {
                room_id,
                resolver,
                requester,
                approve,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Route a message from the `sender` connection in its room: directed
    /// when `recipient` is set, otherwise broadcast to the admitted members.
    pub async fn route(
        &self,
        sender: &ClientInfo,
        recipient: Option<UserId>,
        message: ServerMessage,
        include_sender: bool,
    ) -> Result<DeliveryReport, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::Route {
                sender: sender.clone(),
                recipient,
                message,
                include_sender,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Take the screen-share token.
    pub async fn start_screen_share(
        &self,
        room_id: RoomId,
        user_id: UserId,
        username: Option<String>,
    ) -> Result<ScreenShareInfo, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::StartScreenShare {
                room_id,
                user_id,
                username,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Release the screen-share token. Returns whether `user_id` held it.
    pub async fn stop_screen_share(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::StopScreenShare {
                room_id,
                user_id,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Deliver a server message to a single connection.
    pub async fn notify(
        &self,
        room_id: RoomId,
        connection_id: ConnectionId,
        message: ServerMessage,
    ) -> Result<(), RelayError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::Notify {
                room_id,
                connection_id,
                message,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Snapshot of one room, `None` if it has no connections.
    pub async fn room_snapshot(&self, room_id: RoomId) -> Result<Option<RoomSnapshot>, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::GetRoom {
                room_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Counts across all rooms.
    pub async fn status(&self) -> Result<RegistryStatus, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.request(RegistryMessage::GetStatus { respond_to: tx }, rx)
            .await
    }

    /// Shared registry metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<RegistryMetrics> {
        &self.metrics
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `RoomRegistry` actor. Owns all rooms and runs the message loop.
pub struct RoomRegistry {
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    rooms: HashMap<RoomId, Room>,
    settings: RegistrySettings,
    metrics: Arc<RegistryMetrics>,
    mailbox: MailboxMonitor,
    events: Option<EventHub>,
}

impl RoomRegistry {
    /// Spawn the registry actor.
    ///
    /// Returns the handle and the task's join handle. The actor stops when
    /// `cancel_token` is cancelled or every handle has been dropped.
    #[must_use]
    pub fn spawn(
        settings: RegistrySettings,
        metrics: Arc<RegistryMetrics>,
        events: Option<EventHub>,
        cancel_token: CancellationToken,
    ) -> (RoomRegistryHandle, JoinHandle<()>) {
        let capacity = settings.mailbox_capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            settings,
            metrics: Arc::clone(&metrics),
            mailbox: MailboxMonitor::new("room-registry", capacity),
            events,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomRegistryHandle {
            sender,
            cancel_token,
            metrics,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "relay.actor.registry")]
    async fn run(mut self) {
        info!(target: "relay.registry", "RoomRegistry started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.registry",
                        "RoomRegistry received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                msg = self.receiver.recv() => {
                    if let Some(message) = msg {
                        self.mailbox.observe_depth(self.receiver.len());
                        self.handle_message(message);
                        self.mailbox.record_processed();
                    } else {
                        info!(
                            target: "relay.registry",
                            "RoomRegistry channel closed, exiting"
                        );
                        break;
                    }
                }
            }
        }

        info!(
            target: "relay.registry",
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "RoomRegistry stopped"
        );
    }

    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::AddAwaiting {
                room_id,
                client,
                respond_to,
            } => {
                self.handle_add_awaiting(room_id, client);
                let _ = respond_to.send(Ok(()));
            }

            RegistryMessage::Admit {
                room_id,
                user_id,
                approval,
                respond_to,
            } => {
                let result = self.handle_admit(room_id, user_id, approval);
                let _ = respond_to.send(result);
            }

            RegistryMessage::Remove {
                room_id,
                connection_id,
                respond_to,
            } => {
                self.handle_remove(room_id, connection_id);
                let _ = respond_to.send(Ok(()));
            }

            RegistryMessage::RequestAdmission {
                room_id,
                request,
                host_user_id,
                respond_to,
            } => {
                let result = self.handle_request_admission(room_id, request, host_user_id);
                let _ = respond_to.send(result);
            }

            RegistryMessage::ResolveAdmission {
                room_id,
                resolver,
                requester,
                approve,
                respond_to,
            } => {
                let result = self.handle_resolve(room_id, resolver, requester, approve);
                let _ = respond_to.send(result);
            }

            RegistryMessage::Route {
                sender,
                recipient,
                message,
                include_sender,
                respond_to,
            } => {
                let result = self.handle_route(&sender, recipient, &message, include_sender);
                let _ = respond_to.send(result);
            }

            RegistryMessage::StartScreenShare {
                room_id,
                user_id,
                username,
                respond_to,
            } => {
                let result = self.handle_start_share(room_id, user_id, username);
                let _ = respond_to.send(result);
            }

            RegistryMessage::StopScreenShare {
                room_id,
                user_id,
                respond_to,
            } => {
                let result = self.handle_stop_share(room_id, user_id);
                let _ = respond_to.send(result);
            }

            RegistryMessage::Notify {
                room_id,
                connection_id,
                message,
                respond_to,
            } => {
                if let Some(outcome) = self
                    .rooms
                    .get(&room_id)
                    .and_then(|room| room.notify(connection_id, &message))
                {
                    let mut report = DeliveryReport::default();
                    report.record(outcome);
                    self.record_report(&report);
                }
                let _ = respond_to.send(Ok(()));
            }

            RegistryMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.rooms.get(&room_id).map(Room::snapshot));
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    rooms: self.rooms.len(),
                    connections: self.connection_count(),
                    is_shutting_down: self.cancel_token.is_cancelled(),
                });
            }
        }
    }

    fn handle_add_awaiting(&mut self, room_id: RoomId, client: Client) {
        let user_id = client.user_id();
        let connection_id = client.connection_id();
        let announce = self.settings.announce_share_stop;

        let room = self
            .rooms
            .entry(room_id)
            .or_insert_with(|| Room::new(room_id));
        let superseded = room.add_awaiting(client, announce);

        debug!(
            target: "relay.registry",
            room_id = %room_id,
            user_id = %user_id,
            connection_id = %connection_id,
            "Client awaiting admission"
        );

        if let Some(departure) = superseded {
            self.after_departure(room_id, &departure);
        }
        self.update_gauges();
    }

    fn handle_admit(
        &mut self,
        room_id: RoomId,
        user_id: UserId,
        approval: Option<Notice>,
    ) -> Result<AdmitOutcome, RelayError> {
        let room = self.room_mut(room_id)?;
        let outcome = room.admit(user_id, approval);
        self.after_admit(room_id, &outcome);
        Ok(outcome)
    }

    fn handle_remove(&mut self, room_id: RoomId, connection_id: ConnectionId) {
        let announce = self.settings.announce_share_stop;
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };

        let Some(departure) = room.remove(connection_id, announce) else {
            debug!(
                target: "relay.registry",
                room_id = %room_id,
                connection_id = %connection_id,
                "Remove ignored: connection not registered"
            );
            return;
        };

        debug!(
            target: "relay.registry",
            room_id = %room_id,
            user_id = %departure.peer.user_id,
            connection_id = %connection_id,
            was_admitted = departure.was_admitted,
            "Client removed"
        );

        self.after_departure(room_id, &departure);
        self.discard_if_empty(room_id);
        self.update_gauges();
    }

    fn handle_request_admission(
        &mut self,
        room_id: RoomId,
        request: JoinRequestInfo,
        host_user_id: UserId,
    ) -> Result<RequestOutcome, RelayError> {
        let requester = request.user_id;
        let room = self.room_mut(room_id)?;
        let outcome = room.request_admission(request, host_user_id);

        if outcome.host_notified {
            debug!(
                target: "relay.registry",
                room_id = %room_id,
                user_id = %requester,
                host_user_id = %host_user_id,
                replaced = outcome.replaced,
                "Join request forwarded to host"
            );
        } else {
            warn!(
                target: "relay.registry",
                room_id = %room_id,
                user_id = %requester,
                host_user_id = %host_user_id,
                "Join request recorded but host is not connected"
            );
        }

        self.record_report(&outcome.report);
        Ok(outcome)
    }

    fn handle_resolve(
        &mut self,
        room_id: RoomId,
        resolver: UserId,
        requester: UserId,
        approve: bool,
    ) -> Result<Resolution, RelayError> {
        let room = self.room_mut(room_id)?;
        let resolution = room.resolve_admission(resolver, requester, approve)?;

        match &resolution {
            Resolution::Approved(outcome) => {
                self.after_admit(room_id, outcome);
                self.metrics.record_admission(AdmissionOutcome::Approved);
            }
            Resolution::Rejected { report } => {
                self.record_report(report);
                self.metrics.record_admission(AdmissionOutcome::Rejected);
            }
        }

        info!(
            target: "relay.registry",
            room_id = %room_id,
            resolver = %resolver,
            requester = %requester,
            approved = approve,
            "Join request resolved"
        );
        Ok(resolution)
    }

    fn handle_route(
        &mut self,
        sender: &ClientInfo,
        recipient: Option<UserId>,
        message: &ServerMessage,
        include_sender: bool,
    ) -> Result<DeliveryReport, RelayError> {
        let room = self.room_mut(sender.room_id)?;
        let result = room.route(sender, recipient, message, include_sender);

        match &result {
            Ok(report) => {
                self.metrics.record_routed(message.kind().as_str());
                self.record_report(report);
            }
            Err(RelayError::RecipientUnavailable(to)) => {
                debug!(
                    target: "relay.registry",
                    room_id = %sender.room_id,
                    sender = %sender.user_id,
                    recipient = %to,
                    kind = %message.kind(),
                    "Directed message has no recipient"
                );
                self.metrics.record_dropped("no_recipient", 1);
            }
            Err(_) => {}
        }
        result
    }

    fn handle_start_share(
        &mut self,
        room_id: RoomId,
        user_id: UserId,
        username: Option<String>,
    ) -> Result<ScreenShareInfo, RelayError> {
        let now = chrono::Utc::now().timestamp();
        let room = self.room_mut(room_id)?;
        let info = room.start_screen_share(user_id, username, now)?;

        info!(
            target: "relay.registry",
            room_id = %room_id,
            user_id = %user_id,
            "Screen share started"
        );
        self.publish(room_id, EventType::ScreenShareStarted, &info);
        Ok(info)
    }

    fn handle_stop_share(&mut self, room_id: RoomId, user_id: UserId) -> Result<bool, RelayError> {
        let room = self.room_mut(room_id)?;
        let stopped = room.stop_screen_share(user_id);

        if stopped {
            info!(
                target: "relay.registry",
                room_id = %room_id,
                user_id = %user_id,
                "Screen share stopped"
            );
            self.publish(
                room_id,
                EventType::ScreenShareStopped,
                &ScreenShareStopped { user_id },
            );
        }
        Ok(stopped)
    }

    // ------------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------------

    fn room_mut(&mut self, room_id: RoomId) -> Result<&mut Room, RelayError> {
        self.rooms
            .get_mut(&room_id)
            .ok_or_else(|| RelayError::NotFound(format!("Room {room_id} has no connections")))
    }

    fn after_admit(&mut self, room_id: RoomId, outcome: &AdmitOutcome) {
        match outcome {
            AdmitOutcome::Admitted { peer, report } => {
                info!(
                    target: "relay.registry",
                    room_id = %room_id,
                    user_id = %peer.user_id,
                    "Participant admitted"
                );
                self.metrics.record_routed(MessageKind::PeerJoined.as_str());
                self.record_report(report);
                // The joiner's own streams already know
                self.publish_except(room_id, peer.user_id, EventType::ParticipantJoined, peer);
            }
            AdmitOutcome::AlreadyAdmitted { report } => self.record_report(report),
            AdmitOutcome::NotAwaiting => {}
        }
    }

    fn after_departure(&mut self, room_id: RoomId, departure: &Departure) {
        self.record_report(&departure.report);

        if departure.share_released {
            self.publish(
                room_id,
                EventType::ScreenShareStopped,
                &ScreenShareStopped {
                    user_id: departure.peer.user_id,
                },
            );
        }
        if departure.was_admitted {
            self.metrics.record_routed(MessageKind::PeerLeft.as_str());
            self.publish(room_id, EventType::ParticipantLeft, &departure.peer);
        }
    }

    fn discard_if_empty(&mut self, room_id: RoomId) {
        if self.rooms.get(&room_id).is_some_and(Room::is_empty) {
            self.rooms.remove(&room_id);
            debug!(target: "relay.registry", room_id = %room_id, "Room discarded");
        }
    }

    fn publish<T: Serialize>(&self, room_id: RoomId, event_type: EventType, data: &T) {
        self.publish_to(room_id, None, event_type, data);
    }

    fn publish_except<T: Serialize>(
        &self,
        room_id: RoomId,
        exclude: UserId,
        event_type: EventType,
        data: &T,
    ) {
        self.publish_to(room_id, Some(exclude), event_type, data);
    }

    fn publish_to<T: Serialize>(
        &self,
        room_id: RoomId,
        exclude: Option<UserId>,
        event_type: EventType,
        data: &T,
    ) {
        let Some(hub) = &self.events else {
            return;
        };
        match RoomEvent::new(event_type, data) {
            Ok(event) => {
                match exclude {
                    Some(user_id) => hub.publish_except(room_id, user_id, &event),
                    None => hub.publish(room_id, &event),
                };
            }
            Err(e) => {
                error!(
                    target: "relay.registry",
                    room_id = %room_id,
                    event_type = event_type.as_str(),
                    error = %e,
                    "Failed to build room event"
                );
            }
        }
    }

    fn record_report(&self, report: &DeliveryReport) {
        self.metrics.record_dropped("queue_full", report.queue_full());
        self.metrics.record_dropped("closed", report.closed);
    }

    fn connection_count(&self) -> usize {
        self.rooms.values().map(Room::connection_count).sum()
    }

    fn update_gauges(&self) {
        self.metrics.set_rooms(self.rooms.len());
        self.metrics.set_connections(self.connection_count());
    }

    fn graceful_shutdown(&mut self) {
        let rooms = self.rooms.len();
        let connections = self.connection_count();

        // Dropping the rooms drops every Client, which closes every queue
        // and lets each write pump send its Close frame.
        self.rooms.clear();
        self.update_gauges();

        info!(
            target: "relay.registry",
            rooms = rooms,
            connections = connections,
            "RoomRegistry closed all client queues"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::protocol::{Envelope, SdpType, SessionDescription};
    use futures_util::StreamExt;

    fn spawn_registry(events: Option<EventHub>) -> (RoomRegistryHandle, CancellationToken) {
        let token = CancellationToken::new();
        let (handle, _task) = RoomRegistry::spawn(
            RegistrySettings::default(),
            RegistryMetrics::new(),
            events,
            token.clone(),
        );
        (handle, token)
    }

    async fn connect(
        registry: &RoomRegistryHandle,
        room_id: RoomId,
        name: &str,
    ) -> (ClientInfo, mpsc::Receiver<String>) {
        let info = ClientInfo::new(UserId::new(), name, room_id);
        let (client, rx) = Client::new(info.clone(), 32);
        registry.add_awaiting(room_id, client).await.unwrap();
        (info, rx)
    }

    fn next_kind(rx: &mut mpsc::Receiver<String>) -> Option<MessageKind> {
        rx.try_recv()
            .ok()
            .map(|frame| serde_json::from_str::<Envelope>(&frame).unwrap().kind)
    }

    fn offer() -> ServerMessage {
        ServerMessage::Offer(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "v=0".to_string(),
        })
    }

    #[tokio::test]
    async fn test_room_lifecycle_and_gauges() {
        let (registry, _token) = spawn_registry(None);
        let room = RoomId::new();

        let (alice, _rx_a) = connect(&registry, room, "Alice").await;
        let (bob, _rx_b) = connect(&registry, room, "Bob").await;

        let status = registry.status().await.unwrap();
        assert_eq!(status.rooms, 1);
        assert_eq!(status.connections, 2);
        assert_eq!(registry.metrics().snapshot().connections_active, 2);

        registry.remove(room, alice.connection_id).await.unwrap();
        registry.remove(room, alice.connection_id).await.unwrap();
        registry.remove(room, bob.connection_id).await.unwrap();

        assert!(registry.room_snapshot(room).await.unwrap().is_none());
        let snapshot = registry.metrics().snapshot();
        assert_eq!(snapshot.rooms_active, 0);
        assert_eq!(snapshot.connections_active, 0);
    }

    #[tokio::test]
    async fn test_operations_on_unknown_room_are_not_found() {
        let (registry, _token) = spawn_registry(None);
        let err = registry
            .route(&ClientInfo::new(UserId::new(), "Nobody", RoomId::new()), None, offer(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));

        // Remove on an unknown room is a silent no-op
        registry
            .remove(RoomId::new(), ConnectionId::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_admission_is_recorded_in_metrics() {
        let (registry, _token) = spawn_registry(None);
        let room = RoomId::new();
        let (host, mut host_rx) = connect(&registry, room, "Host").await;
        let (guest, mut guest_rx) = connect(&registry, room, "Guest").await;

        assert!(registry.admit(room, host.user_id).await.unwrap().is_admitted());
        assert_eq!(next_kind(&mut host_rx), Some(MessageKind::Ready));

        let request = JoinRequestInfo {
            user_id: guest.user_id,
            username: "Guest".to_string(),
            email: None,
            timestamp: 0,
        };
        let outcome = registry
            .request_admission(room, request, host.user_id)
            .await
            .unwrap();
        assert!(outcome.host_notified);
        assert_eq!(next_kind(&mut guest_rx), Some(MessageKind::JoinRequestPending));
        assert_eq!(next_kind(&mut host_rx), Some(MessageKind::PendingJoinRequest));

        registry
            .resolve_admission(room, host.user_id, guest.user_id, false)
            .await
            .unwrap();
        assert_eq!(next_kind(&mut guest_rx), Some(MessageKind::JoinRejected));
        assert_eq!(registry.metrics().snapshot().admissions_rejected, 1);
    }

    #[tokio::test]
    async fn test_route_to_absent_recipient_counts_no_recipient() {
        let (registry, _token) = spawn_registry(None);
        let room = RoomId::new();
        let (alice, _rx) = connect(&registry, room, "Alice").await;
        registry.admit(room, alice.user_id).await.unwrap();

        let err = registry
            .route(&alice, Some(UserId::new()), offer(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::RecipientUnavailable(_)));
        assert_eq!(registry.metrics().snapshot().deliveries_dropped, 1);

        let snapshot = registry.room_snapshot(room).await.unwrap().unwrap();
        assert_eq!(snapshot.admitted, vec![alice.user_id]);
        assert!(snapshot.awaiting.is_empty());
    }

    #[tokio::test]
    async fn test_events_published_for_membership_and_share() {
        let hub = EventHub::new(16);
        let (registry, _token) = spawn_registry(Some(hub.clone()));
        let room = RoomId::new();
        let mut events = hub.subscribe(room, UserId::new());

        let (alice, _rx) = connect(&registry, room, "Alice").await;
        registry.admit(room, alice.user_id).await.unwrap();
        registry.start_screen_share(room, alice.user_id, None).await.unwrap();
        registry.remove(room, alice.connection_id).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(events.next().await.unwrap().event_type);
        }
        assert_eq!(
            seen,
            vec![
                EventType::ParticipantJoined,
                EventType::ScreenShareStarted,
                EventType::ScreenShareStopped,
                EventType::ParticipantLeft,
            ]
        );
    }

    #[tokio::test]
    async fn test_cancellation_closes_client_queues() {
        let (registry, token) = spawn_registry(None);
        let room = RoomId::new();
        let (_alice, mut rx) = connect(&registry, room, "Alice").await;

        token.cancel();
        assert!(registry.is_cancelled());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_actor_exits_when_handles_dropped() {
        let token = CancellationToken::new();
        let (handle, task) = RoomRegistry::spawn(
            RegistrySettings::default(),
            RegistryMetrics::new(),
            None,
            token,
        );
        drop(handle);
        task.await.unwrap();
    }
}
