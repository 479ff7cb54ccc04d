//! Signaling WebSocket endpoint.
//!
//! Each connection runs two tasks:
//!
//! - the **read loop** (this task) decodes frames, dispatches them against
//!   the registry and enforces the pong deadline
//! - the **write pump** drains the connection's outbound queue, sends pings
//!   and bounds every write by `write_wait`
//!
//! The registry owns the producer end of the outbound queue. Removing the
//! client from the registry closes the queue, and the write pump answers
//! that by sending a Close frame and exiting. When the write pump exits for
//! any reason it cancels the connection token, which ends the read loop.

use crate::actors::{AdmissionOutcome, AdmitOutcome, Resolution};
use crate::auth::AuthenticatedUser;
use crate::client::{Client, ClientInfo};
use crate::errors::RelayError;
use crate::observability::metrics as prom;
use crate::protocol::{
    ClientMessage, DecodeError, JoinRequestInfo, ScreenShareStopped, ServerMessage,
    AUTO_APPROVED_MESSAGE, HOST_UNAVAILABLE_MESSAGE, SCREEN_SHARE_FAILED_MESSAGE,
};
use crate::routes::AppState;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use common::types::{RoomId, UserId};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Query parameters of `GET /ws`.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub meeting_id: Option<String>,
}

/// Upgrade an authenticated request to a signaling connection.
///
/// # Errors
///
/// `BadRequest` when `meeting_id` is missing or not a UUID.
#[instrument(skip_all, name = "relay.ws.upgrade", fields(user_id = %user.user_id))]
pub async fn websocket_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, RelayError> {
    let room_id = parse_room_id(query.meeting_id.as_deref())?;
    let max_message_bytes = state.config.max_message_bytes;

    Ok(ws
        .max_message_size(max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, user, room_id)))
}

fn parse_room_id(raw: Option<&str>) -> Result<RoomId, RelayError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RelayError::BadRequest("meeting_id is required".to_string()))?;

    raw.parse::<RoomId>()
        .map_err(|_| RelayError::BadRequest("meeting_id must be a UUID".to_string()))
}

#[instrument(
    skip_all,
    name = "relay.ws.connection",
    fields(room_id = %room_id, user_id = %user.user_id)
)]
async fn handle_socket(socket: WebSocket, state: AppState, user: AuthenticatedUser, room_id: RoomId) {
    let opened_at = Instant::now();
    let config = &state.config;

    let info = ClientInfo::new(user.user_id, user.display_name.clone(), room_id);
    let (client, queue) = Client::new(info.clone(), config.client_queue_capacity);

    if let Err(e) = state.registry.add_awaiting(room_id, client).await {
        error!(target: "relay.ws", error = %e, "Failed to register connection");
        return;
    }
    prom::record_connection_opened("signaling");

    info!(
        target: "relay.ws",
        connection_id = %info.connection_id,
        "Signaling connection opened"
    );

    let (sink, stream) = socket.split();
    let done = CancellationToken::new();
    let mut writer = tokio::spawn(write_pump(
        sink,
        queue,
        config.ping_period(),
        config.write_wait,
        done.clone(),
    ));

    let session = Session {
        state: &state,
        info: &info,
        email: user.email,
    };
    read_loop(stream, &session, config.pong_wait, &done).await;

    // Teardown: unregister exactly once. Removal closes the queue, which
    // lets the write pump send its Close frame.
    if let Err(e) = state.registry.remove(room_id, info.connection_id).await {
        warn!(target: "relay.ws", error = %e, "Failed to unregister connection");
    }
    if tokio::time::timeout(config.write_wait, &mut writer)
        .await
        .is_err()
    {
        debug!(target: "relay.ws", "Write pump did not finish in time, aborting");
        writer.abort();
    }

    let lifetime = opened_at.elapsed();
    prom::record_connection_duration(lifetime);
    info!(
        target: "relay.ws",
        connection_id = %info.connection_id,
        duration_ms = u64::try_from(lifetime.as_millis()).unwrap_or(u64::MAX),
        "Signaling connection closed"
    );
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    session: &Session<'_>,
    pong_wait: Duration,
    done: &CancellationToken,
) {
    let mut deadline = Instant::now() + pong_wait;

    loop {
        tokio::select! {
            () = done.cancelled() => {
                debug!(target: "relay.ws", "Write side closed, ending read loop");
                break;
            }

            () = tokio::time::sleep_until(deadline) => {
                info!(
                    target: "relay.ws",
                    pong_wait_ms = u64::try_from(pong_wait.as_millis()).unwrap_or(u64::MAX),
                    "Heartbeat timeout, closing connection"
                );
                break;
            }

            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!(target: "relay.ws", "Skipping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Pong(_))) => {
                        deadline = Instant::now() + pong_wait;
                        continue;
                    }
                    // Pings are answered by the transport
                    Some(Ok(Message::Ping(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(target: "relay.ws", "Peer closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(target: "relay.ws", error = %e, "Read failed");
                        break;
                    }
                };

                if session.dispatch(&text).await.is_break() {
                    break;
                }
            }
        }
    }
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<String>,
    ping_period: Duration,
    write_wait: Duration,
    done: CancellationToken,
) {
    let _done_on_exit = done.drop_guard();
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = queue.recv() => {
                if let Some(text) = frame {
                    if !send_frame(&mut sink, Message::Text(text), write_wait).await {
                        break;
                    }
                } else {
                    let close = Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "".into(),
                    }));
                    send_frame(&mut sink, close, write_wait).await;
                    break;
                }
            }

            _ = ticker.tick() => {
                if !send_frame(&mut sink, Message::Ping(Vec::new()), write_wait).await {
                    break;
                }
            }
        }
    }
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_wait: Duration,
) -> bool {
    match tokio::time::timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(target: "relay.ws", error = %e, "Write failed");
            false
        }
        Err(_) => {
            debug!(target: "relay.ws", "Write timed out");
            false
        }
    }
}

/// Per-connection dispatch context.
struct Session<'a> {
    state: &'a AppState,
    info: &'a ClientInfo,
    email: Option<String>,
}

impl Session<'_> {
    fn room_id(&self) -> RoomId {
        self.info.room_id
    }

    fn user_id(&self) -> UserId {
        self.info.user_id
    }

    /// Decode and handle one text frame. `Break` ends the connection.
    async fn dispatch(&self, text: &str) -> ControlFlow<()> {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(DecodeError::Malformed(e)) => {
                debug!(target: "relay.ws", error = %e, "Skipping undecodable frame");
                return ControlFlow::Continue(());
            }
            Err(DecodeError::Protocol(e)) => {
                debug!(target: "relay.ws", error = %e, "Rejected client message");
                self.reply_error(e.client_message()).await;
                return ControlFlow::Continue(());
            }
        };

        let kind = message.kind();
        let started = Instant::now();
        let result = self.handle(message).await;
        prom::record_dispatch_latency(kind.as_str(), started.elapsed());

        match result {
            Ok(flow) => flow,
            Err(RelayError::Internal(reason)) => {
                error!(target: "relay.ws", kind = %kind, error = %reason, "Registry unavailable");
                ControlFlow::Break(())
            }
            Err(e) => {
                debug!(target: "relay.ws", kind = %kind, error = %e, "Client message failed");
                self.reply_error(e.client_message()).await;
                ControlFlow::Continue(())
            }
        }
    }

    async fn handle(&self, message: ClientMessage) -> Result<ControlFlow<()>, RelayError> {
        let registry = &self.state.registry;
        let (room_id, user_id) = (self.room_id(), self.user_id());

        match message {
            ClientMessage::Offer { to, description } => {
                registry
                    .route(self.info, Some(to), ServerMessage::Offer(description), false)
                    .await?;
            }
            ClientMessage::Answer { to, description } => {
                registry
                    .route(self.info, Some(to), ServerMessage::Answer(description), false)
                    .await?;
            }
            ClientMessage::IceCandidate { to, candidate } => {
                registry
                    .route(self.info, Some(to), ServerMessage::IceCandidate(candidate), false)
                    .await?;
            }
            ClientMessage::MediaStateChanged { to, state } => {
                registry
                    .route(self.info, to, ServerMessage::MediaStateChanged(state), false)
                    .await?;
            }
            ClientMessage::HostJoin => {
                let outcome = registry.admit(room_id, user_id).await?;
                if outcome.is_admitted() {
                    registry.metrics().record_admission(AdmissionOutcome::Host);
                    self.remember(user_id).await;
                }
            }
            ClientMessage::JoinRequest(payload) => {
                self.request_to_join(payload.host_user_id, payload.email)
                    .await?;
            }
            ClientMessage::ApproveJoinRequest(target) => {
                let resolution = registry
                    .resolve_admission(room_id, user_id, target.user_id, true)
                    .await?;
                if let Resolution::Approved(AdmitOutcome::Admitted { .. }) = resolution {
                    self.remember(target.user_id).await;
                }
            }
            ClientMessage::RejectJoinRequest(target) => {
                registry
                    .resolve_admission(room_id, user_id, target.user_id, false)
                    .await?;
            }
            ClientMessage::ScreenShareStarted(request) => {
                let share = match registry
                    .start_screen_share(room_id, user_id, request.username)
                    .await
                {
                    Ok(share) => share,
                    Err(RelayError::Conflict(_)) => {
                        self.reply_error(SCREEN_SHARE_FAILED_MESSAGE.to_string())
                            .await;
                        return Ok(ControlFlow::Continue(()));
                    }
                    Err(e) => return Err(e),
                };
                registry
                    .route(self.info, None, ServerMessage::ScreenShareStarted(share), true)
                    .await?;
            }
            ClientMessage::ScreenShareStopped => {
                if registry.stop_screen_share(room_id, user_id).await? {
                    let stopped = ScreenShareStopped { user_id };
                    registry
                        .route(self.info, None, ServerMessage::ScreenShareStopped(stopped), false)
                        .await?;
                }
            }
            ClientMessage::Join => {
                debug!(target: "relay.ws", "Join notice received");
            }
            ClientMessage::Leave => {
                debug!(target: "relay.ws", "Client requested leave");
                registry.remove(room_id, self.info.connection_id).await?;
                return Ok(ControlFlow::Break(()));
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    /// Returning users are admitted directly; everyone else waits for the
    /// host.
    async fn request_to_join(
        &self,
        host_user_id: UserId,
        email: Option<String>,
    ) -> Result<(), RelayError> {
        let registry = &self.state.registry;
        let (room_id, user_id) = (self.room_id(), self.user_id());

        let returning = match self.state.history.has_joined(room_id, user_id).await {
            Ok(joined) => joined,
            Err(e) => {
                warn!(target: "relay.ws", error = %e, "Membership history lookup failed");
                false
            }
        };

        if returning {
            let outcome = registry
                .admit_with_approval(room_id, user_id, AUTO_APPROVED_MESSAGE)
                .await?;
            if outcome.is_admitted() {
                info!(target: "relay.ws", "Returning user auto-approved");
                registry
                    .metrics()
                    .record_admission(AdmissionOutcome::AutoApproved);
            }
            return Ok(());
        }

        let request = JoinRequestInfo {
            user_id,
            username: self.info.display_name.clone(),
            email: email.or_else(|| self.email.clone()),
            timestamp: chrono::Utc::now().timestamp(),
        };
        let outcome = registry
            .request_admission(room_id, request, host_user_id)
            .await?;
        if !outcome.host_notified {
            self.reply_error(HOST_UNAVAILABLE_MESSAGE.to_string()).await;
        }
        Ok(())
    }

    async fn remember(&self, user_id: UserId) {
        if let Err(e) = self
            .state
            .history
            .record_admission(self.room_id(), user_id)
            .await
        {
            warn!(target: "relay.ws", error = %e, "Failed to record membership history");
        }
    }

    async fn reply_error(&self, message: String) {
        if let Err(e) = self
            .state
            .registry
            .notify(
                self.room_id(),
                self.info.connection_id,
                ServerMessage::error(message),
            )
            .await
        {
            debug!(target: "relay.ws", error = %e, "Failed to deliver error reply");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_room_id() {
        let id = RoomId::new();
        assert_eq!(parse_room_id(Some(&id.to_string())).unwrap(), id);
        assert!(matches!(parse_room_id(None), Err(RelayError::BadRequest(_))));
        assert!(matches!(parse_room_id(Some("  ")), Err(RelayError::BadRequest(_))));
        assert!(matches!(
            parse_room_id(Some("not-a-uuid")),
            Err(RelayError::BadRequest(_))
        ));
    }
}
