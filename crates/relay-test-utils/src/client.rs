//! WebSocket test client speaking the relay's JSON envelope.

use crate::fixtures::TestUser;
use crate::server::TestServer;
use common::types::{RoomId, UserId};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use signaling_relay::protocol::{Envelope, MessageKind};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// How long `recv` waits before failing.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A signaling client connected to a [`TestServer`].
pub struct TestSignalingClient {
    /// The user this client authenticated as.
    pub user: TestUser,
    /// Room it connected to.
    pub room_id: RoomId,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestSignalingClient {
    /// Connect `user` to `room_id` with a valid token.
    pub async fn connect(server: &TestServer, room_id: RoomId, user: &TestUser) -> Self {
        let url = server.ws_url(room_id, &user.token());
        let stream = Self::try_connect_url(&url)
            .await
            .expect("WebSocket handshake failed");
        Self {
            user: user.clone(),
            room_id,
            stream,
        }
    }

    /// Attempt a handshake against an arbitrary URL.
    pub async fn try_connect_url(
        url: &str,
    ) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, tungstenite::Error> {
        connect_async(url).await.map(|(stream, _response)| stream)
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user.user_id
    }

    /// Send a raw text frame.
    pub async fn send_text(&mut self, text: impl Into<String>) {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .expect("send text frame");
    }

    /// Send `{type, to?, data}`.
    pub async fn send_kind(&mut self, kind: &str, to: Option<UserId>, data: Value) {
        let mut frame = json!({ "type": kind, "data": data });
        if let Some(to) = to {
            frame["to"] = json!(to);
        }
        self.send_text(frame.to_string()).await;
    }

    /// `host-join`.
    pub async fn host_join(&mut self) {
        self.send_kind("host-join", None, Value::Null).await;
    }

    /// `join-request` naming `host`.
    pub async fn request_to_join(&mut self, host: UserId) {
        self.send_kind("join-request", None, json!({ "host_user_id": host }))
            .await;
    }

    /// `approve-join-request` for `user`.
    pub async fn approve(&mut self, user: UserId) {
        self.send_kind("approve-join-request", None, json!({ "user_id": user }))
            .await;
    }

    /// `reject-join-request` for `user`.
    pub async fn reject(&mut self, user: UserId) {
        self.send_kind("reject-join-request", None, json!({ "user_id": user }))
            .await;
    }

    /// Next envelope, skipping transport pings and pongs.
    pub async fn recv(&mut self) -> anyhow::Result<Envelope> {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("no message within {RECV_TIMEOUT:?}"))?;
            match frame {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(other)) => anyhow::bail!("unexpected frame: {other:?}"),
                Some(Err(e)) => return Err(e.into()),
                None => anyhow::bail!("connection closed"),
            }
        }
    }

    /// Receive the next envelope and assert its kind.
    pub async fn expect_kind(&mut self, kind: MessageKind) -> Envelope {
        let envelope = self
            .recv()
            .await
            .unwrap_or_else(|e| panic!("expected {kind}, got error: {e}"));
        assert_eq!(
            envelope.kind, kind,
            "expected {kind}, got {envelope:?}"
        );
        envelope
    }

    /// Receive an `error` envelope and assert its message.
    pub async fn expect_error(&mut self, message: &str) {
        let envelope = self.expect_kind(MessageKind::Error).await;
        assert_eq!(envelope.data["message"], message, "error text mismatch");
    }

    /// Assert that no envelope arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.stream.next()).await {
                Err(_) => return,
                Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
                Ok(other) => panic!("expected silence, got {other:?}"),
            }
        }
    }

    /// Wait until the server closes the connection.
    pub async fn expect_closed(&mut self, within: Duration) {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            match tokio::time::timeout_at(deadline, self.stream.next()).await {
                Err(_) => panic!("connection still open after {within:?}"),
                Ok(None | Some(Ok(Message::Close(_)) | Err(_))) => return,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    /// Close the connection from the client side.
    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
