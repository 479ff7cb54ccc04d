//! One participant connection as the registry sees it.

use crate::delivery::{DeliveryOutcome, Outbox};
use crate::protocol::PeerInfo;
use common::types::{ConnectionId, RoomId, UserId};
use tokio::sync::mpsc;

/// Identity of a connection. Fixed for the connection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub display_name: String,
    pub room_id: RoomId,
}

impl ClientInfo {
    #[must_use]
    pub fn new(user_id: UserId, display_name: impl Into<String>, room_id: RoomId) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            user_id,
            display_name: display_name.into(),
            room_id,
        }
    }

    /// How other participants see this connection.
    #[must_use]
    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            user_id: self.user_id,
            username: self.display_name.clone(),
        }
    }
}

/// A connection handed to the registry: its identity and the only producer
/// end of its outbound queue.
///
/// The registry owns the `Client` for as long as the connection is a member
/// of a room. Dropping it closes the queue, which ends the write pump.
#[derive(Debug)]
pub struct Client {
    info: ClientInfo,
    outbox: Outbox<String>,
}

impl Client {
    /// Create a client and the receiver its write pump drains.
    #[must_use]
    pub fn new(info: ClientInfo, queue_capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (outbox, receiver) = Outbox::channel(queue_capacity);
        (Self { info, outbox }, receiver)
    }

    #[must_use]
    pub fn info(&self) -> &ClientInfo {
        &self.info
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.info.user_id
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.info.connection_id
    }

    /// Queue an encoded frame without waiting.
    pub(crate) fn deliver(&self, frame: String) -> DeliveryOutcome {
        self.outbox.try_deliver(frame)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropping_client_closes_its_queue() {
        let info = ClientInfo::new(UserId::new(), "Alice", RoomId::new());
        let (client, mut rx) = Client::new(info, 4);

        assert_eq!(client.deliver("hello".to_string()), DeliveryOutcome::Delivered);
        drop(client);

        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_each_info_gets_a_fresh_connection_id() {
        let user = UserId::new();
        let room = RoomId::new();
        let a = ClientInfo::new(user, "Alice", room);
        let b = ClientInfo::new(user, "Alice", room);
        assert_ne!(a.connection_id, b.connection_id);
        assert_eq!(a.peer_info(), b.peer_info());
    }
}
