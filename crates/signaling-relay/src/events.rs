//! Per-room event fan-out for the server-sent events channel.
//!
//! The hub is a thin secondary consumer: the registry publishes membership
//! and screen-share changes here after it has applied them, and each SSE
//! subscriber drains its own bounded queue. A slow subscriber loses events;
//! it never slows the registry down.

use crate::delivery::{DeliveryReport, Outbox};
use crate::observability::metrics as prom;
use common::types::{ConnectionId, RoomId, UserId};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Event types carried on the room event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ParticipantJoined,
    ParticipantLeft,
    ParticipantUpdated,
    ChatMessage,
    MeetingEnded,
    RecordingStarted,
    RecordingStopped,
    ScreenShareStarted,
    ScreenShareStopped,
}

impl EventType {
    /// SSE `event:` name and metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventType::ParticipantJoined => "participant_joined",
            EventType::ParticipantLeft => "participant_left",
            EventType::ParticipantUpdated => "participant_updated",
            EventType::ChatMessage => "chat_message",
            EventType::MeetingEnded => "meeting_ended",
            EventType::RecordingStarted => "recording_started",
            EventType::RecordingStopped => "recording_stopped",
            EventType::ScreenShareStarted => "screen_share_started",
            EventType::ScreenShareStopped => "screen_share_stopped",
        }
    }
}

/// One room event, `{type, data}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: Value,
}

impl RoomEvent {
    /// Build an event from any serializable payload.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `data` cannot be converted.
    pub fn new<T: Serialize>(event_type: EventType, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type,
            data: serde_json::to_value(data)?,
        })
    }
}

/// An event encoded once and shared by every subscriber queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEvent {
    pub event_type: EventType,
    pub json: Arc<str>,
}

#[derive(Debug)]
struct Subscriber {
    user_id: UserId,
    outbox: Outbox<RenderedEvent>,
}

type RoomSubscribers = HashMap<ConnectionId, Subscriber>;

#[derive(Debug)]
struct HubInner {
    rooms: RwLock<HashMap<RoomId, RoomSubscribers>>,
    queue_capacity: usize,
}

/// Registry of SSE subscribers, grouped by room.
#[derive(Debug, Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    /// Create a hub whose subscribers each buffer up to `queue_capacity`
    /// events.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                rooms: RwLock::new(HashMap::new()),
                queue_capacity,
            }),
        }
    }

    /// Register a subscriber. Dropping the returned `Subscription`
    /// unregisters it.
    #[must_use]
    pub fn subscribe(&self, room_id: RoomId, user_id: UserId) -> Subscription {
        let subscriber_id = ConnectionId::new();
        let (outbox, receiver) = Outbox::channel(self.inner.queue_capacity);

        let total = {
            let mut rooms = self
                .inner
                .rooms
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            rooms
                .entry(room_id)
                .or_default()
                .insert(subscriber_id, Subscriber { user_id, outbox });
            rooms.values().map(HashMap::len).sum::<usize>()
        };
        prom::set_event_subscribers_active(total);
        prom::record_connection_opened("events");

        debug!(
            target: "relay.events",
            room_id = %room_id,
            user_id = %user_id,
            subscriber_id = %subscriber_id,
            "Event subscriber registered"
        );

        Subscription {
            hub: Arc::clone(&self.inner),
            room_id,
            subscriber_id,
            receiver,
        }
    }

    /// Number of subscribers currently registered for `room_id`.
    #[must_use]
    pub fn subscriber_count(&self, room_id: RoomId) -> usize {
        self.inner
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&room_id)
            .map_or(0, HashMap::len)
    }

    /// Deliver `event` to every subscriber of `room_id`.
    pub fn publish(&self, room_id: RoomId, event: &RoomEvent) -> DeliveryReport {
        self.fan_out(room_id, None, event)
    }

    /// Deliver `event` to every subscriber of `room_id` except the streams
    /// opened by `exclude`.
    pub fn publish_except(
        &self,
        room_id: RoomId,
        exclude: UserId,
        event: &RoomEvent,
    ) -> DeliveryReport {
        self.fan_out(room_id, Some(exclude), event)
    }

    fn fan_out(
        &self,
        room_id: RoomId,
        exclude: Option<UserId>,
        event: &RoomEvent,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let json: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                error!(
                    target: "relay.events",
                    room_id = %room_id,
                    event_type = event.event_type.as_str(),
                    error = %e,
                    "Failed to encode room event"
                );
                return report;
            }
        };
        let rendered = RenderedEvent {
            event_type: event.event_type,
            json,
        };

        let rooms = self
            .inner
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(subscribers) = rooms.get(&room_id) {
            for subscriber in subscribers.values() {
                if Some(subscriber.user_id) == exclude {
                    continue;
                }
                report.record(subscriber.outbox.try_deliver(rendered.clone()));
            }
        }
        drop(rooms);

        prom::record_event_published(event.event_type.as_str());
        if report.dropped > 0 {
            prom::record_deliveries_dropped("queue_full", report.queue_full());
            prom::record_deliveries_dropped("closed", report.closed);
        }
        report
    }
}

/// A live subscription to one room's events.
///
/// Yields events in publish order until dropped.
#[derive(Debug)]
pub struct Subscription {
    hub: Arc<HubInner>,
    room_id: RoomId,
    subscriber_id: ConnectionId,
    receiver: mpsc::Receiver<RenderedEvent>,
}

impl Subscription {
    #[must_use]
    pub fn subscriber_id(&self) -> ConnectionId {
        self.subscriber_id
    }

    #[must_use]
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }
}

impl Stream for Subscription {
    type Item = RenderedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let total = {
            let mut rooms = self
                .hub
                .rooms
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(subscribers) = rooms.get_mut(&self.room_id) {
                subscribers.remove(&self.subscriber_id);
                if subscribers.is_empty() {
                    rooms.remove(&self.room_id);
                }
            }
            rooms.values().map(HashMap::len).sum::<usize>()
        };
        prom::set_event_subscribers_active(total);

        debug!(
            target: "relay.events",
            room_id = %self.room_id,
            subscriber_id = %self.subscriber_id,
            "Event subscriber removed"
        );
    }
}
