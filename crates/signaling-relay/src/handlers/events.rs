//! Room event stream over server-sent events.

use crate::auth::AuthenticatedUser;
use crate::errors::RelayError;
use crate::events::RenderedEvent;
use crate::routes::AppState;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use common::types::RoomId;
use futures_util::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use tracing::{info, instrument};

/// Data of the first event on every stream.
pub const CONNECTED_MESSAGE: &str = r#"{"message":"Connected to meeting events"}"#;

/// `GET /api/v1/meetings/:meeting_id/events`
///
/// Streams `connected` and then every event published for the room until
/// the client goes away.
///
/// # Errors
///
/// `BadRequest` when the path segment is not a UUID.
#[instrument(skip_all, name = "relay.events.stream", fields(user_id = %user.user_id))]
pub async fn events_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(meeting_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, RelayError> {
    let room_id: RoomId = meeting_id
        .parse()
        .map_err(|_| RelayError::BadRequest("meeting id must be a UUID".to_string()))?;

    let subscription = state.events.subscribe(room_id, user.user_id);
    info!(
        target: "relay.events",
        room_id = %room_id,
        subscriber_id = %subscription.subscriber_id(),
        "Event stream opened"
    );

    let connected = Event::default().event("connected").data(CONNECTED_MESSAGE);
    let events = stream::once(async move { Ok(connected) })
        .chain(subscription.map(|event| Ok(render(&event))));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn render(event: &RenderedEvent) -> Event {
    Event::default()
        .event(event.event_type.as_str())
        .data(event.json.as_ref())
}
