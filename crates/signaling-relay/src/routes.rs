//! HTTP routes for the signaling relay.
//!
//! Defines the Axum router and application state.

use crate::actors::RoomRegistryHandle;
use crate::config::Config;
use crate::events::EventHub;
use crate::handlers;
use crate::history::MembershipHistory;
use crate::observability::{health_router, HealthState};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Arc<Config>,

    /// Handle to the room registry actor.
    pub registry: RoomRegistryHandle,

    /// Past admissions, consulted for returning users.
    pub history: Arc<dyn MembershipHistory>,

    /// SSE subscribers.
    pub events: EventHub,
}

/// Build the application routes.
///
/// - `/health`, `/ready` - probes, unauthenticated
/// - `/metrics` - Prometheus exposition, when a handle is given
/// - `/ws` - signaling WebSocket (authenticated)
/// - `/api/v1/meetings/:meeting_id/events` - room event stream (authenticated)
pub fn build_routes(
    state: AppState,
    health_state: Arc<HealthState>,
    metrics_handle: Option<PrometheusHandle>,
) -> Router {
    let relay_routes = Router::new()
        .route("/ws", get(handlers::websocket_handler))
        .route(
            "/api/v1/meetings/:meeting_id/events",
            get(handlers::events_handler),
        )
        .with_state(state);

    let mut app = relay_routes.merge(health_router(health_state));

    if let Some(handle) = metrics_handle {
        let metrics_routes = Router::new().route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
        app = app.merge(metrics_routes);
    }

    app.layer(TraceLayer::new_for_http())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{RegistryMetrics, RegistrySettings, RoomRegistry};
    use crate::history::InMemoryMembershipHistory;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::collections::HashMap;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn app() -> Router {
        let vars = HashMap::from([("JWT_SECRET".to_string(), "test-secret".to_string())]);
        let config = Config::from_vars(&vars).unwrap();
        let metrics = RegistryMetrics::new();
        let (registry, _task) = RoomRegistry::spawn(
            RegistrySettings::default(),
            Arc::clone(&metrics),
            None,
            CancellationToken::new(),
        );
        let state = AppState {
            config: Arc::new(config),
            registry,
            history: Arc::new(InMemoryMembershipHistory::new()),
            events: EventHub::new(8),
        };
        let health = Arc::new(HealthState::new(metrics));
        health.set_ready();
        build_routes(state, health, None)
    }

    async fn status(app: Router, uri: &str, bearer: Option<&str>) -> StatusCode {
        let mut request = Request::builder().uri(uri);
        if let Some(token) = bearer {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        app.oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_probes_are_public() {
        assert_eq!(status(app(), "/health", None).await, StatusCode::OK);
        assert_eq!(status(app(), "/ready", None).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_requires_token() {
        assert_eq!(
            status(app(), "/ws?meeting_id=00000000-0000-0000-0000-000000000001", None).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_events_reject_garbage_token() {
        let uri = format!("/api/v1/meetings/{}/events", common::types::RoomId::new());
        assert_eq!(
            status(app(), &uri, Some("not-a-jwt")).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_metrics_absent_without_handle() {
        assert_eq!(status(app(), "/metrics", None).await, StatusCode::NOT_FOUND);
    }
}
