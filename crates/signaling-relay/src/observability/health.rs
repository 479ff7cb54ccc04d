//! Liveness and readiness probes for the signaling relay.
//!
//! - `GET /health` - 200 while the process runs
//! - `GET /ready` - 200 once the listener is bound, 503 before that and
//!   after shutdown begins. Either way the body reports current load:
//!
//! ```json
//! { "status": "ready", "rooms": 3, "connections": 11 }
//! ```
//!
//! `/metrics` is served separately from the Prometheus handle.

use crate::actors::RegistryMetrics;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Probe state shared by `main` and the health routes.
#[derive(Debug)]
pub struct HealthState {
    ready: AtomicBool,
    registry: Arc<RegistryMetrics>,
}

impl HealthState {
    /// Not ready until [`HealthState::set_ready`] is called.
    #[must_use]
    pub fn new(registry: Arc<RegistryMetrics>) -> Self {
        Self {
            ready: AtomicBool::new(false),
            registry,
        }
    }

    /// The listener is bound and accepting connections.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Shutdown has begun.
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Body of `GET /ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub rooms: usize,
    pub connections: usize,
}

/// Router serving `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let load = state.registry.snapshot();
    let (code, status) = if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (
        code,
        Json(ReadinessResponse {
            status,
            rooms: load.rooms_active,
            connections: load.connections_active,
        }),
    )
}
