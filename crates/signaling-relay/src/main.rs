//! Signaling Relay
//!
//! WebRTC signaling server. One listener serves:
//! - `GET /ws` - signaling WebSocket
//! - `GET /api/v1/meetings/:id/events` - room event stream (SSE)
//! - `GET /health`, `GET /ready` - probes
//! - `GET /metrics` - Prometheus exposition
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Spawn the `RoomRegistry` actor
//! 4. Bind the listener and mark the service ready
//! 5. Serve until SIGINT/SIGTERM, then drain

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;

use signaling_relay::actors::{RegistryMetrics, RegistrySettings, RoomRegistry};
use signaling_relay::config::Config;
use signaling_relay::events::EventHub;
use signaling_relay::history::InMemoryMembershipHistory;
use signaling_relay::observability::{init_metrics_recorder, HealthState};
use signaling_relay::routes::{build_routes, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signaling_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Signaling Relay");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        jwt_issuer = %config.jwt_issuer,
        pong_wait_seconds = config.pong_wait.as_secs(),
        write_wait_seconds = config.write_wait.as_secs(),
        max_message_bytes = config.max_message_bytes,
        client_queue_capacity = config.client_queue_capacity,
        announce_share_stop_on_disconnect = config.announce_share_stop_on_disconnect,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let registry_metrics = RegistryMetrics::new();
    let health_state = Arc::new(HealthState::new(Arc::clone(&registry_metrics)));
    let shutdown_token = CancellationToken::new();

    // Spawn the registry actor
    let events = EventHub::new(config.event_queue_capacity);
    let (registry, registry_task) = RoomRegistry::spawn(
        RegistrySettings {
            mailbox_capacity: config.registry_mailbox_capacity,
            announce_share_stop: config.announce_share_stop_on_disconnect,
        },
        registry_metrics,
        Some(events.clone()),
        shutdown_token.child_token(),
    );
    info!("RoomRegistry spawned");

    let bind_address: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address {}: {e}", config.bind_address)
    })?;

    let state = AppState {
        config: Arc::new(config),
        registry,
        history: Arc::new(InMemoryMembershipHistory::new()),
        events,
    };
    let app = build_routes(state, Arc::clone(&health_state), Some(prometheus_handle));

    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %bind_address, "Failed to bind listener");
            format!("Failed to bind listener to {bind_address}: {e}")
        })?;
    info!(addr = %bind_address, "Listener bound successfully");
    health_state.set_ready();

    let server_token = shutdown_token.clone();
    let server_health = Arc::clone(&health_state);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_token.cancelled().await;
        server_health.set_not_ready();
        info!("HTTP server shutting down");
    });

    let server_task = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    info!("Signaling Relay running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    // Trigger graceful shutdown via cancellation token.
    // The registry closes every client queue, so each connection's write
    // pump sends Close and the server can drain.
    info!("Shutdown signal received, initiating graceful shutdown...");
    health_state.set_not_ready();
    shutdown_token.cancel();

    if let Err(e) = registry_task.await {
        warn!(error = %e, "RoomRegistry task ended abnormally");
    }
    if let Err(e) = server_task.await {
        warn!(error = %e, "HTTP server task ended abnormally");
    }

    info!("Signaling Relay shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
