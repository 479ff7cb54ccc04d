//! In-process relay server for integration tests.
//!
//! Runs the real router on `127.0.0.1:0` with a fresh registry, event hub
//! and membership history. The server shuts down when the `TestServer` is
//! dropped.

use crate::fixtures::{TEST_JWT_ISSUER, TEST_JWT_SECRET};
use axum::Router;
use common::types::RoomId;
use signaling_relay::actors::{RegistryMetrics, RegistrySettings, RoomRegistry, RoomRegistryHandle};
use signaling_relay::config::Config;
use signaling_relay::events::EventHub;
use signaling_relay::history::{InMemoryMembershipHistory, MembershipHistory};
use signaling_relay::observability::HealthState;
use signaling_relay::routes::{build_routes, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running relay bound to an ephemeral local port.
pub struct TestServer {
    addr: SocketAddr,
    state: AppState,
    history: Arc<InMemoryMembershipHistory>,
    health: Arc<HealthState>,
    shutdown: CancellationToken,
    _server_task: JoinHandle<()>,
}

impl TestServer {
    /// Start a server with default configuration.
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start a server after letting `configure` adjust the configuration.
    pub async fn start_with(configure: impl FnOnce(&mut Config)) -> Self {
        let vars = HashMap::from([
            ("JWT_SECRET".to_string(), TEST_JWT_SECRET.to_string()),
            ("RELAY_JWT_ISSUER".to_string(), TEST_JWT_ISSUER.to_string()),
            ("RELAY_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ]);
        let mut config = Config::from_vars(&vars).expect("test configuration is valid");
        configure(&mut config);

        let shutdown = CancellationToken::new();
        let events = EventHub::new(config.event_queue_capacity);
        let metrics = RegistryMetrics::new();
        let (registry, _registry_task) = RoomRegistry::spawn(
            RegistrySettings {
                mailbox_capacity: config.registry_mailbox_capacity,
                announce_share_stop: config.announce_share_stop_on_disconnect,
            },
            Arc::clone(&metrics),
            Some(events.clone()),
            shutdown.child_token(),
        );

        let history = Arc::new(InMemoryMembershipHistory::new());
        let state = AppState {
            config: Arc::new(config),
            registry,
            history: Arc::clone(&history) as Arc<dyn MembershipHistory>,
            events,
        };

        let health = Arc::new(HealthState::new(metrics));
        let app = build_routes(state.clone(), Arc::clone(&health), None);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("listener has an address");
        health.set_ready();

        let server_token = shutdown.clone();
        let server_task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_token.cancelled().await })
                .await
                .expect("test server failed");
        });

        Self {
            addr,
            state,
            history,
            health,
            shutdown,
            _server_task: server_task,
        }
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// WebSocket URL for `room_id`, authenticating with `token` in the query.
    #[must_use]
    pub fn ws_url(&self, room_id: RoomId, token: &str) -> String {
        format!("ws://{}/ws?meeting_id={room_id}&token={token}", self.addr)
    }

    /// Handle to the server's registry, for state assertions.
    #[must_use]
    pub fn registry(&self) -> &RoomRegistryHandle {
        &self.state.registry
    }

    #[must_use]
    pub fn events(&self) -> &EventHub {
        &self.state.events
    }

    #[must_use]
    pub fn history(&self) -> &Arc<InMemoryMembershipHistory> {
        &self.history
    }

    #[must_use]
    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    /// A router sharing this server's state, for `tower::ServiceExt::oneshot`
    /// requests against the same registry.
    #[must_use]
    pub fn router(&self) -> Router {
        build_routes(self.state.clone(), Arc::clone(&self.health), None)
    }

    /// Stop accepting connections and stop the registry.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
