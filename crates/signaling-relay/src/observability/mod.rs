//! Observability for the signaling relay.
//!
//! Logging uses `tracing` with one target per component:
//!
//! | Target | Component |
//! |--------|-----------|
//! | `relay.registry` | room registry actor |
//! | `relay.ws` | WebSocket connection handler |
//! | `relay.events` | event hub and SSE streams |
//! | `relay.auth` | token extraction and validation |
//!
//! # Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `relay_connections_active` | Gauge | none |
//! | `relay_rooms_active` | Gauge | none |
//! | `relay_event_subscribers_active` | Gauge | none |
//! | `relay_messages_routed_total` | Counter | `kind` |
//! | `relay_deliveries_dropped_total` | Counter | `reason` |
//! | `relay_admissions_total` | Counter | `outcome` |
//! | `relay_events_published_total` | Counter | `event_type` |
//! | `relay_connections_total` | Counter | `channel` |
//! | `relay_message_dispatch_seconds` | Histogram | `kind` |
//! | `relay_connection_duration_seconds` | Histogram | none |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
