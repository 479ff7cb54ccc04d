//! Metrics definitions for the signaling relay.
//!
//! All metrics follow Prometheus naming conventions:
//! - `relay_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `kind`: the closed message vocabulary (~20 values)
//! - `reason`: `queue_full`, `closed`, `no_recipient`
//! - `outcome`: `host`, `approved`, `auto_approved`, `rejected`
//! - `channel`: `signaling`, `events`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to
/// render `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Dispatch runs entirely in memory; expect sub-millisecond p50
        .set_buckets_for_metric(
            Matcher::Prefix("relay_message_dispatch".to_string()),
            &[
                0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250,
            ],
        )
        .map_err(|e| format!("Failed to set dispatch latency buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Full("relay_connection_duration_seconds".to_string()),
            &[1.0, 10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0],
        )
        .map_err(|e| format!("Failed to set connection duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Registry Gauges
// ============================================================================

/// Metric: `relay_connections_active`
///
/// Connections registered in any room, awaiting or admitted.
pub fn set_connections_active(count: usize) {
    // usize to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_connections_active").set(count as f64);
}

/// Metric: `relay_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_rooms_active").set(count as f64);
}

/// Metric: `relay_event_subscribers_active`
pub fn set_event_subscribers_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_event_subscribers_active").set(count as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Metric: `relay_messages_routed_total`
/// Labels: `kind`
pub fn record_message_routed(kind: &'static str) {
    counter!("relay_messages_routed_total", "kind" => kind).increment(1);
}

/// Metric: `relay_deliveries_dropped_total`
/// Labels: `reason`
///
/// Best-effort delivery loss. A steadily increasing `queue_full` rate means
/// some clients cannot keep up with their room.
pub fn record_deliveries_dropped(reason: &'static str, count: usize) {
    counter!("relay_deliveries_dropped_total", "reason" => reason).increment(count as u64);
}

/// Metric: `relay_admissions_total`
/// Labels: `outcome`
pub fn record_admission(outcome: &'static str) {
    counter!("relay_admissions_total", "outcome" => outcome).increment(1);
}

/// Metric: `relay_events_published_total`
/// Labels: `event_type`
pub fn record_event_published(event_type: &'static str) {
    counter!("relay_events_published_total", "event_type" => event_type).increment(1);
}

/// Metric: `relay_connections_total`
/// Labels: `channel` (signaling, events)
pub fn record_connection_opened(channel: &'static str) {
    counter!("relay_connections_total", "channel" => channel).increment(1);
}

// ============================================================================
// Histograms
// ============================================================================

/// Metric: `relay_message_dispatch_seconds`
/// Labels: `kind`
///
/// Time from decoding an inbound frame to the registry's answer.
pub fn record_dispatch_latency(kind: &'static str, duration: Duration) {
    histogram!("relay_message_dispatch_seconds", "kind" => kind).record(duration.as_secs_f64());
}

/// Metric: `relay_connection_duration_seconds`
pub fn record_connection_duration(duration: Duration) {
    histogram!("relay_connection_duration_seconds").record(duration.as_secs_f64());
}
