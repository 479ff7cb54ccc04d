//! Registry metrics and mailbox monitoring.
//!
//! Mailbox depth thresholds for the registry actor scale with its capacity
//! (`RELAY_REGISTRY_MAILBOX_CAPACITY`, default 1024):
//!
//! | Normal       | Warning            | Critical         |
//! |--------------|--------------------|------------------|
//! | <= 1/4 cap   | 1/4 cap - 3/4 cap  | > 3/4 cap        |
//! | <= 256       | 257-768            | > 768 (default)  |
//!
//! Counters are kept in atomics so tests and the actor can read them without
//! a Prometheus recorder; every update is mirrored to the `metrics` facade.

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Depth thresholds derived from a mailbox capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxThresholds {
    /// Depth above which the mailbox is elevated.
    pub normal: usize,
    /// Depth above which the mailbox is critical.
    pub warning: usize,
}

impl MailboxThresholds {
    #[must_use]
    pub const fn for_capacity(capacity: usize) -> Self {
        Self {
            normal: capacity / 4,
            warning: capacity / 4 * 3,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Tracks the registry mailbox backlog as observed at each dequeue.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_id: String,
    thresholds: MailboxThresholds,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            actor_id: actor_id.into(),
            thresholds: MailboxThresholds::for_capacity(capacity),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record the number of messages still queued behind the one being handled.
    pub fn observe_depth(&self, depth: usize) {
        let previous = self.depth.swap(depth, Ordering::Relaxed);
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);

        match self.level_for_depth(depth) {
            MailboxLevel::Critical => {
                warn!(
                    target: "relay.registry.mailbox",
                    actor_id = %self.actor_id,
                    depth = depth,
                    threshold = self.thresholds.warning,
                    "Mailbox depth critical"
                );
            }
            // Log once when crossing into the warning band
            MailboxLevel::Warning if previous <= self.thresholds.normal => {
                debug!(
                    target: "relay.registry.mailbox",
                    actor_id = %self.actor_id,
                    depth = depth,
                    "Mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    /// Record a message as processed.
    pub fn record_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.thresholds.warning {
            MailboxLevel::Critical
        } else if depth > self.thresholds.normal {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Admission outcome label for `relay_admissions_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Host admitted themselves with `host-join`.
    Host,
    /// Host approved a pending request.
    Approved,
    /// Returning user skipped the host.
    AutoApproved,
    /// Host rejected a pending request.
    Rejected,
}

impl AdmissionOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AdmissionOutcome::Host => "host",
            AdmissionOutcome::Approved => "approved",
            AdmissionOutcome::AutoApproved => "auto_approved",
            AdmissionOutcome::Rejected => "rejected",
        }
    }
}

/// Live counters for the room registry.
///
/// Shared between the registry actor (which updates values) and anything
/// that reports on it. All fields are atomic for lock-free access.
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    rooms_active: AtomicUsize,
    connections_active: AtomicUsize,
    messages_routed: AtomicU64,
    deliveries_dropped: AtomicU64,
    admissions_granted: AtomicU64,
    admissions_rejected: AtomicU64,
}

/// Snapshot of registry metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryMetricsSnapshot {
    pub rooms_active: usize,
    pub connections_active: usize,
    pub messages_routed: u64,
    pub deliveries_dropped: u64,
    pub admissions_granted: u64,
    pub admissions_rejected: u64,
}

impl RegistryMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set the number of rooms with at least one connection.
    pub fn set_rooms(&self, count: usize) {
        self.rooms_active.store(count, Ordering::SeqCst);
        prom::set_rooms_active(count);
    }

    /// Set the number of registered connections (awaiting plus admitted).
    pub fn set_connections(&self, count: usize) {
        self.connections_active.store(count, Ordering::SeqCst);
        prom::set_connections_active(count);
    }

    /// Record one message routed (directed or broadcast) of `kind`.
    pub fn record_routed(&self, kind: &'static str) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
        prom::record_message_routed(kind);
    }

    /// Record `count` deliveries lost to a full or closed queue.
    pub fn record_dropped(&self, reason: &'static str, count: usize) {
        if count == 0 {
            return;
        }
        self.deliveries_dropped
            .fetch_add(count as u64, Ordering::Relaxed);
        prom::record_deliveries_dropped(reason, count);
    }

    /// Record an admission decision.
    pub fn record_admission(&self, outcome: AdmissionOutcome) {
        match outcome {
            AdmissionOutcome::Rejected => {
                self.admissions_rejected.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.admissions_granted.fetch_add(1, Ordering::Relaxed);
            }
        }
        prom::record_admission(outcome.as_str());
    }

    /// Take a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> RegistryMetricsSnapshot {
        RegistryMetricsSnapshot {
            rooms_active: self.rooms_active.load(Ordering::SeqCst),
            connections_active: self.connections_active.load(Ordering::SeqCst),
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            deliveries_dropped: self.deliveries_dropped.load(Ordering::Relaxed),
            admissions_granted: self.admissions_granted.load(Ordering::Relaxed),
            admissions_rejected: self.admissions_rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_monitor_tracks_peak() {
        let monitor = MailboxMonitor::new("registry", 1024);

        monitor.observe_depth(3);
        monitor.observe_depth(10);
        monitor.observe_depth(2);

        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 10);
    }

    #[test]
    fn test_mailbox_monitor_levels() {
        let monitor = MailboxMonitor::new("registry", 1024);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        monitor.observe_depth(256);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        monitor.observe_depth(257);
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        monitor.observe_depth(769);
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);

        monitor.observe_depth(0);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);
    }

    #[test]
    fn test_mailbox_thresholds_follow_capacity() {
        assert_eq!(
            MailboxThresholds::for_capacity(64),
            MailboxThresholds {
                normal: 16,
                warning: 48
            }
        );

        let monitor = MailboxMonitor::new("registry", 64);
        monitor.observe_depth(20);
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);
        monitor.observe_depth(49);
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_mailbox_monitor_processed() {
        let monitor = MailboxMonitor::new("registry", 1024);
        monitor.record_processed();
        monitor.record_processed();
        assert_eq!(monitor.messages_processed(), 2);
    }

    #[test]
    fn test_registry_metrics_snapshot() {
        let metrics = RegistryMetrics::new();
        assert_eq!(metrics.snapshot(), RegistryMetricsSnapshot::default());

        metrics.set_rooms(2);
        metrics.set_connections(5);
        metrics.record_routed("offer");
        metrics.record_routed("peer-joined");
        metrics.record_dropped("queue_full", 3);
        metrics.record_dropped("closed", 0);
        metrics.record_admission(AdmissionOutcome::Host);
        metrics.record_admission(AdmissionOutcome::AutoApproved);
        metrics.record_admission(AdmissionOutcome::Rejected);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rooms_active, 2);
        assert_eq!(snapshot.connections_active, 5);
        assert_eq!(snapshot.messages_routed, 2);
        assert_eq!(snapshot.deliveries_dropped, 3);
        assert_eq!(snapshot.admissions_granted, 2);
        assert_eq!(snapshot.admissions_rejected, 1);
    }

    #[test]
    fn test_admission_outcome_labels() {
        assert_eq!(AdmissionOutcome::Host.as_str(), "host");
        assert_eq!(AdmissionOutcome::AutoApproved.as_str(), "auto_approved");
    }
}
