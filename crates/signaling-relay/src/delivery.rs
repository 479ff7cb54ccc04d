//! Bounded per-subscriber delivery queues.
//!
//! Every connected client and every event subscriber owns one [`Outbox`].
//! Deliveries never wait: a full queue drops the payload for that one
//! subscriber and everyone else still receives it.
//!
//! An `Outbox` is not `Clone`. Whoever holds it is the only
//! producer, so dropping it is the single signal that closes the queue and
//! lets the consumer (a write pump or an event stream) finish.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Result of a single non-blocking delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The payload was queued.
    Delivered,
    /// The queue was full and the payload was discarded.
    Dropped,
    /// The consumer has gone away.
    Closed,
}

/// Producer end of a bounded delivery queue.
#[derive(Debug)]
pub struct Outbox<T> {
    sender: mpsc::Sender<T>,
}

impl<T> Outbox<T> {
    /// Create an outbox and the receiver its consumer drains.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queue `item` without waiting.
    pub fn try_deliver(&self, item: T) -> DeliveryOutcome {
        match self.sender.try_send(item) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(TrySendError::Full(_)) => DeliveryOutcome::Dropped,
            Err(TrySendError::Closed(_)) => DeliveryOutcome::Closed,
        }
    }

    /// Whether the consumer has dropped its receiver.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Tally of a fan-out: how many recipients got the payload and how many
/// missed it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients whose queue accepted the payload.
    pub delivered: usize,
    /// Recipients whose queue was full or closed.
    pub dropped: usize,
    /// Of `dropped`, recipients whose consumer had already gone away.
    pub closed: usize,
}

impl DeliveryReport {
    /// Fold one delivery attempt into the report.
    pub fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::Dropped => self.dropped += 1,
            DeliveryOutcome::Closed => {
                self.dropped += 1;
                self.closed += 1;
            }
        }
    }

    /// Combine two reports.
    #[must_use]
    pub fn merge(self, other: DeliveryReport) -> DeliveryReport {
        DeliveryReport {
            delivered: self.delivered + other.delivered,
            dropped: self.dropped + other.dropped,
            closed: self.closed + other.closed,
        }
    }

    /// Dropped deliveries whose queue was full, as opposed to closed.
    #[must_use]
    pub fn queue_full(&self) -> usize {
        self.dropped.saturating_sub(self.closed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (outbox, mut rx) = Outbox::channel(2);

        assert_eq!(outbox.try_deliver("a"), DeliveryOutcome::Delivered);
        assert_eq!(outbox.try_deliver("b"), DeliveryOutcome::Delivered);
        assert_eq!(outbox.try_deliver("c"), DeliveryOutcome::Dropped);

        assert_eq!(rx.recv().await, Some("a"));
        assert_eq!(rx.recv().await, Some("b"));
        assert_eq!(outbox.try_deliver("d"), DeliveryOutcome::Delivered);
        assert_eq!(rx.recv().await, Some("d"));
    }

    #[tokio::test]
    async fn test_dropping_outbox_closes_queue() {
        let (outbox, mut rx) = Outbox::channel(4);
        outbox.try_deliver(1);
        drop(outbox);

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_closed_consumer_is_reported() {
        let (outbox, rx) = Outbox::channel(4);
        drop(rx);

        assert!(outbox.is_closed());
        assert_eq!(outbox.try_deliver(()), DeliveryOutcome::Closed);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let (outbox, _rx) = Outbox::channel(0);
        assert_eq!(outbox.try_deliver(()), DeliveryOutcome::Delivered);
        assert_eq!(outbox.try_deliver(()), DeliveryOutcome::Dropped);
    }

    #[test]
    fn test_report_tally() {
        let mut report = DeliveryReport::default();
        report.record(DeliveryOutcome::Delivered);
        report.record(DeliveryOutcome::Dropped);
        report.record(DeliveryOutcome::Closed);

        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 2);
        assert_eq!(report.closed, 1);
        assert_eq!(report.queue_full(), 1);

        let merged = report.merge(DeliveryReport {
            delivered: 3,
            dropped: 1,
            closed: 0,
        });
        assert_eq!(merged.delivered, 4);
        assert_eq!(merged.dropped, 3);
        assert_eq!(merged.queue_full(), 2);
    }
}
