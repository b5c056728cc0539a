//! Bounded, lossy queues between pipeline stages.
//!
//! Producers never wait: when a queue is full the newest item is dropped and
//! counted. Consumers wait with a timeout so they can notice shutdown.

use std::time::Duration;
use telemetry::metrics::SURVEILLANCE_QUEUE_DROPPED;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

pub const FRAME_QUEUE: &str = "frames";
pub const RESULTS_QUEUE: &str = "results";
pub const EVENT_QUEUE: &str = "events";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    /// Queue was full; the item was discarded
    Dropped,
    /// Receiver is gone
    Closed,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Recv<T> {
    Item(T),
    TimedOut,
    /// All senders are gone and the queue is drained
    Closed,
}

/// Create a queue holding at most `capacity` items (minimum 1)
pub fn lossy_channel<T>(name: &'static str, capacity: usize) -> (LossySender<T>, LossyReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (LossySender { name, tx }, LossyReceiver { name, rx })
}

#[derive(Debug)]
pub struct LossySender<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
}

impl<T> Clone for LossySender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<T> LossySender<T> {
    /// Push without blocking; drops `item` when the queue is full
    pub fn offer(&self, item: T) -> Offer {
        match self.tx.try_send(item) {
            Ok(()) => Offer::Accepted,
            Err(TrySendError::Full(_)) => {
                SURVEILLANCE_QUEUE_DROPPED
                    .with_label_values(&[self.name])
                    .inc();
                Offer::Dropped
            }
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct LossyReceiver<T> {
    name: &'static str,
    rx: mpsc::Receiver<T>,
}

impl<T> LossyReceiver<T> {
    /// Wait up to `timeout` for the next item
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Recv<T> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(item)) => Recv::Item(item),
            Ok(None) => Recv::Closed,
            Err(_) => Recv::TimedOut,
        }
    }

    /// Take the next item if one is already queued
    pub fn try_recv(&mut self) -> Recv<T> {
        match self.rx.try_recv() {
            Ok(item) => Recv::Item(item),
            Err(TryRecvError::Empty) => Recv::TimedOut,
            Err(TryRecvError::Disconnected) => Recv::Closed,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offer_drops_newest_when_full() {
        let (tx, mut rx) = lossy_channel("test", 2);

        assert_eq!(tx.offer(1), Offer::Accepted);
        assert_eq!(tx.offer(2), Offer::Accepted);
        assert_eq!(tx.offer(3), Offer::Dropped);
        assert_eq!(rx.len(), 2);

        assert_eq!(rx.recv_timeout(Duration::from_millis(10)).await, Recv::Item(1));
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)).await, Recv::Item(2));
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)).await, Recv::TimedOut);
    }

    #[tokio::test]
    async fn test_overflow_never_exceeds_capacity() {
        let (tx, mut rx) = lossy_channel("test", 5);
        let dropped_before = SURVEILLANCE_QUEUE_DROPPED.with_label_values(&["test"]).get();

        let accepted = (0..100)
            .filter(|i| tx.offer(*i) == Offer::Accepted)
            .count();
        assert_eq!(accepted, 5);
        assert!(
            SURVEILLANCE_QUEUE_DROPPED.with_label_values(&["test"]).get() >= dropped_before + 95
        );

        let mut drained = Vec::new();
        while let Recv::Item(item) = rx.try_recv() {
            drained.push(item);
        }
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_closed_when_sender_dropped() {
        let (tx, mut rx) = lossy_channel::<u32>("test", 1);
        assert_eq!(tx.capacity(), 1);
        drop(tx);
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)).await, Recv::Closed);
    }

    #[tokio::test]
    async fn test_offer_reports_closed_receiver() {
        let (tx, rx) = lossy_channel("test", 1);
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.offer(1), Offer::Closed);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (tx, _rx) = lossy_channel::<u8>("test", 0);
        assert_eq!(tx.capacity(), 1);
    }
}
