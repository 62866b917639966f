//! Fan-out of [`EpochSignal`]s to any number of subscribers

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use types::EpochSignal;

/// Broadcast bus for transition and cache signals.
///
/// Each subscriber gets its own unbounded channel, so a slow consumer never
/// blocks the publisher. Dropped receivers are pruned on the next publish.
#[derive(Debug, Default)]
pub struct SignalBus {
    subscribers: Mutex<Vec<Sender<EpochSignal>>>,
    published: AtomicU64,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<EpochSignal> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `signal` to every live subscriber, returning how many received it
    pub fn publish(&self, signal: EpochSignal) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(signal.clone()).is_ok());
        let delivered = subscribers.len();
        drop(subscribers);

        debug!(?signal, delivered, "Published epoch signal");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Total signals published since creation
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{CacheGeneration, CacheKind, Epoch};

    fn ready(generation: u64) -> EpochSignal {
        EpochSignal::CacheReady {
            cache: CacheKind::Bands,
            epoch: Epoch::from_year(2025),
            generation: CacheGeneration::new(generation),
        }
    }

    #[test]
    fn test_every_subscriber_receives_in_order() {
        let bus = SignalBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        assert_eq!(bus.publish(ready(1)), 2);
        assert_eq!(bus.publish(ready(2)), 2);

        for rx in [a, b] {
            assert_eq!(rx.try_recv().unwrap(), ready(1));
            assert_eq!(rx.try_recv().unwrap(), ready(2));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = SignalBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.publish(ready(1)), 1);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.published(), 1);
        assert!(kept.try_recv().is_ok());
    }
}
