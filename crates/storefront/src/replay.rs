//! Replay-on-subscribe value streams.
//!
//! [`Replay`] is a single-slot cell plus a broadcast: publishing overwrites the
//! slot and wakes every subscriber, and a new subscriber reads the slot
//! immediately instead of waiting for the next publish. Both the identity
//! stream and the cart stream are built on it.
//!
//! Built on `tokio::sync::watch`, so slow subscribers skip intermediate values
//! and only ever observe the latest one.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Publishing side of a replayed value stream. Cheap to clone.
#[derive(Debug)]
pub struct Replay<T> {
    sender: Arc<watch::Sender<T>>,
}

impl<T> Clone for Replay<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T: Clone> Replay<T> {
    /// Create a stream holding `initial` as its latest value.
    #[must_use]
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Replace the latest value and notify subscribers, even when unchanged.
    pub fn publish(&self, value: T) {
        self.sender.send_replace(value);
    }

    /// Replace the latest value only if it differs from the current one.
    ///
    /// Returns `true` if subscribers were notified.
    pub fn publish_if_changed(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        self.sender.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    /// The latest published value.
    #[must_use]
    pub fn latest(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Subscribe. The subscriber's [`ReplaySubscriber::latest`] is available
    /// at once; [`ReplaySubscriber::changed`] resolves on the next publish.
    #[must_use]
    pub fn subscribe(&self) -> ReplaySubscriber<T> {
        ReplaySubscriber {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Receiving side of a [`Replay`] stream.
#[derive(Debug, Clone)]
pub struct ReplaySubscriber<T> {
    receiver: watch::Receiver<T>,
}

impl<T: Clone> ReplaySubscriber<T> {
    /// The latest value, marking it as seen.
    pub fn latest(&mut self) -> T {
        self.receiver.borrow_and_update().clone()
    }

    /// Wait for the next publish and return the new value.
    ///
    /// Returns `None` once the publishing side has been dropped.
    pub async fn changed(&mut self) -> Option<T> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Wait until the latest value satisfies `predicate`, checking the
    /// current value first.
    ///
    /// Returns `None` once the publishing side has been dropped.
    pub async fn wait_for(&mut self, predicate: impl FnMut(&T) -> bool) -> Option<T> {
        self.receiver
            .wait_for(predicate)
            .await
            .ok()
            .map(|value| value.clone())
    }
}

impl<T: Clone + Send + Sync + 'static> ReplaySubscriber<T> {
    /// Convert into a `Stream` that yields the latest value first, then
    /// every subsequent publish.
    #[must_use]
    pub fn into_stream(self) -> WatchStream<T> {
        WatchStream::new(self.receiver)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn test_late_subscriber_sees_latest() {
        let replay = Replay::new(0);
        replay.publish(1);
        replay.publish(2);

        let mut sub = replay.subscribe();
        assert_eq!(sub.latest(), 2);
    }

    #[tokio::test]
    async fn test_changed_waits_for_next_publish() {
        let replay = Replay::new("a".to_string());
        let mut sub = replay.subscribe();

        replay.publish("b".to_string());
        assert_eq!(sub.changed().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_publish_if_changed_dedupes() {
        let replay = Replay::new(Some(1));
        let mut sub = replay.subscribe();

        assert!(!replay.publish_if_changed(Some(1)));
        assert!(replay.publish_if_changed(None));
        assert_eq!(sub.changed().await, Some(None));
    }

    #[tokio::test]
    async fn test_changed_ends_when_publisher_dropped() {
        let replay = Replay::new(0);
        let mut sub = replay.subscribe();
        drop(replay);
        assert_eq!(sub.changed().await, None);
    }

    #[tokio::test]
    async fn test_stream_replays_then_follows() {
        let replay = Replay::new(10);
        let mut stream = replay.subscribe().into_stream();

        assert_eq!(stream.next().await, Some(10));
        replay.publish(11);
        assert_eq!(stream.next().await, Some(11));
    }
}
