//! Cart state publisher.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cartsync_core::Cart;

use super::remote::CartSnapshots;
use crate::replay::{Replay, ReplaySubscriber};

/// Subscription to the current cart.
pub type CartSubscription = ReplaySubscriber<Cart>;

/// Hot, replayed stream of the full cart.
///
/// A new subscriber receives the latest cart immediately. Consumers derive
/// counts and totals from the cart themselves.
#[derive(Debug, Clone)]
pub struct CartPublisher {
    carts: Replay<Cart>,
}

impl Default for CartPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl CartPublisher {
    /// Create a publisher holding an empty cart.
    #[must_use]
    pub fn new() -> Self {
        Self {
            carts: Replay::new(Cart::empty()),
        }
    }

    /// Publish a full cart snapshot.
    pub fn publish(&self, cart: Cart) {
        self.carts.publish(cart);
    }

    /// The latest published cart.
    #[must_use]
    pub fn latest(&self) -> Cart {
        self.carts.latest()
    }

    /// Subscribe to cart snapshots.
    #[must_use]
    pub fn subscribe(&self) -> CartSubscription {
        self.carts.subscribe()
    }

    /// Push every snapshot from `snapshots` until the stream ends or `epoch`
    /// goes stale.
    pub(crate) fn forward(&self, mut snapshots: CartSnapshots, epoch: Epoch) -> JoinHandle<()> {
        let publisher = self.clone();
        tokio::spawn(async move {
            while let Some(snapshot) = snapshots.next().await {
                if !epoch.is_current() {
                    break;
                }
                match snapshot {
                    Ok(cart) => publisher.publish(cart),
                    Err(e) => warn!(error = %e, "Account cart snapshot failed"),
                }
            }
            debug!(epoch = epoch.value, "Account cart watch detached");
        })
    }
}

/// Snapshot of the synchronizer's state generation.
///
/// Every identity transition bumps the shared counter, which invalidates
/// all work started under the previous generation.
#[derive(Debug, Clone)]
pub(crate) struct Epoch {
    counter: Arc<AtomicU64>,
    value: u64,
}

impl Epoch {
    pub(crate) fn current(counter: &Arc<AtomicU64>) -> Self {
        Self {
            counter: Arc::clone(counter),
            value: counter.load(Ordering::SeqCst),
        }
    }

    pub(crate) fn is_current(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == self.value
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use cartsync_core::{CartItem, Price};
    use futures::stream;

    use super::*;
    use crate::error::StoreError;

    fn cart_of(quantity: u32) -> Cart {
        Cart::from_items([
            CartItem::new("A", "Apple", Price::from_cents(100).unwrap(), "").with_quantity(quantity),
        ])
    }

    #[tokio::test]
    async fn test_new_subscriber_gets_latest() {
        let publisher = CartPublisher::new();
        publisher.publish(cart_of(2));

        let mut sub = publisher.subscribe();
        assert_eq!(sub.latest().total_quantity(), 2);
    }

    #[tokio::test]
    async fn test_forward_publishes_until_stream_ends() {
        let publisher = CartPublisher::new();
        let counter = Arc::new(AtomicU64::new(0));
        let snapshots = stream::iter(vec![
            Ok(cart_of(1)),
            Err(StoreError::Unavailable("offline".to_string())),
            Ok(cart_of(4)),
        ])
        .boxed();

        publisher
            .forward(snapshots, Epoch::current(&counter))
            .await
            .unwrap();
        assert_eq!(publisher.latest().total_quantity(), 4);
    }

    #[tokio::test]
    async fn test_forward_stops_when_epoch_is_stale() {
        let publisher = CartPublisher::new();
        let counter = Arc::new(AtomicU64::new(0));
        let epoch = Epoch::current(&counter);
        counter.fetch_add(1, Ordering::SeqCst);

        let snapshots = stream::iter(vec![Ok(cart_of(9))]).boxed();
        tokio::time::timeout(Duration::from_secs(1), publisher.forward(snapshots, epoch))
            .await
            .unwrap()
            .unwrap();
        assert!(publisher.latest().is_empty());
    }
}
