//! Guest cart adapter over the key-value store.

use std::sync::Arc;

use tracing::warn;

use cartsync_core::Cart;

use crate::error::StoreError;
use crate::stores::KeyValueStore;

/// Default key-value store key of the guest cart.
pub const DEFAULT_GUEST_CART_KEY: &str = "guest_cart";

/// The device-local anonymous cart, stored as a JSON array under one key.
#[derive(Clone)]
pub struct LocalCart {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl LocalCart {
    /// Create an adapter storing the cart under `key`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Read the guest cart.
    ///
    /// A missing blob is an empty cart. So is a blob that fails to parse: the
    /// corrupt data is dropped (with a warning) rather than failing the caller.
    ///
    /// # Errors
    ///
    /// Returns the store error if the read itself fails.
    pub async fn load(&self) -> Result<Cart, StoreError> {
        let Some(blob) = self.store.get(&self.key).await? else {
            return Ok(Cart::empty());
        };

        match serde_json::from_str::<Cart>(&blob) {
            Ok(cart) => Ok(cart),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Discarding unreadable guest cart");
                Ok(Cart::empty())
            }
        }
    }

    /// Persist the guest cart.
    ///
    /// # Errors
    ///
    /// Returns the store error if serialization or the write fails.
    pub async fn save(&self, cart: &Cart) -> Result<(), StoreError> {
        let blob = serde_json::to_string(cart)?;
        self.store.set(&self.key, &blob).await
    }

    /// Remove the guest cart blob.
    ///
    /// # Errors
    ///
    /// Returns the store error if the removal fails.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(&self.key).await
    }
}
