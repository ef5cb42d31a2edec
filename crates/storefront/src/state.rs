//! Cart context shared across the client.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use cartsync_core::Account;

use crate::config::CartSyncConfig;
use crate::services::cart::{CartSynchronizer, LocalCart, RemoteCart};
use crate::services::{
    AccountError, AccountRepository, IdentityObserver, IdentityProvider, ProfileUpdate,
};
use crate::stores::{DocumentStore, KeyValueStore};

/// Wires the identity observer, account repository and cart synchronizer
/// together over injected stores.
///
/// This struct is cheaply cloneable via `Arc`. The cart follows the identity
/// provider for as long as any clone is alive.
#[derive(Clone)]
pub struct CartContext {
    inner: Arc<CartContextInner>,
}

struct CartContextInner {
    config: CartSyncConfig,
    accounts: AccountRepository,
    identity: IdentityObserver,
    cart: CartSynchronizer,
    driver: JoinHandle<()>,
}

impl Drop for CartContextInner {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl CartContext {
    /// Create a new cart context and start following `provider`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `config` - Cart sync configuration
    /// * `key_value` - Device-local store holding the guest cart
    /// * `documents` - Remote store holding accounts and account carts
    /// * `provider` - Source of authentication state
    #[must_use]
    pub fn new(
        config: CartSyncConfig,
        key_value: Arc<dyn KeyValueStore>,
        documents: Arc<dyn DocumentStore>,
        provider: &dyn IdentityProvider,
    ) -> Self {
        let accounts = AccountRepository::new(Arc::clone(&documents));
        let identity = IdentityObserver::spawn(provider, accounts.clone());
        let cart = CartSynchronizer::new(
            LocalCart::new(key_value, config.guest_cart_key.clone()),
            RemoteCart::new(documents),
        );
        let driver = cart.spawn_identity_driver(identity.subscribe());

        info!(guest_cart_key = %config.guest_cart_key, "Cart context started");

        Self {
            inner: Arc::new(CartContextInner {
                config,
                accounts,
                identity,
                cart,
                driver,
            }),
        }
    }

    /// Get a reference to the cart sync configuration.
    #[must_use]
    pub fn config(&self) -> &CartSyncConfig {
        &self.inner.config
    }

    /// Get a reference to the account repository.
    #[must_use]
    pub fn accounts(&self) -> &AccountRepository {
        &self.inner.accounts
    }

    /// Get a reference to the identity observer.
    #[must_use]
    pub fn identity(&self) -> &IdentityObserver {
        &self.inner.identity
    }

    /// Get a reference to the cart synchronizer.
    #[must_use]
    pub fn cart(&self) -> &CartSynchronizer {
        &self.inner.cart
    }

    /// Update the signed-in account's profile and republish the identity.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::NotSignedIn` if no account is signed in, or the
    /// repository error if the update fails.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Account, AccountError> {
        let current = self.identity().current().ok_or(AccountError::NotSignedIn)?;
        let updated = self.accounts().update_profile(&current.id, update).await?;
        self.identity().refresh().await;
        Ok(updated)
    }
}
