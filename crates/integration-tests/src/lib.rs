//! Integration tests for the storefront cart sync layer.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cartsync-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `guest_cart` - Cart operations while signed out
//! - `login_merge` - Guest-to-account merge on sign-in
//! - `account_cart` - Cart operations while signed in
//! - `concurrency` - Unguarded concurrent mutations
//! - `context` - End-to-end flows through `CartContext`
//!
//! Everything runs against the in-memory stores and identity provider, so no
//! external services are needed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cartsync_core::{Account, AccountId, Cart, CartItem, Price};
use cartsync_storefront::services::cart::{CartSubscription, LocalCart, RemoteCart};
use cartsync_storefront::services::{Credential, MemoryIdentityProvider};
use cartsync_storefront::stores::{MemoryDocumentStore, MemoryKeyValueStore};
use cartsync_storefront::{CartContext, CartSyncConfig};

/// How long to wait for asynchronous propagation before failing a test.
pub const WAIT: Duration = Duration::from_secs(2);

/// A cart context over in-memory stores, with handles to every store.
pub struct TestContext {
    pub key_value: MemoryKeyValueStore,
    pub documents: MemoryDocumentStore,
    pub provider: MemoryIdentityProvider,
    pub context: CartContext,
}

impl TestContext {
    /// Start a context with default configuration. Signed out.
    #[must_use]
    pub fn new() -> Self {
        let key_value = MemoryKeyValueStore::new();
        let documents = MemoryDocumentStore::new();
        let provider = MemoryIdentityProvider::new();
        let context = CartContext::new(
            CartSyncConfig::default(),
            Arc::new(key_value.clone()),
            Arc::new(documents.clone()),
            &provider,
        );
        Self {
            key_value,
            documents,
            provider,
            context,
        }
    }

    /// Direct access to the guest cart in the key-value store.
    #[must_use]
    pub fn local(&self) -> LocalCart {
        LocalCart::new(
            Arc::new(self.key_value.clone()),
            self.context.config().guest_cart_key.clone(),
        )
    }

    /// Direct access to account carts in the document store.
    #[must_use]
    pub fn remote(&self) -> RemoteCart {
        RemoteCart::new(Arc::new(self.documents.clone()))
    }

    /// Write an account record for `id`.
    pub async fn register(&self, id: &str) -> Account {
        self.context
            .accounts()
            .register(AccountId::new(id), &format!("{id}@example.com"), None)
            .await
            .expect("register account")
    }

    /// Sign in as `id` and wait until the cart has switched to the account.
    pub async fn sign_in(&self, id: &str) {
        self.provider.sign_in(Credential::new(id));
        let account_id = AccountId::new(id);
        eventually(|| {
            let signed_in = self
                .context
                .cart()
                .state()
                .account()
                .is_some_and(|account| account.id == account_id);
            async move { signed_in }
        })
        .await;
    }

    /// Sign out and wait until the cart has switched to guest storage.
    pub async fn sign_out(&self) {
        self.provider.sign_out();
        eventually(|| {
            let signed_out = self.context.cart().state().account().is_none();
            async move { signed_out }
        })
        .await;
    }

    /// Wait until the guest cart is empty in storage.
    pub async fn wait_for_guest_cleared(&self) {
        let local = self.local();
        eventually(|| {
            let local = local.clone();
            async move { local.load().await.is_ok_and(|cart| cart.is_empty()) }
        })
        .await;
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `check` until it returns `true`, panicking after [`WAIT`].
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Wait until the published cart satisfies `predicate`.
pub async fn wait_for_cart(
    subscription: &mut CartSubscription,
    predicate: impl FnMut(&Cart) -> bool,
) -> Cart {
    tokio::time::timeout(WAIT, subscription.wait_for(predicate))
        .await
        .expect("cart not published in time")
        .expect("cart publisher dropped")
}

/// A catalogue item priced at $2.50.
#[must_use]
pub fn item(product_id: &str) -> CartItem {
    CartItem::new(
        product_id,
        format!("Product {product_id}"),
        Price::from_cents(250).expect("valid price"),
        format!("https://cdn.example.com/{product_id}.png"),
    )
}

/// Quantity of `product_id` in `cart`, if present.
#[must_use]
pub fn quantity_of(cart: &Cart, product_id: &str) -> Option<u32> {
    cart.get(&product_id.into()).map(|item| item.quantity)
}
