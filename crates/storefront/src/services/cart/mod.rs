//! Cart synchronizer.
//!
//! Owns the single source of truth for the cart. While no account is signed
//! in, the cart lives in the key-value store under the guest key. Once an
//! account signs in, the guest cart is merged into `accounts/{id}/cart` and
//! the account cart becomes authoritative: every snapshot of it is pushed to
//! the [`CartPublisher`].
//!
//! # Merge protocol
//!
//! 1. Read the guest cart.
//! 2. Upsert each item into the account cart, one at a time. An existing
//!    remote quantity for the same product is overwritten, not added to.
//! 3. Clear the guest cart, only once every upsert succeeded.
//! 4. Watch the account cart.
//!
//! A failure in step 1 or 2 leaves the guest cart untouched and surfaces as
//! [`CartError::MergeAborted`]. Re-running the merge is safe: upserts
//! overwrite, so items already written are simply written again.
//!
//! Signing out does not copy the account cart back into the guest cart. The
//! guest view starts from whatever the key-value store holds.

mod local;
mod publisher;
mod remote;

pub use local::{DEFAULT_GUEST_CART_KEY, LocalCart};
pub use publisher::{CartPublisher, CartSubscription};
pub use remote::{CartSnapshots, RemoteCart};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use cartsync_core::{Account, AccountId, Cart, CartItem, ProductId};

use crate::error::{CartError, Result};
use crate::replay::ReplaySubscriber;
use publisher::Epoch;

/// Which store is authoritative for the cart.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
    /// No account signed in; the guest cart is authoritative.
    #[default]
    Anonymous,
    /// The account's remote cart is authoritative.
    Authenticated(Account),
}

impl SyncState {
    /// The signed-in account, if any.
    #[must_use]
    pub const fn account(&self) -> Option<&Account> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated(account) => Some(account),
        }
    }
}

/// Keeps the published cart in sync with whichever store is authoritative.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CartSynchronizer {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    local: LocalCart,
    remote: RemoteCart,
    publisher: CartPublisher,
    state: RwLock<SyncState>,
    epoch: Arc<AtomicU64>,
    local_revision: AtomicU64,
    watch: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SyncInner {
    fn drop(&mut self) {
        if let Some(task) = self
            .watch
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

/// Work left to do after the state has switched.
enum Transition {
    Anonymous {
        sync: CartSynchronizer,
        epoch: Epoch,
    },
    Authenticated {
        sync: CartSynchronizer,
        account_id: AccountId,
        epoch: Epoch,
    },
}

impl CartSynchronizer {
    /// Create a synchronizer in the anonymous state.
    ///
    /// Nothing is published until the first identity is applied.
    #[must_use]
    pub fn new(local: LocalCart, remote: RemoteCart) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                local,
                remote,
                publisher: CartPublisher::new(),
                state: RwLock::new(SyncState::Anonymous),
                epoch: Arc::new(AtomicU64::new(0)),
                local_revision: AtomicU64::new(0),
                watch: Mutex::new(None),
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        self.read_state().clone()
    }

    /// Subscribe to the cart. The latest cart is available at once.
    #[must_use]
    pub fn subscribe(&self) -> CartSubscription {
        self.inner.publisher.subscribe()
    }

    /// The latest published cart.
    #[must_use]
    pub fn cart(&self) -> Cart {
        self.inner.publisher.latest()
    }

    // =========================================================================
    // Identity transitions
    // =========================================================================

    /// Switch to the state matching `identity` and wait for the switch to
    /// complete.
    ///
    /// Signing in as a different account runs the merge protocol. The same
    /// account again only refreshes the stored account record.
    ///
    /// # Errors
    ///
    /// Returns `CartError::MergeAborted` if the merge stopped early (the
    /// account cart is still watched), or a store error if the guest cart
    /// could not be read on sign-out.
    pub async fn apply_identity(&self, identity: Option<Account>) -> Result<()> {
        match self.transition(identity) {
            Some(transition) => transition.run().await,
            None => Ok(()),
        }
    }

    /// Follow `identity` on a background task, starting with its latest value.
    ///
    /// State switches happen in order on the driver task; the slow part of
    /// each transition (the merge) runs on its own task so a sign-out can
    /// interrupt a merge in flight.
    #[must_use]
    pub fn spawn_identity_driver(
        &self,
        mut identity: ReplaySubscriber<Option<Account>>,
    ) -> JoinHandle<()> {
        let sync = self.clone();
        tokio::spawn(async move {
            let mut next = Some(identity.latest());
            while let Some(current) = next {
                if let Some(transition) = sync.transition(current) {
                    tokio::spawn(async move {
                        if let Err(e) = transition.run().await {
                            error!(error = %e, "Cart identity transition failed");
                        }
                    });
                }
                next = identity.changed().await;
            }
            debug!("Identity stream ended");
        })
    }

    /// Merge the guest cart into the signed-in account's cart again.
    ///
    /// Returns the number of items merged.
    ///
    /// # Errors
    ///
    /// Returns `CartError::NotAuthenticated` if no account is signed in, or
    /// `CartError::MergeAborted` if the merge stopped early.
    #[instrument(skip(self))]
    pub async fn merge_guest_cart(&self) -> Result<usize> {
        let (state, epoch) = self.snapshot();
        let account = state.account().ok_or(CartError::NotAuthenticated)?;
        self.merge(&account.id, &epoch).await
    }

    fn transition(&self, identity: Option<Account>) -> Option<Transition> {
        let Some(account) = identity else {
            let epoch = self.begin(SyncState::Anonymous);
            return Some(Transition::Anonymous {
                sync: self.clone(),
                epoch,
            });
        };

        {
            let mut state = self.write_state();
            if let SyncState::Authenticated(current) = &mut *state
                && current.id == account.id
            {
                *current = account;
                return None;
            }
        }

        let account_id = account.id.clone();
        let epoch = self.begin(SyncState::Authenticated(account));
        Some(Transition::Authenticated {
            sync: self.clone(),
            account_id,
            epoch,
        })
    }

    /// Switch state, invalidate work from the previous state and detach the
    /// account cart watch.
    fn begin(&self, state: SyncState) -> Epoch {
        let epoch = {
            let mut current = self.write_state();
            *current = state;
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            Epoch::current(&self.inner.epoch)
        };

        if let Some(task) = self.lock_watch().take() {
            task.abort();
        }
        epoch
    }

    async fn enter_anonymous(&self, epoch: &Epoch) -> Result<()> {
        info!("Cart source: guest storage");
        let revision = self.inner.local_revision.load(Ordering::SeqCst);
        let loaded = self.inner.local.load().await;
        let cart = match &loaded {
            Ok(cart) => cart.clone(),
            Err(_) => Cart::empty(),
        };

        // A mutation that published while this load ran holds newer data.
        let state = self.read_state();
        if epoch.is_current() && self.inner.local_revision.load(Ordering::SeqCst) == revision {
            self.inner.publisher.publish(cart);
        }
        drop(state);

        loaded.map(|_| ()).map_err(CartError::from)
    }

    async fn enter_authenticated(&self, account_id: &AccountId, epoch: Epoch) -> Result<()> {
        info!(account_id = %account_id, "Cart source: account");
        let merged = self.merge(account_id, &epoch).await;

        let mut watch = self.lock_watch();
        if epoch.is_current() {
            let snapshots = self.inner.remote.watch(account_id);
            *watch = Some(self.inner.publisher.forward(snapshots, epoch));
        }
        drop(watch);

        merged.map(|_| ())
    }

    async fn merge(&self, account_id: &AccountId, epoch: &Epoch) -> Result<usize> {
        let abort = |merged: usize, total: usize, source: CartError| {
            error!(
                account_id = %account_id,
                merged,
                total,
                error = %source,
                "Guest cart merge aborted; guest cart kept"
            );
            CartError::MergeAborted {
                merged,
                total,
                source: Box::new(source),
            }
        };

        let guest = self
            .inner
            .local
            .load()
            .await
            .map_err(|e| abort(0, 0, e.into()))?;
        let total = guest.len();
        info!(account_id = %account_id, items = total, "Merging guest cart into account");

        for (merged, item) in guest.items().iter().enumerate() {
            if !epoch.is_current() {
                return Err(abort(merged, total, CartError::NotAuthenticated));
            }
            self.inner
                .remote
                .upsert(account_id, item)
                .await
                .map_err(|e| abort(merged, total, e.into()))?;
        }

        if !epoch.is_current() {
            return Err(abort(total, total, CartError::NotAuthenticated));
        }
        self.inner.local.clear().await.map_err(|e| {
            error!(account_id = %account_id, error = %e, "Guest cart merged but not cleared");
            CartError::from(e)
        })?;

        info!(account_id = %account_id, items = total, "Guest cart merged");
        Ok(total)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add one unit of `item` to the cart.
    ///
    /// The item's own quantity is ignored. In the guest cart an existing item
    /// is incremented; in an account cart the item is written with quantity 1,
    /// replacing any existing quantity.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Store` if the authoritative store fails.
    #[instrument(skip(self, item), fields(product_id = %item.product_id))]
    pub async fn add_to_cart(&self, item: &CartItem) -> Result<()> {
        let item = item.normalized();

        match self.state() {
            SyncState::Anonymous => {
                let mut cart = self.inner.local.load().await?;
                let quantity = cart.add_one(&item);
                self.inner.local.save(&cart).await?;
                self.publish_local(cart);
                debug!(quantity, "Added to guest cart");
            }
            SyncState::Authenticated(account) => {
                self.inner.remote.upsert(&account.id, &item).await?;
                debug!(account_id = %account.id, "Added to account cart");
            }
        }
        Ok(())
    }

    /// Set the quantity of an item. Zero is stored as-is; the item stays.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Store` if the authoritative store fails, including
    /// `StoreError::NotFound` when the item is not in an account cart.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn update_quantity(&self, product_id: &ProductId, quantity: u32) -> Result<()> {
        match self.state() {
            SyncState::Anonymous => {
                let mut cart = self.inner.local.load().await?;
                if cart.set_quantity(product_id, quantity) {
                    self.inner.local.save(&cart).await?;
                    self.publish_local(cart);
                } else {
                    debug!("Item not in guest cart");
                }
            }
            SyncState::Authenticated(account) => {
                self.inner
                    .remote
                    .set_quantity(&account.id, product_id, quantity)
                    .await?;
            }
        }
        Ok(())
    }

    /// Remove an item. Removing an absent item does nothing.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Store` if the authoritative store fails.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn remove_from_cart(&self, product_id: &ProductId) -> Result<()> {
        match self.state() {
            SyncState::Anonymous => {
                let mut cart = self.inner.local.load().await?;
                if cart.remove(product_id) {
                    self.inner.local.save(&cart).await?;
                    self.publish_local(cart);
                }
            }
            SyncState::Authenticated(account) => {
                self.inner.remote.remove(&account.id, product_id).await?;
            }
        }
        Ok(())
    }

    /// Remove every item.
    ///
    /// An account cart is cleared item by item; if a delete fails, the items
    /// not yet deleted remain.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Store` if the authoritative store fails.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self) -> Result<()> {
        match self.state() {
            SyncState::Anonymous => {
                self.inner.local.clear().await?;
                self.publish_local(Cart::empty());
            }
            SyncState::Authenticated(account) => {
                let deleted = self.inner.remote.clear(&account.id).await?;
                debug!(account_id = %account.id, deleted, "Account cart cleared");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// State and generation, read together.
    fn snapshot(&self) -> (SyncState, Epoch) {
        let state = self.read_state();
        (state.clone(), Epoch::current(&self.inner.epoch))
    }

    /// Publish a guest cart written by a mutation, unless an account has
    /// signed in since.
    fn publish_local(&self, cart: Cart) {
        let state = self.read_state();
        if *state == SyncState::Anonymous {
            self.inner.local_revision.fetch_add(1, Ordering::SeqCst);
            self.inner.publisher.publish(cart);
        } else {
            debug!("Dropping guest cart snapshot after sign-in");
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SyncState> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SyncState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_watch(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transition {
    async fn run(self) -> Result<()> {
        match self {
            Self::Anonymous { sync, epoch } => sync.enter_anonymous(&epoch).await,
            Self::Authenticated {
                sync,
                account_id,
                epoch,
            } => sync.enter_authenticated(&account_id, epoch).await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use cartsync_core::{Email, Price};
    use chrono::Utc;

    use super::*;
    use crate::error::StoreError;
    use crate::stores::{KeyValueStore, MemoryDocumentStore, MemoryKeyValueStore};

    struct Harness {
        kv: MemoryKeyValueStore,
        docs: MemoryDocumentStore,
        sync: CartSynchronizer,
        local: LocalCart,
        remote: RemoteCart,
    }

    fn harness() -> Harness {
        let kv = MemoryKeyValueStore::new();
        let docs = MemoryDocumentStore::new();
        let local = LocalCart::new(Arc::new(kv.clone()), DEFAULT_GUEST_CART_KEY);
        let remote = RemoteCart::new(Arc::new(docs.clone()));
        let sync = CartSynchronizer::new(local.clone(), remote.clone());
        Harness {
            kv,
            docs,
            sync,
            local,
            remote,
        }
    }

    fn account(id: &str) -> Account {
        Account::new_customer(
            AccountId::new(id),
            Email::parse(&format!("{id}@example.com")).unwrap(),
            None,
            Utc::now(),
        )
    }

    fn item(id: &str) -> CartItem {
        CartItem::new(id, format!("Product {id}"), Price::from_cents(250).unwrap(), "")
    }

    async fn wait_for_cart(sub: &mut CartSubscription, predicate: impl FnMut(&Cart) -> bool) -> Cart {
        tokio::time::timeout(Duration::from_secs(1), sub.wait_for(predicate))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_guest_add_twice_increments() {
        let h = harness();
        h.sync.apply_identity(None).await.unwrap();

        h.sync.add_to_cart(&item("A")).await.unwrap();
        h.sync.add_to_cart(&item("A").with_quantity(7)).await.unwrap();

        let cart = h.sync.cart();
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.get(&"A".into()).unwrap().quantity, 2);
        assert_eq!(h.local.load().await.unwrap(), cart);
    }

    #[tokio::test]
    async fn test_guest_remove_absent_is_noop() {
        let h = harness();
        h.sync.add_to_cart(&item("A")).await.unwrap();
        h.sync.remove_from_cart(&"B".into()).await.unwrap();

        assert_eq!(h.local.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_guest_update_quantity_zero_keeps_item() {
        let h = harness();
        h.sync.add_to_cart(&item("A")).await.unwrap();
        h.sync.update_quantity(&"A".into(), 0).await.unwrap();

        let cart = h.sync.cart();
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.total_quantity(), 0);
    }

    #[tokio::test]
    async fn test_guest_clear_then_subscribe_is_empty() {
        let h = harness();
        h.sync.add_to_cart(&item("A")).await.unwrap();
        h.sync.clear_cart().await.unwrap();

        assert!(h.sync.subscribe().latest().is_empty());
        assert_eq!(h.kv.get(DEFAULT_GUEST_CART_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_merges_and_clears_guest_cart() {
        let h = harness();
        h.sync.add_to_cart(&item("A")).await.unwrap();
        h.sync.add_to_cart(&item("A")).await.unwrap();
        h.sync.add_to_cart(&item("B")).await.unwrap();

        let mut sub = h.sync.subscribe();
        h.sync.apply_identity(Some(account("u1"))).await.unwrap();

        let cart = wait_for_cart(&mut sub, |cart| cart.len() == 2).await;
        assert_eq!(cart.get(&"A".into()).unwrap().quantity, 2);
        assert_eq!(cart.get(&"B".into()).unwrap().quantity, 1);
        assert!(h.local.load().await.unwrap().is_empty());
        assert!(matches!(h.sync.state(), SyncState::Authenticated(_)));
    }

    #[tokio::test]
    async fn test_merge_overwrites_account_quantity() {
        let h = harness();
        let u1 = AccountId::new("u1");
        h.remote.upsert(&u1, &item("A").with_quantity(5)).await.unwrap();
        h.local
            .save(&Cart::from_items([item("A").with_quantity(3)]))
            .await
            .unwrap();

        h.sync.apply_identity(Some(account("u1"))).await.unwrap();

        let cart = h.remote.load(&u1).await.unwrap();
        assert_eq!(cart.get(&"A".into()).unwrap().quantity, 3);
    }

    #[tokio::test]
    async fn test_failed_upsert_keeps_guest_cart() {
        let h = harness();
        let guest = Cart::from_items([item("A"), item("B"), item("C")]);
        h.local.save(&guest).await.unwrap();
        h.docs.fail_path("accounts/u1/cart/B");

        let err = h.sync.apply_identity(Some(account("u1"))).await.unwrap_err();
        match err {
            CartError::MergeAborted {
                merged,
                total,
                source,
            } => {
                assert_eq!((merged, total), (1, 3));
                assert!(matches!(*source, CartError::Store(StoreError::Unavailable(_))));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(h.local.load().await.unwrap(), guest);

        // Retry once the store recovers.
        h.docs.clear_failures();
        assert_eq!(h.sync.merge_guest_cart().await.unwrap(), 3);
        assert!(h.local.load().await.unwrap().is_empty());
        assert_eq!(h.remote.load(&AccountId::new("u1")).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unreadable_guest_store_aborts_merge() {
        let h = harness();
        h.kv.set_failing(true);

        let err = h.sync.apply_identity(Some(account("u1"))).await.unwrap_err();
        assert!(err.is_merge_abort());
    }

    #[tokio::test]
    async fn test_logout_mid_merge_aborts() {
        let h = harness();
        h.local
            .save(&Cart::from_items([item("A"), item("B")]))
            .await
            .unwrap();

        let login = h.sync.transition(Some(account("u1"))).unwrap();
        let logout = h.sync.transition(None).unwrap();

        let err = login.run().await.unwrap_err();
        let CartError::MergeAborted { merged, source, .. } = err else {
            panic!("expected merge abort");
        };
        assert_eq!(merged, 0);
        assert!(matches!(*source, CartError::NotAuthenticated));

        logout.run().await.unwrap();
        assert_eq!(h.sync.cart().len(), 2);
        assert_eq!(h.docs.document_count(), 0);
    }

    #[tokio::test]
    async fn test_same_account_does_not_remerge() {
        let h = harness();
        h.sync.apply_identity(Some(account("u1"))).await.unwrap();

        h.local.save(&Cart::from_items([item("A")])).await.unwrap();
        let mut renamed = account("u1");
        renamed.display_name = Some("Una".to_string());
        h.sync.apply_identity(Some(renamed)).await.unwrap();

        assert_eq!(h.local.load().await.unwrap().len(), 1);
        let state = h.sync.state();
        assert_eq!(state.account().unwrap().display_name.as_deref(), Some("Una"));
    }

    #[tokio::test]
    async fn test_logout_shows_guest_storage_only() {
        let h = harness();
        h.sync.apply_identity(Some(account("u1"))).await.unwrap();
        h.sync.add_to_cart(&item("A")).await.unwrap();

        let mut sub = h.sync.subscribe();
        wait_for_cart(&mut sub, |cart| cart.len() == 1).await;

        h.sync.apply_identity(None).await.unwrap();
        assert!(h.sync.cart().is_empty());
        assert_eq!(h.sync.state(), SyncState::Anonymous);
    }

    #[tokio::test]
    async fn test_account_mutations() {
        let h = harness();
        h.sync.apply_identity(Some(account("u1"))).await.unwrap();
        let mut sub = h.sync.subscribe();

        h.sync.add_to_cart(&item("A")).await.unwrap();
        h.sync.add_to_cart(&item("A")).await.unwrap();
        h.sync.add_to_cart(&item("B")).await.unwrap();
        let cart = wait_for_cart(&mut sub, |cart| cart.len() == 2).await;
        assert_eq!(cart.get(&"A".into()).unwrap().quantity, 1);

        h.sync.update_quantity(&"B".into(), 4).await.unwrap();
        wait_for_cart(&mut sub, |cart| cart.total_quantity() == 5).await;

        h.sync.remove_from_cart(&"A".into()).await.unwrap();
        h.sync.remove_from_cart(&"A".into()).await.unwrap();
        wait_for_cart(&mut sub, |cart| cart.len() == 1).await;

        h.sync.clear_cart().await.unwrap();
        wait_for_cart(&mut sub, Cart::is_empty).await;
    }

    #[tokio::test]
    async fn test_account_update_missing_item_fails() {
        let h = harness();
        h.sync.apply_identity(Some(account("u1"))).await.unwrap();

        let err = h.sync.update_quantity(&"A".into(), 2).await.unwrap_err();
        assert!(matches!(err, CartError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_merge_requires_account() {
        let h = harness();
        assert!(matches!(
            h.sync.merge_guest_cart().await,
            Err(CartError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_driver_follows_identity() {
        let h = harness();
        h.sync.add_to_cart(&item("A")).await.unwrap();

        let identity = crate::replay::Replay::new(None);
        let driver = h.sync.spawn_identity_driver(identity.subscribe());
        let mut sub = h.sync.subscribe();

        identity.publish(Some(account("u1")));
        tokio::time::timeout(Duration::from_secs(1), async {
            while h.remote.load(&AccountId::new("u1")).await.unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        wait_for_cart(&mut sub, |cart| cart.len() == 1).await;

        identity.publish(None);
        wait_for_cart(&mut sub, Cart::is_empty).await;
        driver.abort();
    }
}
