//! Account cart adapter over the document store.
//!
//! Each item lives at `accounts/{accountId}/cart/{productId}`. Item writes are
//! merge-writes of every item field, so writing an item that already exists
//! replaces its quantity rather than adding to it.

use std::sync::Arc;

use futures::StreamExt;
use futures::future::join_all;
use futures::stream::BoxStream;
use serde_json::json;
use tracing::warn;

use cartsync_core::{AccountId, Cart, CartItem, ProductId};

use crate::error::StoreError;
use crate::stores::{Document, DocumentStore, encode_fields, paths};

/// Stream of decoded account cart snapshots.
pub type CartSnapshots = BoxStream<'static, Result<Cart, StoreError>>;

/// The account-scoped remote cart.
#[derive(Clone)]
pub struct RemoteCart {
    documents: Arc<dyn DocumentStore>,
}

impl RemoteCart {
    /// Create an adapter over `documents`.
    #[must_use]
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    /// Merge-write every field of `item` at its product key.
    ///
    /// # Errors
    ///
    /// Returns the store error if the write fails.
    pub async fn upsert(&self, account_id: &AccountId, item: &CartItem) -> Result<(), StoreError> {
        self.documents
            .upsert_merge(
                &paths::cart_item(account_id, &item.product_id),
                encode_fields(item)?,
            )
            .await
    }

    /// Set the quantity of an existing item.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the item is not in the cart.
    pub async fn set_quantity(
        &self,
        account_id: &AccountId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<(), StoreError> {
        self.documents
            .update(
                &paths::cart_item(account_id, product_id),
                encode_fields(&json!({ "quantity": quantity }))?,
            )
            .await
    }

    /// Delete an item. Deleting an absent item succeeds.
    ///
    /// # Errors
    ///
    /// Returns the store error if the delete fails.
    pub async fn remove(&self, account_id: &AccountId, product_id: &ProductId) -> Result<(), StoreError> {
        self.documents
            .delete(&paths::cart_item(account_id, product_id))
            .await
    }

    /// Read the whole account cart.
    ///
    /// # Errors
    ///
    /// Returns the store error if the listing fails.
    pub async fn load(&self, account_id: &AccountId) -> Result<Cart, StoreError> {
        let documents = self.documents.list_documents(&paths::cart(account_id)).await?;
        Ok(cart_from_documents(account_id, documents))
    }

    /// Delete every item in the account cart.
    ///
    /// Lists the cart, then issues one delete per item. The deletes are not
    /// atomic: on failure the items whose delete failed stay in the cart.
    /// Returns the number of items deleted.
    ///
    /// # Errors
    ///
    /// Returns the listing error, or the first failed delete.
    pub async fn clear(&self, account_id: &AccountId) -> Result<usize, StoreError> {
        let collection = paths::cart(account_id);
        let documents = self.documents.list_documents(&collection).await?;

        let results = join_all(documents.iter().map(|document| {
            let path = format!("{collection}/{}", document.id);
            async move { self.documents.delete(&path).await }
        }))
        .await;

        let mut deleted = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!(account_id = %account_id, error = %e, "Cart item delete failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(deleted), Err)
    }

    /// Watch the account cart. Yields the current cart first.
    #[must_use]
    pub fn watch(&self, account_id: &AccountId) -> CartSnapshots {
        let account_id = account_id.clone();
        self.documents
            .watch_collection(&paths::cart(&account_id))
            .map(move |snapshot| snapshot.map(|docs| cart_from_documents(&account_id, docs)))
            .boxed()
    }
}

/// Decode cart documents, skipping (and logging) any that don't decode.
fn cart_from_documents(account_id: &AccountId, documents: Vec<Document>) -> Cart {
    documents
        .into_iter()
        .filter_map(|document| match document.decode::<CartItem>() {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(
                    account_id = %account_id,
                    document_id = %document.id,
                    error = %e,
                    "Skipping malformed cart document"
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartsync_core::Price;

    use super::*;
    use crate::stores::MemoryDocumentStore;

    fn remote() -> (MemoryDocumentStore, RemoteCart, AccountId) {
        let store = MemoryDocumentStore::new();
        (store.clone(), RemoteCart::new(Arc::new(store)), AccountId::new("u1"))
    }

    fn item(id: &str, quantity: u32) -> CartItem {
        CartItem::new(id, id, Price::from_cents(100).unwrap(), "").with_quantity(quantity)
    }

    #[tokio::test]
    async fn test_upsert_overwrites_quantity() {
        let (_, remote, account) = remote();
        remote.upsert(&account, &item("A", 5)).await.unwrap();
        remote.upsert(&account, &item("A", 3)).await.unwrap();

        let cart = remote.load(&account).await.unwrap();
        assert_eq!(cart.get(&"A".into()).unwrap().quantity, 3);
    }

    #[tokio::test]
    async fn test_item_document_stores_numeric_price() {
        let (store, remote, account) = remote();
        remote.upsert(&account, &item("A", 1)).await.unwrap();

        let document = store.get("accounts/u1/cart/A").await.unwrap().unwrap();
        assert!(document.fields["price"].is_number());
        assert_eq!(document.fields["price"], 1.0);
    }

    #[tokio::test]
    async fn test_set_quantity_missing_item() {
        let (_, remote, account) = remote();
        assert!(matches!(
            remote.set_quantity(&account, &"A".into(), 2).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_partial_failure() {
        let (store, remote, account) = remote();
        remote.upsert(&account, &item("A", 1)).await.unwrap();
        remote.upsert(&account, &item("B", 1)).await.unwrap();
        store.fail_path("accounts/u1/cart/B");

        assert!(remote.clear(&account).await.is_err());

        store.clear_failures();
        let left = remote.load(&account).await.unwrap();
        assert_eq!(left.len(), 1);
        assert!(left.get(&"B".into()).is_some());
    }

    #[tokio::test]
    async fn test_malformed_documents_are_skipped() {
        let (store, remote, account) = remote();
        remote.upsert(&account, &item("A", 1)).await.unwrap();
        store
            .upsert_merge(
                "accounts/u1/cart/junk",
                encode_fields(&json!({"quantity": "lots"})).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(remote.load(&account).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_watch_follows_writes() {
        let (_, remote, account) = remote();
        let mut snapshots = remote.watch(&account);
        assert!(snapshots.next().await.unwrap().unwrap().is_empty());

        remote.upsert(&account, &item("A", 2)).await.unwrap();
        let cart = snapshots.next().await.unwrap().unwrap();
        assert_eq!(cart.total_quantity(), 2);
    }
}
