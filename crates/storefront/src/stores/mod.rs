//! Store interfaces for the two physical cart stores.
//!
//! # Stores
//!
//! - [`KeyValueStore`] - device-persisted blobs; holds the guest cart under a
//!   single key as a JSON array of cart items
//! - [`DocumentStore`] - account-scoped remote documents with collection
//!   watches; holds account records and per-account cart collections
//!
//! Both are injected as trait objects. [`memory`] provides in-memory implementations for tests,
//! [`file`] a directory-backed key-value store for the CLI.
//!
//! # Document paths
//!
//! ```text
//! accounts/{accountId}                  account record
//! accounts/{accountId}/cart             cart collection
//! accounts/{accountId}/cart/{productId} one cart item
//! ```

pub mod file;
pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::StoreError;

pub use file::FileKeyValueStore;
pub use memory::{MemoryDocumentStore, MemoryKeyValueStore};

/// Field map of a stored document.
pub type Fields = Map<String, Value>;

/// Stream of full collection snapshots produced by a watch.
pub type Snapshots = BoxStream<'static, Result<Vec<Document>, StoreError>>;

/// Device-persisted string blob storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the blob stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous blob.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove the blob under `key`. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Remote document storage with collection watches.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a single document.
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError>;

    /// Set `fields` on the document at `path`, creating it if absent.
    /// Fields not named in `fields` keep their stored values.
    async fn upsert_merge(&self, path: &str, fields: Fields) -> Result<(), StoreError>;

    /// Set `fields` on an existing document.
    ///
    /// Fails with [`StoreError::NotFound`] if the document does not exist.
    async fn update(&self, path: &str, fields: Fields) -> Result<(), StoreError>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// List the documents directly inside a collection.
    async fn list_documents(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Watch a collection. The stream yields the current snapshot first and
    /// a fresh snapshot after every change.
    fn watch_collection(&self, collection: &str) -> Snapshots;
}

/// A stored document: its id (last path segment) and fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Last segment of the document path.
    pub id: String,
    /// Stored fields.
    pub fields: Fields,
}

impl Document {
    /// Decode the fields into a typed value.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error if the fields don't match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.fields.clone()))
    }
}

/// Encode a value as a document field map.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if `value` does not serialize to a
/// JSON object.
pub fn encode_fields<T: Serialize>(value: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::Serialization(serde::ser::Error::custom(
            format!("expected an object, got {other}"),
        ))),
    }
}

/// Document path builders.
pub mod paths {
    use cartsync_core::{AccountId, ProductId};

    /// Path of an account record.
    #[must_use]
    pub fn account(account_id: &AccountId) -> String {
        format!("accounts/{account_id}")
    }

    /// Path of an account's cart collection.
    #[must_use]
    pub fn cart(account_id: &AccountId) -> String {
        format!("accounts/{account_id}/cart")
    }

    /// Path of one item in an account's cart.
    #[must_use]
    pub fn cart_item(account_id: &AccountId, product_id: &ProductId) -> String {
        format!("accounts/{account_id}/cart/{product_id}")
    }
}
