//! In-memory store implementations.
//!
//! Used by tests and by the CLI for the remote side. Both stores support
//! fault injection so failure paths can be exercised deterministically.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use super::{Document, DocumentStore, Fields, KeyValueStore, Snapshots};
use crate::error::StoreError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// MemoryKeyValueStore
// =============================================================================

/// In-memory key-value store. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    inner: Arc<KeyValueInner>,
}

#[derive(Debug, Default)]
struct KeyValueInner {
    entries: Mutex<HashMap<String, String>>,
    failing: Mutex<bool>,
}

impl MemoryKeyValueStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `StoreError::Unavailable`
    /// (or succeed again with `false`).
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.inner.failing) = failing;
    }

    fn check(&self) -> Result<(), StoreError> {
        if *lock(&self.inner.failing) {
            return Err(StoreError::Unavailable("key-value store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        let value = lock(&self.inner.entries).get(key).cloned();
        // Suspend after the read so concurrent callers interleave the way
        // they would against real storage.
        tokio::task::yield_now().await;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        lock(&self.inner.entries).insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        lock(&self.inner.entries).remove(key);
        Ok(())
    }
}

// =============================================================================
// MemoryDocumentStore
// =============================================================================

/// In-memory document store with collection watches. Clones share the same
/// storage.
#[derive(Debug, Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<DocumentsInner>,
}

#[derive(Debug)]
struct DocumentsInner {
    documents: Mutex<BTreeMap<String, Fields>>,
    failing: Mutex<HashSet<String>>,
    revision: watch::Sender<u64>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(DocumentsInner {
                documents: Mutex::new(BTreeMap::new()),
                failing: Mutex::new(HashSet::new()),
                revision,
            }),
        }
    }

    /// Make every operation addressing exactly `path` fail with
    /// `StoreError::Unavailable`.
    pub fn fail_path(&self, path: impl Into<String>) {
        lock(&self.inner.failing).insert(path.into());
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        lock(&self.inner.failing).clear();
    }

    /// Number of stored documents across all collections.
    #[must_use]
    pub fn document_count(&self) -> usize {
        lock(&self.inner.documents).len()
    }
}

impl DocumentsInner {
    fn check(&self, path: &str) -> Result<(), StoreError> {
        if lock(&self.failing).contains(path) {
            return Err(StoreError::Unavailable(format!("injected failure at {path}")));
        }
        Ok(())
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.check(collection)?;
        let prefix = format!("{collection}/");
        let documents = lock(&self.documents);
        Ok(documents
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter_map(|(path, fields)| {
                let id = path.get(prefix.len()..)?;
                (!id.contains('/')).then(|| Document {
                    id: id.to_owned(),
                    fields: fields.clone(),
                })
            })
            .collect())
    }
}

fn document_id(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_owned()
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        self.inner.check(path)?;
        Ok(lock(&self.inner.documents)
            .get(path)
            .map(|fields| Document {
                id: document_id(path),
                fields: fields.clone(),
            }))
    }

    async fn upsert_merge(&self, path: &str, fields: Fields) -> Result<(), StoreError> {
        self.inner.check(path)?;
        lock(&self.inner.documents)
            .entry(path.to_owned())
            .or_default()
            .extend(fields);
        self.inner.bump();
        Ok(())
    }

    async fn update(&self, path: &str, fields: Fields) -> Result<(), StoreError> {
        self.inner.check(path)?;
        {
            let mut documents = lock(&self.inner.documents);
            let existing = documents
                .get_mut(path)
                .ok_or_else(|| StoreError::NotFound(path.to_owned()))?;
            existing.extend(fields);
        }
        self.inner.bump();
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.inner.check(path)?;
        let removed = lock(&self.inner.documents).remove(path).is_some();
        if removed {
            self.inner.bump();
        }
        Ok(())
    }

    async fn list_documents(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.inner.list(collection)
    }

    fn watch_collection(&self, collection: &str) -> Snapshots {
        let inner = Arc::clone(&self.inner);
        let collection = collection.to_owned();
        WatchStream::new(self.inner.revision.subscribe())
            .map(move |_| inner.list(&collection))
            .boxed()
    }
}
