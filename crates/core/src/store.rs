//! Narrow document persistence used by every state machine.
//!
//! Reads fail open: a backend or decode error is logged and reported as an
//! absent document so the caller re-processes instead of dropping work.
//! Writes return their error and the caller must not advance in-memory state.

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, warn};

use crate::errors::StoreError;

pub const APPROVAL_REQUESTS: &str = "approval_requests";
pub const REMINDERS: &str = "reminders";
pub const VERIFICATIONS: &str = "verifications";
pub const CLAIMED_MESSAGES: &str = "claimed_messages";
pub const SENT_MESSAGES: &str = "sent_messages";

pub type DocumentPredicate<'a> = &'a (dyn Fn(&Value) -> bool + Send + Sync);

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Durable once it returns `Ok`.
    async fn save(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError>;
    async fn load(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;
    async fn query_all(
        &self,
        collection: &str,
        predicate: DocumentPredicate<'_>,
    ) -> Result<Vec<Value>, StoreError>;
    /// Returns whether a document was removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;
}

#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn save(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError> {
        self.collections
            .write()
            .await
            .entry(collection.to_owned())
            .or_default()
            .insert(id.to_owned(), document);
        Ok(())
    }

    async fn load(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.collections.read().await.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn query_all(
        &self,
        collection: &str,
        predicate: DocumentPredicate<'_>,
    ) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.values().filter(|doc| predicate(doc)).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .collections
            .write()
            .await
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(id).is_some()))
    }
}

/// Typed view over one collection.
pub struct Collection<T> {
    store: Arc<dyn DocumentStore>,
    name: &'static str,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), name: self.name, _record: PhantomData }
    }
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(store: Arc<dyn DocumentStore>, name: &'static str) -> Self {
        Self { store, name, _record: PhantomData }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn save(&self, id: &str, record: &T) -> Result<(), StoreError> {
        let document = serde_json::to_value(record).map_err(|err| StoreError::Encode {
            collection: self.name.to_owned(),
            id: id.to_owned(),
            message: err.to_string(),
        })?;

        if let Err(err) = self.store.save(self.name, id, document).await {
            error!(
                event_name = "store.write.failed",
                correlation_id = %id,
                collection = self.name,
                error = %err,
                "document write failed; state not advanced"
            );
            return Err(err);
        }
        Ok(())
    }

    pub async fn load(&self, id: &str) -> Option<T> {
        match self.store.load(self.name, id).await {
            Ok(Some(document)) => self.decode(id, document),
            Ok(None) => None,
            Err(err) => {
                warn!(
                    event_name = "store.read.failed",
                    correlation_id = %id,
                    collection = self.name,
                    error = %err,
                    "document read failed; treating as absent"
                );
                None
            }
        }
    }

    pub async fn all(&self) -> Vec<T> {
        match self.store.query_all(self.name, &|_: &Value| true).await {
            Ok(documents) => {
                documents.into_iter().filter_map(|document| self.decode("*", document)).collect()
            }
            Err(err) => {
                warn!(
                    event_name = "store.read.failed",
                    correlation_id = "*",
                    collection = self.name,
                    error = %err,
                    "collection scan failed; treating as empty"
                );
                Vec::new()
            }
        }
    }

    pub async fn matching(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.all().await.into_iter().filter(|record| predicate(record)).collect()
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.store.delete(self.name, id).await
    }

    fn decode(&self, id: &str, document: Value) -> Option<T> {
        match serde_json::from_value(document) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(
                    event_name = "store.decode.failed",
                    correlation_id = %id,
                    collection = self.name,
                    error = %err,
                    "stored document did not decode; skipping"
                );
                None
            }
        }
    }
}
