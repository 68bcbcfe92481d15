//! Cache of schema documents keyed by id.
//!
//! Documents are either preloaded, set explicitly, or fetched on first use
//! through a [`SchemaFetcher`]. Fetches are coalesced per id and cached, a
//! missing document included. Every document that arrives is announced on a
//! broadcast channel.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::cache::LoadCache;
use crate::error::ResolveError;
use crate::loader::{resolve_pointer, split_ref, SchemaFetcher};

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Announcement that a schema document became available or changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaUpdate {
    pub id: String,
}

pub struct SchemaClient {
    documents: LoadCache<String, Option<Arc<Value>>>,
    fetcher: Option<Arc<dyn SchemaFetcher>>,
    updates: broadcast::Sender<SchemaUpdate>,
}

impl fmt::Debug for SchemaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaClient")
            .field("documents", &self.documents.loaded_keys())
            .field("fetcher", &self.fetcher.is_some())
            .finish()
    }
}

impl Default for SchemaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaClient {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            documents: LoadCache::new(),
            fetcher: None,
            updates,
        }
    }

    /// Client with documents already in place.
    pub fn with_documents<I, S>(documents: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let client = Self::new();
        for (id, schema) in documents {
            client.documents.insert(id.into(), Some(Arc::new(schema)));
        }
        client
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn SchemaFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchemaUpdate> {
        self.updates.subscribe()
    }

    /// A whole document, if it is already available.
    pub fn get_root_schema(&self, id: &str) -> Option<Arc<Value>> {
        self.documents.value(&id.to_string()).flatten()
    }

    /// Synchronous lookup of `"<documentId>#<path>"`.
    ///
    /// `Ok(None)` while the document is not available.
    pub fn get_schema(&self, reference: &str) -> Result<Option<Value>, ResolveError> {
        let (id, path) = split_ref(reference);
        let Some(document) = self.get_root_schema(id) else {
            return Ok(None);
        };
        resolve_pointer(&document, path)
            .map(|schema| Some(schema.clone()))
            .map_err(|source| ResolveError::Pointer {
                reference: reference.to_string(),
                source,
            })
    }

    /// Load a document, fetching it at most once.
    ///
    /// `Ok(None)` when no fetcher is configured or the fetcher has no such document.
    pub async fn load_schema(&self, id: &str) -> Result<Option<Arc<Value>>, ResolveError> {
        let key = id.to_string();
        let fetcher = self.fetcher.clone();
        let updates = self.updates.clone();
        let document_id = key.clone();
        self.documents
            .get_or_load(&key, move || async move {
                let Some(fetcher) = fetcher else {
                    return Ok(None);
                };
                debug!(id = %document_id, "fetching schema document");
                let schema = fetcher.fetch(&document_id).await?.map(Arc::new);
                if schema.is_some() {
                    announce(&updates, &document_id);
                }
                Ok(schema)
            })
            .await
            .map_err(|source| ResolveError::Load { id: key, source })
    }

    /// Load the document a reference points into and follow the path.
    pub async fn load_schema_from_ref(&self, reference: &str) -> Result<Option<Value>, ResolveError> {
        let (id, path) = split_ref(reference);
        let Some(document) = self.load_schema(id).await? else {
            return Ok(None);
        };
        resolve_pointer(&document, path)
            .map(|schema| Some(schema.clone()))
            .map_err(|source| ResolveError::Pointer {
                reference: reference.to_string(),
                source,
            })
    }

    /// Put a document in place, replacing any cached or in-flight one.
    pub fn set_schema(&self, id: impl Into<String>, schema: Value) {
        let id = id.into();
        self.documents.insert(id.clone(), Some(Arc::new(schema)));
        self.announce(&id);
    }

    fn announce(&self, id: &str) {
        announce(&self.updates, id);
    }
}

fn announce(updates: &broadcast::Sender<SchemaUpdate>, id: &str) {
    // No subscribers is fine.
    let _ = updates.send(SchemaUpdate { id: id.to_string() });
}
