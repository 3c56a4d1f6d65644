//! The saved-document set and the key-value store it persists to.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{AssistantError, Result};
use crate::models::Document;

/// Key the saved set is stored under
pub const SAVED_RESULTS_KEY: &str = "savedResults";

/// Minimal string key-value persistence
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
}

/// Process-local store, lost on restart
#[derive(Default)]
pub struct InMemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by a single JSON object on disk
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<HashMap<String, String>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(AssistantError::Storage(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| {
            AssistantError::Storage(format!("{} is not a JSON object: {}", self.path.display(), e))
        })
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.read_all().await?;
        values.insert(key.to_string(), value);
        let raw = serde_json::to_string_pretty(&values)
            .map_err(|e| AssistantError::Storage(e.to_string()))?;
        tokio::fs::write(&self.path, raw).await.map_err(|e| {
            AssistantError::Storage(format!("cannot write {}: {}", self.path.display(), e))
        })
    }
}

/// Documents the user saved, mirrored to a [`KeyValueStore`] after every change.
///
/// Only user actions mutate the set.
pub struct SavedResults {
    store: Arc<dyn KeyValueStore>,
    documents: RwLock<Vec<Document>>,
}

impl SavedResults {
    /// Restore the set persisted in `store`, or start empty
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let documents = match store.get(SAVED_RESULTS_KEY).await? {
            Some(raw) => serde_json::from_str::<Vec<Document>>(&raw).map_err(|e| {
                AssistantError::Storage(format!("saved results are corrupt: {}", e))
            })?,
            None => Vec::new(),
        };
        info!(count = documents.len(), "Loaded saved results");

        Ok(Self {
            store,
            documents: RwLock::new(documents),
        })
    }

    pub async fn list(&self) -> Vec<Document> {
        self.documents.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.documents.read().await.iter().any(|d| d.id == id)
    }

    /// Returns `false` when a document with the same id is already saved
    pub async fn add(&self, document: Document) -> Result<bool> {
        Ok(self.add_many(vec![document]).await? == 1)
    }

    /// Save every new document; returns how many were added
    pub async fn add_many(&self, documents: Vec<Document>) -> Result<usize> {
        let mut saved = self.documents.write().await;
        let mut added = 0;
        for document in documents {
            if saved.iter().any(|d| d.id == document.id) {
                debug!(id = %document.id, "Document already saved");
                continue;
            }
            saved.push(document);
            added += 1;
        }
        if added > 0 {
            self.persist(&saved).await?;
        }
        Ok(added)
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut saved = self.documents.write().await;
        let before = saved.len();
        saved.retain(|d| d.id != id);
        if saved.len() == before {
            return Ok(false);
        }
        self.persist(&saved).await?;
        Ok(true)
    }

    /// Save `document` if absent, remove it if present; returns whether it is now saved
    pub async fn toggle(&self, document: Document) -> Result<bool> {
        if self.contains(&document.id).await {
            self.remove(&document.id).await?;
            Ok(false)
        } else {
            self.add(document).await
        }
    }

    pub async fn clear(&self) -> Result<()> {
        let mut saved = self.documents.write().await;
        saved.clear();
        self.persist(&saved).await
    }

    async fn persist(&self, documents: &[Document]) -> Result<()> {
        let raw =
            serde_json::to_string(documents).map_err(|e| AssistantError::Storage(e.to_string()))?;
        self.store.set(SAVED_RESULTS_KEY, raw).await
    }
}
