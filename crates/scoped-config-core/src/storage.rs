use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;

/// The backing document: one flat JSON object of configuration values.
pub type Document = serde_json::Map<String, Value>;

/// Backing store abstraction: a JSON document held in memory with explicit
/// persistence.
///
/// Implementations load lazily on first access and keep the in-memory copy
/// authoritative until `reload` or the next process start. They do no locking
/// of their own; callers must serialize access (see `LockManager`).
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Returns the backend identifier (e.g., "json").
    fn backend_name(&self) -> &'static str;

    /// Location of the persisted document.
    fn path(&self) -> &Path;

    /// Whether the document has been loaded into memory.
    fn is_loaded(&self) -> bool;

    /// The full in-memory document, loading it first if needed.
    ///
    /// Mutations through the returned reference are written by the next `save`.
    async fn get_all(&mut self) -> Result<&mut Document, StoreError>;

    /// Write the whole in-memory document, replacing the file's previous content.
    async fn save(&mut self) -> Result<(), StoreError>;

    /// Drop the in-memory copy and re-read the document from disk.
    async fn reload(&mut self) -> Result<(), StoreError>;

    // =========================================================================
    // Convenience accessors (in-memory only, never persisted on their own)
    // =========================================================================

    async fn get(&mut self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.get_all().await?.get(key).cloned())
    }

    async fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        self.get_all().await?.insert(key.to_string(), value);
        Ok(())
    }

    /// Insert `default` only if `key` is absent. Returns the effective value.
    async fn set_default(&mut self, key: &str, default: Value) -> Result<Value, StoreError> {
        let value = self
            .get_all()
            .await?
            .entry(key.to_string())
            .or_insert(default)
            .clone();
        Ok(value)
    }

    async fn remove(&mut self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.get_all().await?.remove(key))
    }
}
