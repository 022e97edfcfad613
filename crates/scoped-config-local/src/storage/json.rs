use std::path::{Path, PathBuf};

use async_trait::async_trait;
use scoped_config_core::{BackingStore, Document, StoreError};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, instrument};

/// JSON file backing store.
///
/// The whole document lives in one file holding a single flat JSON object:
/// ```text
/// {
///   "theme": "dark",
///   "$$item||abc123//plugin.sample//myKey": true
/// }
/// ```
/// The file is read on first access and created empty if missing. After that
/// the in-memory copy is authoritative until `reload`; external changes are
/// not picked up on their own.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    data: Option<Document>,
}

impl JsonFileStore {
    /// Create a new JsonFileStore for the document at `path`. Nothing is read yet.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            data: None,
        }
    }

    /// Read the document from disk, creating an empty one if the file is missing.
    async fn load_document(&self) -> Result<Document, StoreError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => {
                let document = parse_document(&content).map_err(|e| {
                    StoreError::Serialization(format!(
                        "Failed to parse {}: {}",
                        self.path.display(),
                        e
                    ))
                })?;
                debug!("Loaded {} keys from {}", document.len(), self.path.display());
                Ok(document)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let document = Document::new();
                write_document(&self.path, &document).await?;
                debug!("Created empty document at {}", self.path.display());
                Ok(document)
            }
            Err(e) => Err(StoreError::Io(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

/// Parse file content into a document. Blank content is an empty document.
fn parse_document(content: &str) -> Result<Document, String> {
    if content.trim().is_empty() {
        return Ok(Document::new());
    }
    match serde_json::from_str::<Value>(content).map_err(|e| e.to_string())? {
        Value::Object(map) => Ok(map),
        other => Err(format!("expected a JSON object, found {}", json_kind(&other))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Write the document atomically via a temp file, replacing any previous content.
async fn write_document(path: &Path, document: &Document) -> Result<(), StoreError> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir).await.map_err(|e| {
            StoreError::Io(format!("Failed to create dir {}: {}", dir.display(), e))
        })?;
    }

    let json = serde_json::to_string_pretty(document).map_err(|e| {
        StoreError::Serialization(format!("Failed to serialize document: {}", e))
    })?;

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, &json).await.map_err(|e| {
        StoreError::Io(format!("Failed to write {}: {}", temp_path.display(), e))
    })?;
    fs::rename(&temp_path, path).await.map_err(|e| {
        StoreError::Io(format!("Failed to rename to {}: {}", path.display(), e))
    })?;

    Ok(())
}

#[async_trait]
impl BackingStore for JsonFileStore {
    fn backend_name(&self) -> &'static str {
        "json"
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    async fn get_all(&mut self) -> Result<&mut Document, StoreError> {
        if self.data.is_none() {
            let document = self.load_document().await?;
            self.data = Some(document);
        }
        Ok(self.data.get_or_insert_with(Document::new))
    }

    #[instrument(skip(self), level = "debug", fields(path = %self.path.display()))]
    async fn save(&mut self) -> Result<(), StoreError> {
        let Some(document) = self.data.as_ref() else {
            // Never loaded, so nothing in memory differs from disk
            return Ok(());
        };
        write_document(&self.path, document).await?;
        debug!("Saved {} keys", document.len());
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(path = %self.path.display()))]
    async fn reload(&mut self) -> Result<(), StoreError> {
        let document = self.load_document().await?;
        self.data = Some(document);
        Ok(())
    }
}
