use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Prefix marking a key as scoped. Global keys must never start with it.
pub const SCOPE_MARKER: &str = "$$";
/// Separates the scope type token from the scope id.
pub const TYPE_SEPARATOR: &str = "||";
/// Separates the scope id, plugin id and logical key.
pub const ID_SEPARATOR: &str = "//";

/// A non-global configuration scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Item,
    Folder,
    Library,
}

impl ScopeType {
    /// Token written into encoded keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Item => "item",
            ScopeType::Folder => "folder",
            ScopeType::Library => "library",
        }
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "item" => Ok(ScopeType::Item),
            "folder" => Ok(ScopeType::Folder),
            "library" => Ok(ScopeType::Library),
            other => Err(StoreError::InvalidArgument(format!(
                "Unknown scope type: {}",
                other
            ))),
        }
    }
}

/// The components of a scoped key.
///
/// Encoded as `$${scope}||{id}//{plugin_id}//{key}`. This format is the
/// on-disk contract shared with every other reader of the document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedKey {
    pub scope: ScopeType,
    pub id: String,
    pub plugin_id: String,
    pub key: String,
}

impl ScopedKey {
    pub fn new(
        scope: ScopeType,
        id: impl Into<String>,
        plugin_id: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            scope,
            id: id.into(),
            plugin_id: plugin_id.into(),
            key: key.into(),
        }
    }

    /// Encode into the flat document key.
    pub fn encode(&self) -> String {
        [
            SCOPE_MARKER,
            self.scope.as_str(),
            TYPE_SEPARATOR,
            self.id.as_str(),
            ID_SEPARATOR,
            self.plugin_id.as_str(),
            ID_SEPARATOR,
            self.key.as_str(),
        ]
        .concat()
    }

    /// Decode a document key.
    ///
    /// Returns `None` for global keys and for anything not produced by
    /// `encode`. Ids and plugin ids containing `//` do not survive a round trip;
    /// the logical key may contain anything.
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(SCOPE_MARKER)?;
        let (scope, rest) = rest.split_once(TYPE_SEPARATOR)?;
        let scope = scope.parse().ok()?;
        let (id, rest) = rest.split_once(ID_SEPARATOR)?;
        let (plugin_id, key) = rest.split_once(ID_SEPARATOR)?;
        Some(Self::new(scope, id, plugin_id, key))
    }

    /// Whether `raw` carries the scope marker.
    pub fn is_scoped(raw: &str) -> bool {
        raw.starts_with(SCOPE_MARKER)
    }
}

impl fmt::Display for ScopedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Identifiers narrowing a read. Each present field adds one candidate scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeContext {
    pub item_id: Option<String>,
    pub folder_id: Option<String>,
    pub library_id: Option<String>,
}

impl ScopeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn with_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    pub fn with_library(mut self, library_id: impl Into<String>) -> Self {
        self.library_id = Some(library_id.into());
        self
    }

    /// Scopes to search, highest priority first. Global is implied after these.
    ///
    /// Empty ids count as absent.
    pub fn candidates(&self) -> impl Iterator<Item = (ScopeType, &str)> {
        [
            (ScopeType::Item, self.item_id.as_deref()),
            (ScopeType::Folder, self.folder_id.as_deref()),
            (ScopeType::Library, self.library_id.as_deref()),
        ]
        .into_iter()
        .filter_map(|(scope, id)| id.filter(|id| !id.is_empty()).map(|id| (scope, id)))
    }
}

/// Maps a library path (or any caller-facing library handle) to the short
/// stable id written into library-scoped keys.
pub trait LibraryIdResolver: Send + Sync {
    fn resolve_library_id(&self, library: &str) -> String;

    /// Reverse lookup of a previously resolved id, if the resolver keeps one.
    fn library_path(&self, _id: &str) -> Option<String> {
        None
    }
}

impl<F> LibraryIdResolver for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn resolve_library_id(&self, library: &str) -> String {
        self(library)
    }
}

/// Uses the library handle as its own id.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughLibraryIds;

impl LibraryIdResolver for PassthroughLibraryIds {
    fn resolve_library_id(&self, library: &str) -> String {
        library.to_string()
    }

    fn library_path(&self, id: &str) -> Option<String> {
        Some(id.to_string())
    }
}
