use std::sync::Arc;

use scoped_config_core::{
    BackingStore, Document, LibraryIdResolver, LockGuard, LockManager, PassthroughLibraryIds,
    ScopeContext, ScopeType, ScopedKey, StoreError, SCOPE_MARKER,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::config::StorePaths;
use crate::lock::{LockOptions, SentinelLock};
use crate::storage::JsonFileStore;

/// When the in-memory document is refreshed from disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReloadPolicy {
    /// Load once, never refresh. Another process's writes to keys this
    /// process has not seen are overwritten by the next save.
    Never,
    /// Re-read the document inside the critical section before every write.
    #[default]
    BeforeWrite,
}

/// Scope-aware configuration store for one plugin.
///
/// Every read and write takes the cross-process lock around the backing
/// store operation and releases it afterwards, including on failure. The
/// backing store sits behind a mutex, so critical sections within this
/// process run one at a time before the lock file is even touched.
///
/// Keep one instance per backing file per process: each instance owns its
/// own in-memory copy of the document.
pub struct ScopedStore<S: BackingStore> {
    store: Mutex<S>,
    lock: Arc<dyn LockManager>,
    plugin_id: String,
    libraries: Arc<dyn LibraryIdResolver>,
    reload: ReloadPolicy,
}

impl<S: BackingStore> std::fmt::Debug for ScopedStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedStore")
            .field("plugin_id", &self.plugin_id)
            .field("lock_type", &self.lock.lock_type())
            .field("reload", &self.reload)
            .finish_non_exhaustive()
    }
}

impl ScopedStore<JsonFileStore> {
    /// Open the JSON document and sentinel lock described by `paths`.
    pub fn open(paths: &StorePaths, options: LockOptions, plugin_id: impl Into<String>) -> Self {
        let store = JsonFileStore::new(&paths.document);
        let lock = Arc::new(SentinelLock::new(&paths.lock, options));
        Self::new(store, lock, plugin_id)
    }
}

impl<S: BackingStore> ScopedStore<S> {
    /// Create a new ScopedStore over `store`, guarded by `lock`.
    pub fn new(store: S, lock: Arc<dyn LockManager>, plugin_id: impl Into<String>) -> Self {
        Self {
            store: Mutex::new(store),
            lock,
            plugin_id: plugin_id.into(),
            libraries: Arc::new(PassthroughLibraryIds),
            reload: ReloadPolicy::default(),
        }
    }

    /// Use `resolver` to turn library handles into the ids written into keys.
    pub fn with_library_resolver(mut self, resolver: Arc<dyn LibraryIdResolver>) -> Self {
        self.libraries = resolver;
        self
    }

    pub fn with_reload_policy(mut self, reload: ReloadPolicy) -> Self {
        self.reload = reload;
        self
    }

    /// Identifier isolating this plugin's scoped keys from other plugins.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Library handle behind an id found in a library-scoped key, if the
    /// resolver remembers it.
    pub fn library_path(&self, library_id: &str) -> Option<String> {
        self.libraries.library_path(library_id)
    }

    // =========================================================================
    // Locked raw access
    // =========================================================================

    /// Run `f` on the document inside a critical section.
    ///
    /// The lock is held by a guard, so dropping the returned future part way
    /// through still releases it.
    async fn read<T>(&self, f: impl FnOnce(&Document) -> T) -> Result<T, StoreError> {
        let mut store = self.store.lock().await;
        let guard = LockGuard::acquire(Arc::clone(&self.lock)).await?;

        let result = store.get_all().await.map(|document| f(&*document));

        guard.release().await;
        result
    }

    /// Mutate the document with `f` and save it, all inside one critical section.
    async fn write<T>(&self, f: impl FnOnce(&mut Document) -> T) -> Result<T, StoreError> {
        let mut store = self.store.lock().await;
        let guard = LockGuard::acquire(Arc::clone(&self.lock)).await?;

        let result = Self::modify_and_save(&mut *store, self.reload, f).await;

        guard.release().await;
        result
    }

    async fn modify_and_save<T>(
        store: &mut S,
        reload: ReloadPolicy,
        f: impl FnOnce(&mut Document) -> T,
    ) -> Result<T, StoreError> {
        // An unloaded store reads fresh from disk anyway
        if reload == ReloadPolicy::BeforeWrite && store.is_loaded() {
            store.reload().await?;
        }
        let output = f(store.get_all().await?);
        store.save().await?;
        Ok(output)
    }

    /// Snapshot of the whole document.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_raw(&self) -> Result<Document, StoreError> {
        self.read(|document| document.clone()).await
    }

    /// Store `value` under the exact document key `key` and persist.
    #[instrument(skip(self, value), level = "debug")]
    pub async fn set_raw(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let key = key.to_string();
        self.write(move |document| {
            document.insert(key, value);
        })
        .await
    }

    /// Delete the exact document key `key` and persist. Returns the old value.
    #[instrument(skip(self), level = "debug")]
    pub async fn remove_raw(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.write(|document| document.remove(key)).await
    }

    // =========================================================================
    // Key encoding and resolution
    // =========================================================================

    /// Encode the document key for `key` at `scope`/`id` for this plugin.
    ///
    /// Library handles go through the library id resolver first.
    pub fn build_key(&self, scope: ScopeType, id: &str, key: &str) -> String {
        let id = match scope {
            ScopeType::Library => self.libraries.resolve_library_id(id),
            ScopeType::Item | ScopeType::Folder => id.to_string(),
        };
        ScopedKey::new(scope, id, self.plugin_id.as_str(), key).encode()
    }

    /// Look up `key` in the most specific scope `context` names that has it:
    /// item, then folder, then library, then global.
    ///
    /// A stored `false`, `0`, `""` or `null` counts as present and wins over
    /// lower scopes. `None` means no scope has the key.
    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, key: &str, context: &ScopeContext) -> Result<Option<Value>, StoreError> {
        validate_key(key)?;
        let candidates: Vec<String> = context
            .candidates()
            .map(|(scope, id)| self.build_key(scope, id, key))
            .chain(std::iter::once(key.to_string()))
            .collect();

        self.read(|document| {
            candidates.iter().find_map(|candidate| {
                document.get(candidate).map(|value| {
                    debug!("Resolved {} from {}", key, candidate);
                    value.clone()
                })
            })
        })
        .await
    }

    /// `get`, deserialized into `T`.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        key: &str,
        context: &ScopeContext,
    ) -> Result<Option<T>, StoreError> {
        self.get(key, context)
            .await?
            .map(|value| {
                serde_json::from_value(value).map_err(|e| {
                    StoreError::Serialization(format!("Failed to decode {}: {}", key, e))
                })
            })
            .transpose()
    }

    async fn get_exact(&self, document_key: String) -> Result<Option<Value>, StoreError> {
        self.read(|document| document.get(&document_key).cloned()).await
    }

    async fn get_scoped(
        &self,
        scope: ScopeType,
        id: &str,
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        validate_key(key)?;
        self.get_exact(self.build_key(scope, id, key)).await
    }

    async fn set_scoped(
        &self,
        scope: ScopeType,
        id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        validate_key(key)?;
        self.set_raw(&self.build_key(scope, id, key), value).await
    }

    async fn remove_scoped(
        &self,
        scope: ScopeType,
        id: &str,
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        validate_key(key)?;
        self.remove_raw(&self.build_key(scope, id, key)).await
    }

    // =========================================================================
    // Single-scope reads (no fallback)
    // =========================================================================

    pub async fn get_for_item(&self, item_id: &str, key: &str) -> Result<Option<Value>, StoreError> {
        self.get_scoped(ScopeType::Item, item_id, key).await
    }

    pub async fn get_for_folder(
        &self,
        folder_id: &str,
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        self.get_scoped(ScopeType::Folder, folder_id, key).await
    }

    pub async fn get_for_library(
        &self,
        library: &str,
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        self.get_scoped(ScopeType::Library, library, key).await
    }

    pub async fn get_global(&self, key: &str) -> Result<Option<Value>, StoreError> {
        validate_key(key)?;
        self.get_exact(key.to_string()).await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub async fn set_item(
        &self,
        item_id: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), StoreError> {
        self.set_scoped(ScopeType::Item, item_id, key, value.into()).await
    }

    pub async fn set_folder(
        &self,
        folder_id: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), StoreError> {
        self.set_scoped(ScopeType::Folder, folder_id, key, value.into()).await
    }

    pub async fn set_library(
        &self,
        library: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), StoreError> {
        self.set_scoped(ScopeType::Library, library, key, value.into()).await
    }

    /// Store an unscoped value, visible to every plugin sharing the document.
    pub async fn set_global(&self, key: &str, value: impl Into<Value>) -> Result<(), StoreError> {
        validate_key(key)?;
        self.set_raw(key, value.into()).await
    }

    /// Same as `set_global`.
    pub async fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), StoreError> {
        self.set_global(key, value).await
    }

    /// Store a global value only if none exists. Returns the effective value.
    #[instrument(skip(self, default), level = "debug")]
    pub async fn set_default(
        &self,
        key: &str,
        default: impl Into<Value>,
    ) -> Result<Value, StoreError> {
        validate_key(key)?;
        let default = default.into();
        self.write(|document| {
            document
                .entry(key.to_string())
                .or_insert(default)
                .clone()
        })
        .await
    }

    pub async fn remove_item(&self, item_id: &str, key: &str) -> Result<Option<Value>, StoreError> {
        self.remove_scoped(ScopeType::Item, item_id, key).await
    }

    pub async fn remove_folder(
        &self,
        folder_id: &str,
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        self.remove_scoped(ScopeType::Folder, folder_id, key).await
    }

    pub async fn remove_library(
        &self,
        library: &str,
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        self.remove_scoped(ScopeType::Library, library, key).await
    }

    pub async fn remove_global(&self, key: &str) -> Result<Option<Value>, StoreError> {
        validate_key(key)?;
        self.remove_raw(key).await
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// Every `(logical key, value)` this plugin stored at `scope`/`id`, sorted by key.
    #[instrument(skip(self), level = "debug")]
    pub async fn entries_for(
        &self,
        scope: ScopeType,
        id: &str,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let id = match scope {
            ScopeType::Library => self.libraries.resolve_library_id(id),
            ScopeType::Item | ScopeType::Folder => id.to_string(),
        };

        let mut entries = self
            .read(|document| {
                document
                    .iter()
                    .filter_map(|(raw, value)| {
                        let parsed = ScopedKey::parse(raw)?;
                        (parsed.scope == scope && parsed.id == id && parsed.plugin_id == self.plugin_id)
                            .then(|| (parsed.key, value.clone()))
                    })
                    .collect::<Vec<_>>()
            })
            .await?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

/// Logical keys must not look like scoped keys.
fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.starts_with(SCOPE_MARKER) {
        return Err(StoreError::InvalidArgument(format!(
            "Key {:?} must not start with the scope marker {:?}",
            key, SCOPE_MARKER
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoped_config_core::LockAcquisition;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    const PLUGIN: &str = "plugin.sample";

    fn paths(temp_dir: &TempDir) -> StorePaths {
        StorePaths {
            document: temp_dir.path().join("config.json"),
            lock: temp_dir.path().join("perPluginConfig.lock"),
        }
    }

    fn setup() -> (ScopedStore<JsonFileStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = ScopedStore::open(&paths(&temp_dir), LockOptions::default(), PLUGIN);
        (store, temp_dir)
    }

    fn full_context() -> ScopeContext {
        ScopeContext::new()
            .with_item("item-1")
            .with_folder("folder-1")
            .with_library("lib-1")
    }

    #[tokio::test]
    async fn test_build_key() {
        let (store, _temp) = setup();
        assert_eq!(
            store.build_key(ScopeType::Item, "abc123", "myKey"),
            "$$item||abc123//plugin.sample//myKey"
        );
        assert_eq!(
            store.build_key(ScopeType::Library, "lib", "k"),
            "$$library||lib//plugin.sample//k"
        );
    }

    #[tokio::test]
    async fn test_library_ids_are_resolved() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = |path: &str| format!("id-{}", path.len());
        let store = ScopedStore::open(&paths(&temp_dir), LockOptions::default(), PLUGIN)
            .with_library_resolver(Arc::new(resolver));

        assert_eq!(
            store.build_key(ScopeType::Library, "/photos/Main.library", "k"),
            "$$library||id-20//plugin.sample//k"
        );
        // Item and folder ids are used as given
        assert_eq!(
            store.build_key(ScopeType::Folder, "/photos", "k"),
            "$$folder||/photos//plugin.sample//k"
        );

        store.set_library("/photos/Main.library", "k", 1).await.unwrap();
        let ctx = ScopeContext::new().with_library("/photos/Main.library");
        assert_eq!(store.get("k", &ctx).await.unwrap(), Some(json!(1)));
        assert_eq!(
            store.get_for_library("/photos/Main.library", "k").await.unwrap(),
            Some(json!(1))
        );
    }

    #[tokio::test]
    async fn test_global_roundtrip() {
        let (store, _temp) = setup();

        store.set_global("theme", "dark").await.unwrap();
        assert_eq!(
            store.get("theme", &ScopeContext::new()).await.unwrap(),
            Some(json!("dark"))
        );

        store.set("theme", json!({"name": "light"})).await.unwrap();
        assert_eq!(
            store.get("theme", &ScopeContext::new()).await.unwrap(),
            Some(json!({"name": "light"}))
        );
        assert_eq!(store.get_global("theme").await.unwrap(), Some(json!({"name": "light"})));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let (store, _temp) = setup();
        assert_eq!(store.get("nothing", &full_context()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_priority_and_fall_through() {
        let (store, _temp) = setup();
        let ctx = full_context();

        store.set_global("size", "global").await.unwrap();
        store.set_library("lib-1", "size", "library").await.unwrap();
        store.set_folder("folder-1", "size", "folder").await.unwrap();
        store.set_item("item-1", "size", "item").await.unwrap();

        assert_eq!(store.get("size", &ctx).await.unwrap(), Some(json!("item")));

        store.remove_item("item-1", "size").await.unwrap();
        assert_eq!(store.get("size", &ctx).await.unwrap(), Some(json!("folder")));

        store.remove_folder("folder-1", "size").await.unwrap();
        assert_eq!(store.get("size", &ctx).await.unwrap(), Some(json!("library")));

        store.remove_library("lib-1", "size").await.unwrap();
        assert_eq!(store.get("size", &ctx).await.unwrap(), Some(json!("global")));

        store.remove_global("size").await.unwrap();
        assert_eq!(store.get("size", &ctx).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_context_limits_candidates() {
        let (store, _temp) = setup();

        store.set_global("size", "global").await.unwrap();
        store.set_item("item-1", "size", "item").await.unwrap();

        // Other item, no item at all: global wins
        let other = ScopeContext::new().with_item("item-2");
        assert_eq!(store.get("size", &other).await.unwrap(), Some(json!("global")));
        let folder_only = ScopeContext::new().with_folder("folder-1");
        assert_eq!(store.get("size", &folder_only).await.unwrap(), Some(json!("global")));
    }

    #[tokio::test]
    async fn test_falsy_values_win() {
        let (store, _temp) = setup();
        let ctx = full_context();

        for falsy in [json!(false), json!(0), json!(""), Value::Null] {
            store.set_global("flag", true).await.unwrap();
            store.set_item("item-1", "flag", falsy.clone()).await.unwrap();
            assert_eq!(store.get("flag", &ctx).await.unwrap(), Some(falsy));
        }
    }

    #[tokio::test]
    async fn test_single_scope_reads_do_not_fall_back() {
        let (store, _temp) = setup();

        store.set_global("mode", "global").await.unwrap();
        store.set_folder("folder-1", "mode", "folder").await.unwrap();

        assert_eq!(store.get_for_item("item-1", "mode").await.unwrap(), None);
        assert_eq!(
            store.get_for_folder("folder-1", "mode").await.unwrap(),
            Some(json!("folder"))
        );
        assert_eq!(store.get_for_library("lib-1", "mode").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_plugins_are_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let first = ScopedStore::open(&paths(&temp_dir), LockOptions::default(), "plugin.a");
        let second = ScopedStore::open(&paths(&temp_dir), LockOptions::default(), "plugin.b");

        first.set_item("item-1", "k", "from-a").await.unwrap();
        first.set_global("shared", 1).await.unwrap();

        let ctx = ScopeContext::new().with_item("item-1");
        assert_eq!(second.get("k", &ctx).await.unwrap(), None);
        // Global keys are shared between plugins
        assert_eq!(second.get("shared", &ctx).await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_rejects_marker_keys() {
        let (store, _temp) = setup();

        let err = store.set_global("$$item||x//p//k", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        let err = store.get("$$sneaky", &ScopeContext::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert!(store.get_raw().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_raw_persists_and_releases_lock() {
        let temp_dir = TempDir::new().unwrap();
        let paths = paths(&temp_dir);
        let store = ScopedStore::open(&paths, LockOptions::default(), PLUGIN);

        store.set_raw("raw", json!([1, 2])).await.unwrap();
        assert!(!paths.lock.exists());

        let on_disk: Value =
            serde_json::from_str(&std::fs::read_to_string(&paths.document).unwrap()).unwrap();
        assert_eq!(on_disk, json!({ "raw": [1, 2] }));

        let raw = store.get_raw().await.unwrap();
        assert_eq!(raw.get("raw"), Some(&json!([1, 2])));
        assert!(!paths.lock.exists());
    }

    #[tokio::test]
    async fn test_set_default() {
        let (store, _temp) = setup();

        assert_eq!(store.set_default("limit", 5).await.unwrap(), json!(5));
        assert_eq!(store.set_default("limit", 9).await.unwrap(), json!(5));
        assert_eq!(store.get_global("limit").await.unwrap(), Some(json!(5)));
    }

    #[tokio::test]
    async fn test_get_as() {
        let (store, _temp) = setup();

        store.set_item("item-1", "count", 7).await.unwrap();
        let ctx = ScopeContext::new().with_item("item-1");
        assert_eq!(store.get_as::<u32>("count", &ctx).await.unwrap(), Some(7));
        assert_eq!(store.get_as::<u32>("other", &ctx).await.unwrap(), None);

        let err = store.get_as::<String>("count", &ctx).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_entries_for() {
        let temp_dir = TempDir::new().unwrap();
        let store = ScopedStore::open(&paths(&temp_dir), LockOptions::default(), PLUGIN);
        let other = ScopedStore::open(&paths(&temp_dir), LockOptions::default(), "plugin.other");

        store.set_item("item-1", "b", 2).await.unwrap();
        store.set_item("item-1", "a", 1).await.unwrap();
        store.set_item("item-2", "c", 3).await.unwrap();
        store.set_folder("item-1", "d", 4).await.unwrap();
        other.set_item("item-1", "e", 5).await.unwrap();
        store.set_global("f", 6).await.unwrap();

        let entries = store.entries_for(ScopeType::Item, "item-1").await.unwrap();
        assert_eq!(
            entries,
            vec![("a".to_string(), json!(1)), ("b".to_string(), json!(2))]
        );
    }

    #[tokio::test]
    async fn test_timeout_leaves_document_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let paths = paths(&temp_dir);
        let options = LockOptions {
            timeout: Duration::from_millis(150),
            retry_interval: Duration::from_millis(20),
            ..LockOptions::default()
        };
        let store = ScopedStore::open(&paths, options, PLUGIN);
        store.set_global("before", 1).await.unwrap();

        // A competitor holds the lock
        std::fs::File::create(&paths.lock).unwrap();

        let err = store.set_global("after", 2).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));

        std::fs::remove_file(&paths.lock).unwrap();
        let raw = store.get_raw().await.unwrap();
        assert_eq!(raw.get("before"), Some(&json!(1)));
        assert!(!raw.contains_key("after"));
    }

    #[tokio::test]
    async fn test_persistence_error_releases_lock() {
        let temp_dir = TempDir::new().unwrap();
        let paths = paths(&temp_dir);
        std::fs::write(&paths.document, "not json").unwrap();
        let store = ScopedStore::open(&paths, LockOptions::default(), PLUGIN);

        let err = store.get("k", &ScopeContext::new()).await.unwrap_err();
        assert!(err.is_persistence());
        assert!(!paths.lock.exists());
    }

    #[tokio::test]
    async fn test_without_locking() {
        let temp_dir = TempDir::new().unwrap();
        let paths = paths(&temp_dir);
        let store = ScopedStore::open(&paths, LockOptions::disabled(), PLUGIN);

        // A leftover sentinel is ignored when locking is off
        std::fs::File::create(&paths.lock).unwrap();
        store.set_item("item-1", "k", true).await.unwrap();
        assert_eq!(store.get_for_item("item-1", "k").await.unwrap(), Some(json!(true)));
    }

    /// Backing store whose saves never finish.
    struct StalledSave(JsonFileStore);

    #[async_trait::async_trait]
    impl BackingStore for StalledSave {
        fn backend_name(&self) -> &'static str {
            "stalled"
        }

        fn path(&self) -> &std::path::Path {
            self.0.path()
        }

        fn is_loaded(&self) -> bool {
            self.0.is_loaded()
        }

        async fn get_all(&mut self) -> Result<&mut Document, StoreError> {
            self.0.get_all().await
        }

        async fn save(&mut self) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn reload(&mut self) -> Result<(), StoreError> {
            self.0.reload().await
        }
    }

    #[tokio::test]
    async fn test_cancelled_write_releases_lock() {
        let temp_dir = TempDir::new().unwrap();
        let paths = paths(&temp_dir);
        let lock = Arc::new(SentinelLock::new(&paths.lock, LockOptions::default()));
        let store = ScopedStore::new(
            StalledSave(JsonFileStore::new(&paths.document)),
            lock.clone(),
            PLUGIN,
        );

        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), store.set_global("k", 1)).await;
        assert!(cancelled.is_err());

        assert!(!lock.is_held());
        assert!(!paths.lock.exists());

        let other = SentinelLock::new(
            &paths.lock,
            LockOptions {
                timeout: Duration::from_millis(100),
                ..LockOptions::default()
            },
        );
        assert_eq!(other.acquire().await.unwrap(), LockAcquisition::Acquired);
        other.release().await;
    }

    #[tokio::test]
    async fn test_library_path_lookup() {
        struct NumberedLibraries;

        impl LibraryIdResolver for NumberedLibraries {
            fn resolve_library_id(&self, library: &str) -> String {
                if library == "/photos/Main.library" { "1" } else { "0" }.to_string()
            }

            fn library_path(&self, id: &str) -> Option<String> {
                (id == "1").then(|| "/photos/Main.library".to_string())
            }
        }

        let (store, _temp) = setup();
        assert_eq!(store.library_path("lib-1").as_deref(), Some("lib-1"));

        let temp_dir = TempDir::new().unwrap();
        let store = ScopedStore::open(&paths(&temp_dir), LockOptions::default(), PLUGIN)
            .with_library_resolver(Arc::new(NumberedLibraries));
        store.set_library("/photos/Main.library", "k", 1).await.unwrap();

        let entries = store.entries_for(ScopeType::Library, "/photos/Main.library").await.unwrap();
        assert_eq!(entries.len(), 1);
        let raw = store.build_key(ScopeType::Library, "/photos/Main.library", "k");
        let parsed = ScopedKey::parse(&raw).unwrap();
        assert_eq!(parsed.id, "1");
        assert_eq!(store.library_path(&parsed.id).as_deref(), Some("/photos/Main.library"));
        assert_eq!(store.library_path("2"), None);
    }
}
