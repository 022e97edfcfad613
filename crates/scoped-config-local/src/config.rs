use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use scoped_config_core::{ScopeContext, ScopeType};

use crate::lock::LockOptions;

/// Document and sentinel locations of one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub document: PathBuf,
    pub lock: PathBuf,
}

impl StorePaths {
    /// Per-user store shared by every plugin: `{config_dir}/pluginConfig.json`.
    pub fn user(config_dir: impl AsRef<Path>) -> Self {
        let dir = config_dir.as_ref();
        Self {
            document: dir.join("pluginConfig.json"),
            lock: dir.join("pluginConfig.lock"),
        }
    }

    /// Store living next to a plugin installation: `{plugin_dir}/config.json`.
    pub fn plugin(plugin_dir: impl AsRef<Path>) -> Self {
        let dir = plugin_dir.as_ref();
        Self {
            document: dir.join("config.json"),
            lock: dir.join("perPluginConfig.lock"),
        }
    }
}

/// Host application's per-user configuration directory.
pub fn default_config_dir() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    if cfg!(any(target_os = "windows", target_os = "macos")) {
        base.join("Eagle")
    } else {
        base.join("eagle")
    }
}

/// Configuration for the scoped-config command-line tool.
#[derive(Parser, Debug, Clone)]
#[command(name = "scoped-config")]
#[command(about = "Read and write scoped plugin configuration shared between processes")]
pub struct Config {
    /// Which store to open: user or plugin
    #[arg(long, default_value = "user", env = "SCOPED_CONFIG_STORE")]
    pub store: StoreKind,

    /// Directory of the per-user store
    #[arg(long, env = "SCOPED_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Plugin installation directory (required with --store plugin)
    #[arg(long, env = "SCOPED_CONFIG_PLUGIN_DIR")]
    pub plugin_dir: Option<PathBuf>,

    /// Plugin identifier used to namespace scoped keys
    #[arg(long, default_value = "", env = "SCOPED_CONFIG_PLUGIN_ID")]
    pub plugin_id: String,

    /// Disable the cross-process lock (single-process use only)
    #[arg(long, env = "SCOPED_CONFIG_NO_LOCK")]
    pub no_lock: bool,

    /// Give up acquiring the lock after this many milliseconds
    #[arg(long, default_value = "10000", env = "SCOPED_CONFIG_LOCK_TIMEOUT_MS")]
    pub lock_timeout_ms: u64,

    /// Wait between lock checks, in milliseconds
    #[arg(long, default_value = "100", env = "SCOPED_CONFIG_LOCK_RETRY_MS")]
    pub lock_retry_ms: u64,

    /// Treat lock files older than this many seconds as abandoned
    #[arg(long, default_value = "30", env = "SCOPED_CONFIG_LOCK_MAX_AGE_SECS")]
    pub lock_max_age_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    /// Get the effective per-user configuration directory.
    pub fn effective_config_dir(&self) -> PathBuf {
        self.config_dir.clone().unwrap_or_else(default_config_dir)
    }

    /// Locations of the selected store.
    pub fn store_paths(&self) -> anyhow::Result<StorePaths> {
        match self.store {
            StoreKind::User => Ok(StorePaths::user(self.effective_config_dir())),
            StoreKind::Plugin => {
                let dir = self
                    .plugin_dir
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("--plugin-dir is required with --store plugin"))?;
                Ok(StorePaths::plugin(dir))
            }
        }
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            use_lock: !self.no_lock,
            retry_interval: Duration::from_millis(self.lock_retry_ms),
            max_age: Duration::from_secs(self.lock_max_age_secs),
            timeout: Duration::from_millis(self.lock_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreKind {
    User,
    Plugin,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::User => write!(f, "user"),
            StoreKind::Plugin => write!(f, "plugin"),
        }
    }
}

/// Scope flags shared by subcommands. At most one id is used for writes.
#[derive(Args, Debug, Clone, Default)]
pub struct ScopeArgs {
    /// Item id
    #[arg(long)]
    pub item: Option<String>,

    /// Folder id
    #[arg(long)]
    pub folder: Option<String>,

    /// Library path or id
    #[arg(long)]
    pub library: Option<String>,
}

impl ScopeArgs {
    /// All given ids, as a read context.
    pub fn context(&self) -> ScopeContext {
        ScopeContext {
            item_id: self.item.clone(),
            folder_id: self.folder.clone(),
            library_id: self.library.clone(),
        }
    }

    /// The single scope targeted by a write, or `None` for global.
    pub fn target(&self) -> anyhow::Result<Option<(ScopeType, &str)>> {
        let given: Vec<_> = self.context_pairs().collect();
        match given.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(*single)),
            _ => anyhow::bail!("Pass at most one of --item, --folder, --library when writing"),
        }
    }

    fn context_pairs(&self) -> impl Iterator<Item = (ScopeType, &str)> {
        [
            (ScopeType::Item, self.item.as_deref()),
            (ScopeType::Folder, self.folder.as_deref()),
            (ScopeType::Library, self.library.as_deref()),
        ]
        .into_iter()
        .filter_map(|(scope, id)| id.map(|id| (scope, id)))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Resolve a key: item, then folder, then library, then global
    Get {
        key: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Store a value (parsed as JSON, otherwise taken as a string)
    Set {
        key: String,
        value: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Store a global value unless one exists, then print the effective value
    SetDefault { key: String, value: String },
    /// Delete a value at one scope (global if no scope is given)
    Remove {
        key: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Print the raw document
    Dump,
    /// Print the encoded document key for a scoped key
    Key {
        scope: ScopeType,
        id: String,
        key: String,
    },
    /// List this plugin's values at one scope
    Entries { scope: ScopeType, id: String },
}
