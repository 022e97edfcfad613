//! File-backed scoped plugin configuration.
//!
//! A [`ScopedStore`] keeps one JSON document on disk, guarded by a
//! [`SentinelLock`] so that several processes can read and write it safely.

pub mod config;
pub mod lock;
pub mod scoped;
pub mod storage;

pub use config::{default_config_dir, StorePaths};
pub use lock::{LockOptions, SentinelLock};
pub use scoped::{ReloadPolicy, ScopedStore};
pub use storage::JsonFileStore;
