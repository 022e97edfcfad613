//! Core traits and types for scoped plugin configuration stores.
//!
//! This crate defines the abstractions shared by store implementations:
//! - `BackingStore`: an in-memory JSON document with explicit persistence
//! - `LockManager`: cross-process mutual exclusion around read-modify-write
//! - `ScopedKey` / `ScopeContext`: the flat-key encoding of item, folder,
//!   library and global scopes, and the context used to resolve a read

mod error;
mod lock;
mod scope;
mod storage;

pub use error::StoreError;
pub use lock::{LockAcquisition, LockGuard, LockManager};
pub use scope::{
    LibraryIdResolver, PassthroughLibraryIds, ScopeContext, ScopeType, ScopedKey, ID_SEPARATOR,
    SCOPE_MARKER, TYPE_SEPARATOR,
};
pub use storage::{BackingStore, Document};
