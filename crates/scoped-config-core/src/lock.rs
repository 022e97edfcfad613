use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;

/// How a successful `acquire` obtained the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquisition {
    /// No lock was held; this holder created it.
    Acquired,
    /// This holder already owned the lock.
    Reentered,
    /// An abandoned lock was evicted before this holder took it.
    RecoveredStale,
    /// Locking is switched off; nothing was acquired.
    Disabled,
}

impl LockAcquisition {
    /// Whether this acquisition took the lock, so the caller must release it.
    ///
    /// A reentrant acquisition leaves release to whoever took the lock first.
    pub fn needs_release(&self) -> bool {
        matches!(
            self,
            LockAcquisition::Acquired | LockAcquisition::RecoveredStale
        )
    }
}

/// Cross-process mutual exclusion around the backing document.
///
/// One lock guards one backing file. A holder is a single lock manager
/// instance; acquiring again from the same holder is reentrant, acquiring
/// from any other holder (in this process or another) waits.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Returns the lock implementation identifier (e.g., "sentinel").
    fn lock_type(&self) -> &'static str;

    /// Block until the lock is held by this holder or the configured
    /// timeout elapses.
    ///
    /// # Errors
    /// * `StoreError::LockTimeout` - the lock stayed busy past the timeout
    /// * `StoreError::Lock` - the lock could not be created for another reason
    async fn acquire(&self) -> Result<LockAcquisition, StoreError>;

    /// Release the lock if this holder owns it.
    ///
    /// Never fails: cleanup problems are logged, since the caller's critical
    /// section has already completed.
    async fn release(&self);

    /// Release without awaiting, for use where the async path cannot run
    /// (dropping a guard whose critical section was cancelled).
    ///
    /// Same contract as `release`: holder-only, idempotent, never fails.
    fn release_now(&self);

    /// Whether this holder currently owns the lock.
    fn is_held(&self) -> bool;
}

/// An acquisition that is released when dropped.
///
/// Call [`LockGuard::release`] on the normal path. If the owning future is
/// dropped mid critical section, `Drop` falls back to
/// [`LockManager::release_now`] so the lock never outlives its holder.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    lock: Arc<dyn LockManager>,
    acquisition: LockAcquisition,
    armed: bool,
}

impl LockGuard {
    /// Acquire `lock` and wrap the acquisition.
    pub async fn acquire(lock: Arc<dyn LockManager>) -> Result<Self, StoreError> {
        let acquisition = lock.acquire().await?;
        Ok(Self {
            lock,
            acquisition,
            armed: acquisition.needs_release(),
        })
    }

    pub fn acquisition(&self) -> LockAcquisition {
        self.acquisition
    }

    /// Release the lock if this guard took it.
    pub async fn release(mut self) {
        if self.armed {
            self.lock.release().await;
            // Only disarm once the release finished; a cancelled release is
            // completed by `Drop`.
            self.armed = false;
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("lock_type", &self.lock.lock_type())
            .field("acquisition", &self.acquisition)
            .field("armed", &self.armed)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.armed {
            self.lock.release_now();
        }
    }
}
