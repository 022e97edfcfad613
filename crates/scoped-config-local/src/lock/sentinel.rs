use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scoped_config_core::{LockAcquisition, LockManager, StoreError};
use tokio::fs;
use tracing::{debug, instrument, warn};

/// Tuning for the sentinel lock protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    /// When false, `acquire` and `release` do nothing (single-process deployments).
    pub use_lock: bool,
    /// Wait between checks while another holder owns the sentinel.
    pub retry_interval: Duration,
    /// Sentinels older than this are considered abandoned and evicted.
    pub max_age: Duration,
    /// Give up acquiring after this long.
    pub timeout: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            use_lock: true,
            retry_interval: Duration::from_millis(100),
            max_age: Duration::from_secs(30),
            timeout: Duration::from_millis(10_000),
        }
    }
}

impl LockOptions {
    /// Options with locking switched off.
    pub fn disabled() -> Self {
        Self {
            use_lock: false,
            ..Self::default()
        }
    }
}

/// Steps of a single `acquire` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcquireState {
    Checking,
    WaitingRetry,
    Held(LockAcquisition),
    TimedOut,
}

/// Advisory cross-process lock backed by a zero-byte sentinel file.
///
/// The sentinel's existence means "locked". It is created with
/// create-if-not-exists semantics, which is the only thing that stops two
/// processes from both believing they hold the lock. A sentinel older than
/// `max_age` is treated as left behind by a crashed holder and deleted.
///
/// Each instance is one holder with its own identity. Acquiring twice from the
/// same instance is reentrant, so tasks sharing an instance must be serialized
/// by the caller (`ScopedStore` does this with its store mutex).
#[derive(Debug)]
pub struct SentinelLock {
    path: PathBuf,
    options: LockOptions,
    holder_id: String,
    /// Private name a stale sentinel is moved to while `evict` re-checks it.
    claim_path: PathBuf,
    /// Current holder marker: `Some(holder_id)` while this instance owns the sentinel.
    holder: Mutex<Option<String>>,
}

impl SentinelLock {
    /// Create a new SentinelLock guarding the sentinel at `path`.
    pub fn new(path: impl AsRef<Path>, options: LockOptions) -> Self {
        let path = path.as_ref().to_path_buf();
        let holder_id = format!("{}-{}", std::process::id(), uuid::Uuid::new_v4());
        let mut claim_name = path.file_name().unwrap_or_default().to_os_string();
        claim_name.push(format!(".stale-{}", holder_id));

        Self {
            claim_path: path.with_file_name(claim_name),
            path,
            options,
            holder_id,
            holder: Mutex::new(None),
        }
    }

    /// Path of the sentinel file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identity recorded as the holder when this instance owns the lock.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    fn set_holder(&self, holder: Option<String>) {
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner) = holder;
    }

    /// Clear the holder marker, returning whether this instance held the lock.
    fn take_holder(&self) -> bool {
        let mut holder = self.holder.lock().unwrap_or_else(PoisonError::into_inner);
        if holder.as_deref() == Some(self.holder_id.as_str()) {
            *holder = None;
            true
        } else {
            false
        }
    }

    /// Ensure the directory holding the sentinel exists.
    async fn ensure_lock_dir(&self) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.map_err(|e| {
                StoreError::Io(format!("Failed to create lock dir {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    /// Age of the sentinel, or `None` if there is no sentinel.
    async fn sentinel_age(&self) -> Result<Option<Duration>, StoreError> {
        match fs::metadata(&self.path).await {
            Ok(metadata) => file_age(&metadata).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Lock(format!(
                "Failed to stat lock file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Evict an abandoned sentinel, returning whether one was removed.
    ///
    /// The sentinel is renamed to a name private to this holder and its age
    /// checked again: the file at `path` may have been replaced by a fresh
    /// one since our stat. A fresh sentinel is put back and the caller
    /// re-checks.
    fn evict(&self) -> Result<bool, StoreError> {
        match std::fs::rename(&self.path, &self.claim_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(StoreError::Lock(format!(
                    "Failed to evict stale lock {}: {}",
                    self.path.display(),
                    e
                )))
            }
        }

        let age = std::fs::metadata(&self.claim_path)
            .map_err(|e| StoreError::Lock(format!("Failed to stat evicted lock: {}", e)))
            .and_then(|metadata| file_age(&metadata));

        match age {
            Ok(age) if age > self.options.max_age => {
                if let Err(e) = std::fs::remove_file(&self.claim_path) {
                    warn!("Failed to delete evicted lock {}: {}", self.claim_path.display(), e);
                }
                debug!(
                    "Evicted stale lock {} (age {:?} > {:?})",
                    self.path.display(),
                    age,
                    self.options.max_age
                );
                Ok(true)
            }
            Ok(age) => {
                debug!("Lock {} was re-taken (age {:?}), restoring it", self.path.display(), age);
                self.restore_claimed();
                Ok(false)
            }
            Err(e) => {
                self.restore_claimed();
                Err(e)
            }
        }
    }

    /// Put a live sentinel taken by `evict` back in place.
    ///
    /// The hard link keeps the original timestamps and never replaces a
    /// sentinel created in the meantime.
    fn restore_claimed(&self) {
        let restored = std::fs::hard_link(&self.claim_path, &self.path).or_else(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                Err(e)
            } else {
                // Filesystems without hard links
                create_sentinel(&self.path).map(drop)
            }
        });

        match restored {
            Ok(()) => debug!("Restored lock {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("Lock {} re-created meanwhile, dropping claimed copy", self.path.display());
            }
            Err(e) => warn!("Failed to restore lock {}: {}", self.path.display(), e),
        }

        if let Err(e) = std::fs::remove_file(&self.claim_path) {
            warn!("Failed to delete claimed lock {}: {}", self.claim_path.display(), e);
        }
    }

    /// Try to create the sentinel exclusively, recording this instance as
    /// holder on success.
    ///
    /// Runs synchronously so a cancelled `acquire` cannot leave a sentinel
    /// behind that no holder knows about.
    fn try_create(&self, recovered: bool) -> Result<AcquireState, StoreError> {
        match create_sentinel(&self.path) {
            Ok(_) => {
                self.set_holder(Some(self.holder_id.clone()));
                Ok(AcquireState::Held(if recovered {
                    LockAcquisition::RecoveredStale
                } else {
                    LockAcquisition::Acquired
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Another holder created it between our check and our create.
                debug!("Lost race for lock {}, re-checking", self.path.display());
                Ok(AcquireState::Checking)
            }
            Err(e) => Err(StoreError::Lock(format!(
                "Failed to create lock file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn log_release(&self, removed: std::io::Result<()>) {
        match removed {
            Ok(()) => debug!("Released lock {} by {}", self.path.display(), self.holder_id),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Lock {} already gone on release", self.path.display());
            }
            Err(e) => warn!(
                "Failed to delete lock file {}: {} (remove it manually if it persists)",
                self.path.display(),
                e
            ),
        }
    }
}

fn create_sentinel(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
}

/// Time since the sentinel was created.
///
/// The sentinel is never written after creation, so its modification time
/// stands in for the creation time where the platform lacks birth times.
fn file_age(metadata: &std::fs::Metadata) -> Result<Duration, StoreError> {
    let created_at: DateTime<Utc> = metadata
        .created()
        .or_else(|_| metadata.modified())
        .map(DateTime::from)
        .map_err(|e| StoreError::Lock(format!("Failed to read lock file time: {}", e)))?;

    // A sentinel stamped in the future (clock skew) counts as brand new.
    Ok((Utc::now() - created_at).to_std().unwrap_or(Duration::ZERO))
}

#[async_trait]
impl LockManager for SentinelLock {
    fn lock_type(&self) -> &'static str {
        "sentinel"
    }

    #[instrument(skip(self), level = "debug", fields(path = %self.path.display()))]
    async fn acquire(&self) -> Result<LockAcquisition, StoreError> {
        if !self.options.use_lock {
            return Ok(LockAcquisition::Disabled);
        }

        if self.is_held() {
            debug!("Lock {} already held by {}", self.path.display(), self.holder_id);
            return Ok(LockAcquisition::Reentered);
        }

        self.ensure_lock_dir().await?;

        let started = Instant::now();
        let mut state = AcquireState::Checking;

        loop {
            state = match state {
                AcquireState::Checking => match self.sentinel_age().await? {
                    Some(age) if age > self.options.max_age => {
                        let recovered = self.evict()?;
                        self.try_create(recovered)?
                    }
                    Some(_) if started.elapsed() >= self.options.timeout => AcquireState::TimedOut,
                    Some(_) => AcquireState::WaitingRetry,
                    None => self.try_create(false)?,
                },
                AcquireState::WaitingRetry => {
                    tokio::task::yield_now().await;
                    tokio::time::sleep(self.options.retry_interval).await;
                    AcquireState::Checking
                }
                AcquireState::Held(acquisition) => {
                    debug!(
                        "Acquired lock {} for {} ({:?}, waited {:?})",
                        self.path.display(),
                        self.holder_id,
                        acquisition,
                        started.elapsed()
                    );
                    return Ok(acquisition);
                }
                AcquireState::TimedOut => {
                    return Err(StoreError::LockTimeout(format!(
                        "Lock {} still held after {} ms",
                        self.path.display(),
                        self.options.timeout.as_millis()
                    )));
                }
            };
        }
    }

    #[instrument(skip(self), level = "debug", fields(path = %self.path.display()))]
    async fn release(&self) {
        if !self.options.use_lock {
            return;
        }

        if !self.take_holder() {
            debug!("Lock {} not held by {}, nothing to release", self.path.display(), self.holder_id);
            return;
        }

        let removed = fs::remove_file(&self.path).await;
        self.log_release(removed);
    }

    fn release_now(&self) {
        if self.options.use_lock && self.take_holder() {
            self.log_release(std::fs::remove_file(&self.path));
        }
    }

    fn is_held(&self) -> bool {
        self.holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            == Some(self.holder_id.as_str())
    }
}
