use thiserror::Error;

/// Errors that can occur in the configuration store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl StoreError {
    /// Whether this error came from loading or saving the backing document.
    pub fn is_persistence(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Serialization(_))
    }
}
