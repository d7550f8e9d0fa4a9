//! Store error types.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A commit referenced a record that is not in the expected state.
    /// The whole batch is rolled back.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Another holder owns the store-wide run lock.
    #[error("Store is locked by {holder} ({purpose})")]
    Locked { holder: String, purpose: String },

    /// The caller no longer owns the run lock it expected to hold.
    #[error("Run lock lost: {0}")]
    LockLost(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}
