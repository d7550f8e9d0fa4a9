//! Report error types.

use thiserror::Error;

use trapdata_store::StoreError;

pub type ReportResult<T> = Result<T, ReportError>;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Invalid confidence threshold: {0}")]
    InvalidThreshold(f64),

    #[error("Session not found: {0}")]
    SessionNotFound(i64),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
