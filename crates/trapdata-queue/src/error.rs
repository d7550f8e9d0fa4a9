//! Queue error types.

use thiserror::Error;

use trapdata_store::StoreError;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(usize),

    #[error("Invalid queue limit: {0}")]
    InvalidLimit(usize),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
