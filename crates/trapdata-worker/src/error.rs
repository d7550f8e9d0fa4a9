//! Worker error types.

use std::time::Duration;

use thiserror::Error;

use trapdata_ml::MlError;
use trapdata_models::Stage;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("A pipeline run is already active")]
    AlreadyRunning,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to prepare {stage} adapter: {source}")]
    AdapterInit {
        stage: Stage,
        #[source]
        source: MlError,
    },

    #[error("{stage} inference failed: {source}")]
    Inference {
        stage: Stage,
        #[source]
        source: MlError,
    },

    #[error("{stage} batch exceeded {timeout:?}")]
    BatchTimeout { stage: Stage, timeout: Duration },

    #[error("Run task failed: {0}")]
    TaskFailed(String),

    #[error("Store error: {0}")]
    Store(#[from] trapdata_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] trapdata_queue::QueueError),

    #[error("Model error: {0}")]
    Ml(#[from] MlError),

    #[error("Report error: {0}")]
    Report(#[from] trapdata_report::ReportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn task_failed(msg: impl Into<String>) -> Self {
        Self::TaskFailed(msg.into())
    }

    /// Rejected because another run holds the store.
    pub fn is_conflict(&self) -> bool {
        matches!(self, WorkerError::AlreadyRunning)
    }

    /// Whether restarting the run may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::AlreadyRunning | WorkerError::BatchTimeout { .. } => true,
            WorkerError::AdapterInit { source, .. } | WorkerError::Inference { source, .. } => {
                source.is_retryable()
            }
            WorkerError::Ml(e) => e.is_retryable(),
            WorkerError::Store(_) | WorkerError::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        assert!(WorkerError::AlreadyRunning.is_conflict());
        assert!(!WorkerError::config_error("bad").is_conflict());
    }

    #[test]
    fn test_retryable_classification() {
        let timeout = WorkerError::BatchTimeout {
            stage: Stage::Localization,
            timeout: Duration::from_secs(5),
        };
        assert!(timeout.is_retryable());
        assert!(!WorkerError::config_error("bad").is_retryable());
        let unknown = WorkerError::Ml(MlError::UnknownModel {
            stage: Stage::SpeciesClassification,
            name: "x".to_string(),
        });
        assert!(!unknown.is_retryable());
    }
}
