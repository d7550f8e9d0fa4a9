//! Structured stage logging utilities.
//!
//! Provides consistent, structured logging for pipeline stages with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};

use trapdata_models::{RunId, Stage};

/// Stage logger for structured logging with consistent formatting.
///
/// Every event carries the run ID and the stage name.
#[derive(Debug, Clone)]
pub struct StageLogger {
    run_id: String,
    stage: String,
}

impl StageLogger {
    pub fn new(run_id: &RunId, stage: Stage) -> Self {
        Self {
            run_id: run_id.to_string(),
            stage: stage.to_string(),
        }
    }

    /// Logger for run-level events outside any stage.
    pub fn for_run(run_id: &RunId) -> Self {
        Self {
            run_id: run_id.to_string(),
            stage: "run".to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            run_id = %self.run_id,
            stage = %self.stage,
            "Stage started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            run_id = %self.run_id,
            stage = %self.stage,
            "Stage progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            run_id = %self.run_id,
            stage = %self.stage,
            "Stage warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            run_id = %self.run_id,
            stage = %self.stage,
            "Stage error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            run_id = %self.run_id,
            stage = %self.stage,
            "Stage completed: {}", message
        );
    }

    /// Create a tracing span for this stage.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "stage",
            run_id = %self.run_id,
            stage = %self.stage
        )
    }
}
