//! Stage adapter contracts.
//!
//! An adapter wraps one inference capability. `prepare()` acquires the model
//! once and is safe to call repeatedly; `run_batch` returns exactly one
//! result per input, in input order. Per-item problems are reported in the
//! result slot. An `Err` from either method is fatal to the current run.

use std::sync::Arc;

use async_trait::async_trait;

use trapdata_models::Stage;

use crate::error::{MlError, MlResult};
use crate::types::{ClassificationInput, ClassificationResult, LocalizationInput, LocalizationResult};

/// Object localization adapter.
#[async_trait]
pub trait Localizer: Send + Sync {
    /// Model name, for logging.
    fn name(&self) -> &str;

    /// Acquire model resources. Idempotent.
    async fn prepare(&self) -> MlResult<()>;

    async fn run_batch(&self, inputs: &[LocalizationInput]) -> MlResult<Vec<LocalizationResult>>;
}

/// Binary or species classification adapter.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Model name, for logging.
    fn name(&self) -> &str;

    /// Acquire model resources. Idempotent.
    async fn prepare(&self) -> MlResult<()>;

    async fn run_batch(
        &self,
        inputs: &[ClassificationInput],
    ) -> MlResult<Vec<ClassificationResult>>;
}

/// Verify an adapter honored the one-result-per-input contract.
pub fn check_result_count(expected: usize, actual: usize) -> MlResult<()> {
    if expected != actual {
        return Err(MlError::ResultCountMismatch { expected, actual });
    }
    Ok(())
}

/// The adapters bound to each stage for one run.
#[derive(Clone)]
pub struct StageAdapters {
    pub localizer: Arc<dyn Localizer>,
    pub binary: Arc<dyn Classifier>,
    pub species: Arc<dyn Classifier>,
}

impl StageAdapters {
    pub fn new(
        localizer: Arc<dyn Localizer>,
        binary: Arc<dyn Classifier>,
        species: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            localizer,
            binary,
            species,
        }
    }

    /// Classifier for a classification stage, `None` for localization.
    pub fn classifier(&self, stage: Stage) -> Option<&Arc<dyn Classifier>> {
        match stage {
            Stage::Localization => None,
            Stage::BinaryClassification => Some(&self.binary),
            Stage::SpeciesClassification => Some(&self.species),
        }
    }

    pub fn model_name(&self, stage: Stage) -> &str {
        match self.classifier(stage) {
            Some(classifier) => classifier.name(),
            None => self.localizer.name(),
        }
    }
}

impl std::fmt::Debug for StageAdapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageAdapters")
            .field("localizer", &self.localizer.name())
            .field("binary", &self.binary.name())
            .field("species", &self.species.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_count() {
        assert!(check_result_count(3, 3).is_ok());
        assert!(matches!(
            check_result_count(3, 2),
            Err(MlError::ResultCountMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }
}
