//! Pipeline run configuration.

use std::path::PathBuf;
use std::time::Duration;

use validator::Validate;

use trapdata_ml::{
    Device, ModelSelection, DEFAULT_BINARY_MODEL, DEFAULT_LOCALIZATION_MODEL,
    DEFAULT_SPECIES_MODEL,
};
use trapdata_models::Stage;

use crate::error::{WorkerError, WorkerResult};

/// Configuration for one orchestrator run.
#[derive(Debug, Clone, PartialEq, Validate)]
pub struct PipelineConfig {
    /// Localization model name
    pub localization_model: String,
    /// Binary moth/non-moth classifier name
    pub binary_classification_model: String,
    /// Species classifier name
    pub species_classification_model: String,
    /// Source images per localization batch
    #[validate(range(min = 1))]
    pub localization_batch_size: usize,
    /// Detections per classification batch
    #[validate(range(min = 1))]
    pub classification_batch_size: usize,
    /// Parallel input loaders
    #[validate(range(min = 1))]
    pub num_workers: usize,
    /// Request the accelerated device when loading models
    pub use_accelerated_compute: bool,
    /// Upper bound for loading and inference of one batch
    pub batch_timeout: Option<Duration>,
    /// Where localization writes one crop per box. No crops are written when unset.
    pub crops_dir: Option<PathBuf>,
    /// Boxes scoring below this are dropped before commit. Unscored boxes are kept.
    #[validate(range(min = 0.0, max = 1.0))]
    pub localization_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            localization_model: DEFAULT_LOCALIZATION_MODEL.to_string(),
            binary_classification_model: DEFAULT_BINARY_MODEL.to_string(),
            species_classification_model: DEFAULT_SPECIES_MODEL.to_string(),
            localization_batch_size: 2,
            classification_batch_size: 20,
            num_workers: 2,
            use_accelerated_compute: true,
            batch_timeout: None,
            crops_dir: None,
            localization_threshold: 0.99,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            localization_model: std::env::var("TRAPDATA_LOCALIZATION_MODEL")
                .unwrap_or(defaults.localization_model),
            binary_classification_model: std::env::var("TRAPDATA_BINARY_MODEL")
                .unwrap_or(defaults.binary_classification_model),
            species_classification_model: std::env::var("TRAPDATA_SPECIES_MODEL")
                .unwrap_or(defaults.species_classification_model),
            localization_batch_size: std::env::var("TRAPDATA_LOCALIZATION_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.localization_batch_size),
            classification_batch_size: std::env::var("TRAPDATA_CLASSIFICATION_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.classification_batch_size),
            num_workers: std::env::var("TRAPDATA_NUM_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.num_workers),
            use_accelerated_compute: std::env::var("TRAPDATA_USE_ACCELERATED_COMPUTE")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(defaults.use_accelerated_compute),
            batch_timeout: std::env::var("TRAPDATA_BATCH_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs),
            crops_dir: std::env::var("TRAPDATA_CROPS_DIR").ok().map(PathBuf::from),
            localization_threshold: std::env::var("TRAPDATA_LOCALIZATION_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.localization_threshold),
        }
    }

    /// Check ranges before a run starts.
    pub fn check(&self) -> WorkerResult<()> {
        self.validate()
            .map_err(|e| WorkerError::config_error(e.to_string()))
    }

    pub fn model_selection(&self) -> ModelSelection {
        ModelSelection {
            localization_model: self.localization_model.clone(),
            binary_classification_model: self.binary_classification_model.clone(),
            species_classification_model: self.species_classification_model.clone(),
        }
    }

    pub fn device(&self) -> Device {
        Device::from_accelerated(self.use_accelerated_compute)
    }

    /// Batch size used when selecting work for `stage`.
    pub fn batch_size(&self, stage: Stage) -> usize {
        if stage.consumes_images() {
            self.localization_batch_size
        } else {
            self.classification_batch_size
        }
    }
}
