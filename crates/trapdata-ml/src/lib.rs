//! Stage adapters for the inference stages.
//!
//! This crate provides:
//! - The `Localizer` and `Classifier` adapter contracts
//! - A model registry that binds each stage to one adapter at startup
//! - Adapters backed by an HTTP inference service, with retry
//! - Image cropping and encoding helpers

pub mod adapter;
pub mod client;
pub mod error;
pub mod imaging;
pub mod registry;
pub mod remote;
pub mod retry;
pub mod types;

pub use adapter::{check_result_count, Classifier, Localizer, StageAdapters};
pub use client::{InferenceClient, InferenceClientConfig};
pub use error::{MlError, MlResult};
pub use registry::{
    ModelRegistry, ModelSelection, DEFAULT_BINARY_MODEL, DEFAULT_LOCALIZATION_MODEL,
    DEFAULT_SPECIES_MODEL,
};
pub use remote::{RemoteClassifier, RemoteLocalizer};
pub use retry::RetryConfig;
pub use types::{
    ClassificationInput, ClassificationResult, Device, LocalizationInput, LocalizationResult,
    ScoredBox,
};
