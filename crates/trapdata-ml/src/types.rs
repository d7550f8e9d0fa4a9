//! Adapter inputs and per-item results.

use std::fmt;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use trapdata_models::{BoundingBox, DetectionId, ImageId};

/// Compute target requested when a model is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    /// GPU or other accelerator if the service has one
    #[default]
    Accelerated,
    Cpu,
}

impl Device {
    pub fn from_accelerated(use_accelerated_compute: bool) -> Self {
        if use_accelerated_compute {
            Device::Accelerated
        } else {
            Device::Cpu
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Accelerated => "accelerated",
            Device::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decoded source image handed to the localizer.
#[derive(Debug, Clone)]
pub struct LocalizationInput {
    pub image_id: ImageId,
    pub image: DynamicImage,
}

/// Decoded crop handed to a classifier.
#[derive(Debug, Clone)]
pub struct ClassificationInput {
    pub detection_id: DetectionId,
    pub image: DynamicImage,
}

/// One box found by the localizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredBox {
    pub bbox: BoundingBox,
    pub score: Option<f64>,
}

/// Localizer output for one input.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalizationResult {
    /// Zero or more boxes. An empty list is the "no detection" marker.
    Boxes(Vec<ScoredBox>),
    Failed(String),
}

impl LocalizationResult {
    pub fn nothing_detected() -> Self {
        LocalizationResult::Boxes(Vec::new())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        LocalizationResult::Failed(reason.into())
    }
}

/// Classifier output for one input.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationResult {
    Label { label: String, score: f64 },
    Failed(String),
}

impl ClassificationResult {
    pub fn label(label: impl Into<String>, score: f64) -> Self {
        ClassificationResult::Label {
            label: label.into(),
            score,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        ClassificationResult::Failed(reason.into())
    }
}
