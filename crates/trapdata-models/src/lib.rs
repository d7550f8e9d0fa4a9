//! Shared record types for the camera-trap processing pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Monitoring sessions, source images and detected objects
//! - Pipeline stages, scopes and per-record processing status
//! - Run status published by the orchestrator

pub mod detection;
pub mod ids;
pub mod image;
pub mod session;
pub mod stage;

// Re-export common types
pub use detection::{BoundingBox, DetectedObject};
pub use ids::{DetectionId, ImageId, RunId, SessionId};
pub use image::SourceImage;
pub use session::MonitoringSession;
pub use stage::{ProcessingStatus, RunStatus, Scope, Stage, StageParseError};

/// Binary classifier label that marks an object as a moth.
pub const POSITIVE_BINARY_LABEL: &str = "moth";

/// Group label used for detections without any classification.
pub const UNCLASSIFIED_LABEL: &str = "unclassified";
