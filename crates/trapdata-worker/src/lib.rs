//! Camera-trap pipeline worker.
//!
//! This crate provides:
//! - The orchestrator that runs localization, binary and species stages
//! - Parallel input loading and crop writing
//! - Run configuration, structured stage logging and metrics
//! - Pluggable track assignment

pub mod config;
pub mod error;
pub mod loader;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod stages;
pub mod tracking;

pub use config::PipelineConfig;
pub use error::{WorkerError, WorkerResult};
pub use loader::InputLoader;
pub use logging::StageLogger;
pub use orchestrator::{Orchestrator, RunSummary, StageSummary, DEFAULT_LOCK_TTL};
pub use tracking::TrackAssigner;
