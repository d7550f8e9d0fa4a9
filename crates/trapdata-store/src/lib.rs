//! Record store for the camera-trap pipeline.
//!
//! This crate provides:
//! - The `RecordStore` contract used by the queue and the orchestrator
//! - Explicit queue membership and a store-wide run lock
//! - A SQLite implementation with per-batch transactional commits
//! - Image discovery that creates sessions and source images

pub mod config;
pub mod discovery;
pub mod error;
pub mod records;
mod schema;
pub mod sqlite;
pub mod store;

pub use config::StoreConfig;
pub use discovery::{capture_timestamp, discover_images, DiscoveryReport};
pub use error::{StoreError, StoreResult};
pub use records::{
    ClassificationOutcome, ClearSummary, LocalizationOutcome, LockPurpose, NewDetection, NewImage,
    RunLock, StageCounts, TrackAssignment,
};
pub use sqlite::SqliteStore;
pub use store::RecordStore;
