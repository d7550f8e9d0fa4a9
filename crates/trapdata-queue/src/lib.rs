//! Work queue over the record store.
//!
//! This crate provides:
//! - Per-stage eligibility selection in stable creation order
//! - Explicit queueing of images by scope, count, sample or id
//! - Queue clearing that resets eligibility for a scope
//! - Per-stage pending/done/failed status snapshots

pub mod error;
pub mod selector;
pub mod status;

pub use error::{QueueError, QueueResult};
pub use selector::{Batch, QueueSelector};
pub use status::{QueueStatus, StageStatus};
