//! Read-only reporting over finalized records.
//!
//! This crate provides:
//! - Per-label summaries deduplicated by track identifier
//! - Detection report export to JSON files

pub mod error;
pub mod export;
pub mod summary;

pub use error::{ReportError, ReportResult};
pub use export::{collect_records, export_records, export_session, report_name, ExportRecord};
pub use summary::{summarize, summarize_detections, Example, LabelGroup};
