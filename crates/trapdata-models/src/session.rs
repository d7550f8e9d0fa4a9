//! Monitoring session model.

use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::SessionId;

/// A contiguous capture period for one camera deployment.
///
/// Start, end and image count are derived from the session's images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MonitoringSession {
    pub id: SessionId,

    /// Directory the images were discovered in
    pub base_directory: String,

    /// Capture date that groups the images
    pub day: NaiveDate,

    /// Earliest capture timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// Latest capture timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Number of images in the session
    pub image_count: u64,
}

impl MonitoringSession {
    /// Duration between first and last capture, if any images exist.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Trap name, taken from the last component of the base directory.
    pub fn trap_name(&self) -> &str {
        self.base_directory
            .trim_end_matches(['/', '\\'])
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.base_directory)
    }
}
