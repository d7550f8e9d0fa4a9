//! Source image model.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ImageId, ProcessingStatus, SessionId};

/// One captured photograph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceImage {
    pub id: ImageId,

    /// Owning monitoring session
    pub session_id: SessionId,

    /// Absolute path of the image file
    pub path: String,

    /// Capture timestamp
    pub captured_at: DateTime<Utc>,

    /// When the image last became eligible for localization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,

    /// Localization marker, independent of how many detections exist
    pub status: ProcessingStatus,

    /// When localization results were committed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,

    /// Failure reason when `status` is failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SourceImage {
    pub fn is_pending(&self) -> bool {
        self.status == ProcessingStatus::Pending
    }
}
