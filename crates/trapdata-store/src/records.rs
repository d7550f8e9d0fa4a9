//! Write-side record types: new rows and per-batch stage outcomes.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use trapdata_models::{BoundingBox, DetectionId, ImageId, SessionId};

/// A newly discovered image.
#[derive(Debug, Clone, PartialEq)]
pub struct NewImage {
    pub session_id: SessionId,
    pub path: String,
    pub captured_at: DateTime<Utc>,
}

/// One box produced by the localization stage.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDetection {
    pub bbox: BoundingBox,
    pub score: Option<f64>,
    pub cropped_path: Option<String>,
}

/// Localization result for one source image.
///
/// `Detected` with an empty list is a valid, terminal outcome: the image is
/// marked done and never re-selected.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalizationOutcome {
    Detected {
        image_id: ImageId,
        detections: Vec<NewDetection>,
    },
    Failed {
        image_id: ImageId,
        reason: String,
    },
}

impl LocalizationOutcome {
    pub fn image_id(&self) -> ImageId {
        match self {
            LocalizationOutcome::Detected { image_id, .. } => *image_id,
            LocalizationOutcome::Failed { image_id, .. } => *image_id,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, LocalizationOutcome::Failed { .. })
    }
}

/// Classification result for one detected object.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationOutcome {
    Labeled {
        detection_id: DetectionId,
        label: String,
        score: f64,
    },
    Failed {
        detection_id: DetectionId,
        reason: String,
    },
}

impl ClassificationOutcome {
    pub fn detection_id(&self) -> DetectionId {
        match self {
            ClassificationOutcome::Labeled { detection_id, .. } => *detection_id,
            ClassificationOutcome::Failed { detection_id, .. } => *detection_id,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ClassificationOutcome::Failed { .. })
    }
}

/// Track identifier assignment produced by an external tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackAssignment {
    pub detection_id: DetectionId,
    pub track_id: Option<String>,
}

/// Per-stage queue counts for a scope.
///
/// `pending` counts records a run would select. For localization,
/// unprocessed images that were never queued are counted in `unqueued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageCounts {
    pub pending: u64,
    pub done: u64,
    pub failed: u64,
    #[serde(default)]
    pub unqueued: u64,
}

impl StageCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.done + self.failed + self.unqueued
    }
}

/// What a queue clear removed and reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClearSummary {
    pub images_reset: u64,
    pub detections_deleted: u64,
}

/// What a run lock holder is doing with the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPurpose {
    Run,
    Clear,
    AssignTracks,
}

impl LockPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockPurpose::Run => "run",
            LockPurpose::Clear => "clear",
            LockPurpose::AssignTracks => "assign_tracks",
        }
    }
}

impl fmt::Display for LockPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockPurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run" => Ok(LockPurpose::Run),
            "clear" => Ok(LockPurpose::Clear),
            "assign_tracks" => Ok(LockPurpose::AssignTracks),
            other => Err(format!("unknown lock purpose '{}'", other)),
        }
    }
}

/// The store-wide exclusive lock held during a run, clear or track assignment.
///
/// Holders refresh `heartbeat_at` while they work. A lock whose heartbeat is
/// older than the caller's staleness limit may be taken over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLock {
    pub holder: String,
    pub purpose: LockPurpose,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

impl RunLock {
    pub fn is_stale_at(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        // A heartbeat in the future (clock skew) is treated as fresh.
        now.signed_duration_since(self.heartbeat_at)
            .to_std()
            .map(|age| age > stale_after)
            .unwrap_or(false)
    }

    pub fn is_stale(&self, stale_after: Duration) -> bool {
        self.is_stale_at(Utc::now(), stale_after)
    }
}
