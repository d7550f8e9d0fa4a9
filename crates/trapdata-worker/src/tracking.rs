//! Track identifier assignment.
//!
//! No tracking algorithm ships with the pipeline. Callers supply a
//! `TrackAssigner` and the orchestrator applies its output atomically.

use std::collections::HashSet;

use trapdata_models::{DetectedObject, DetectionId, SourceImage};
use trapdata_store::TrackAssignment;

/// Groups detections of the same individual under an opaque key.
pub trait TrackAssigner: Send + Sync {
    /// Assigner name, for logging.
    fn name(&self) -> &str;

    /// Compute track identifiers for `detections`.
    ///
    /// `images` holds the source image of every detection. Detections left
    /// out of the result keep their current track identifier; an
    /// assignment of `None` clears it.
    fn assign(&self, detections: &[DetectedObject], images: &[SourceImage]) -> Vec<TrackAssignment>;
}

/// Drop assignments for detections outside `detections`.
pub(crate) fn retain_known(
    detections: &[DetectedObject],
    assignments: Vec<TrackAssignment>,
) -> (Vec<TrackAssignment>, usize) {
    let known: HashSet<DetectionId> = detections.iter().map(|d| d.id).collect();
    let total = assignments.len();
    let kept: Vec<TrackAssignment> = assignments
        .into_iter()
        .filter(|a| known.contains(&a.detection_id))
        .collect();
    let dropped = total - kept.len();
    (kept, dropped)
}
