//! The record store contract.

use std::time::Duration;

use chrono::NaiveDate;

use trapdata_models::{
    DetectedObject, DetectionId, ImageId, MonitoringSession, Scope, SessionId, SourceImage, Stage,
};

use crate::error::StoreResult;
use crate::records::{
    ClassificationOutcome, ClearSummary, LocalizationOutcome, LockPurpose, NewImage, RunLock,
    StageCounts, TrackAssignment,
};

/// Transactional read/write interface over typed records.
///
/// Eligibility is derived from committed state only. Every `commit_*` call
/// is all-or-nothing: if any outcome in the batch cannot be applied the
/// whole batch is rolled back and its records stay eligible.
pub trait RecordStore: Send + Sync {
    /// Find the session for a directory and capture date, creating it if needed.
    fn get_or_create_session(&self, base_directory: &str, day: NaiveDate) -> StoreResult<SessionId>;

    /// Insert an image, not yet queued. Returns `None` if the path is already known.
    fn insert_image(&self, image: &NewImage) -> StoreResult<Option<ImageId>>;

    /// Queue unprocessed images in scope in ascending id order, at most
    /// `limit` when given. Returns how many were newly queued.
    fn enqueue(&self, scope: &Scope, limit: Option<usize>) -> StoreResult<u64>;

    /// Queue the given images if they are still unprocessed. Unknown ids are skipped.
    fn enqueue_images(&self, ids: &[ImageId]) -> StoreResult<u64>;

    /// Queue randomly chosen unprocessed images until `sample_size` images in
    /// scope are queued and pending. Returns how many were newly queued.
    fn enqueue_sample(&self, scope: &Scope, sample_size: usize) -> StoreResult<u64>;

    /// All sessions with derived start, end and image count.
    fn sessions(&self) -> StoreResult<Vec<MonitoringSession>>;

    fn session(&self, id: SessionId) -> StoreResult<Option<MonitoringSession>>;

    /// Queued, pending images in scope, ascending id, at most `limit`.
    fn eligible_images(&self, scope: &Scope, limit: usize) -> StoreResult<Vec<ImageId>>;

    /// Detections eligible for a classification stage, ascending id, at most `limit`.
    fn eligible_detections(
        &self,
        stage: Stage,
        scope: &Scope,
        limit: usize,
    ) -> StoreResult<Vec<DetectionId>>;

    /// Load images by id, ascending id. Unknown ids are skipped.
    fn images(&self, ids: &[ImageId]) -> StoreResult<Vec<SourceImage>>;

    /// Load detections by id, ascending id. Unknown ids are skipped.
    fn detections_by_id(&self, ids: &[DetectionId]) -> StoreResult<Vec<DetectedObject>>;

    /// All detections in scope, ascending id.
    fn detections(&self, scope: &Scope) -> StoreResult<Vec<DetectedObject>>;

    /// Commit one localization batch atomically.
    fn commit_localization(&self, batch: &[LocalizationOutcome]) -> StoreResult<()>;

    /// Commit one classification batch atomically.
    fn commit_classification(&self, stage: Stage, batch: &[ClassificationOutcome])
        -> StoreResult<()>;

    /// Write track identifiers atomically.
    fn assign_tracks(&self, assignments: &[TrackAssignment]) -> StoreResult<()>;

    /// Delete derived detections, reset image eligibility and queue every image in scope.
    fn clear(&self, scope: &Scope) -> StoreResult<ClearSummary>;

    /// Pending/done/failed counts for a stage in scope.
    fn stage_counts(&self, stage: Stage, scope: &Scope) -> StoreResult<StageCounts>;

    /// Take the store-wide run lock for `holder`.
    ///
    /// Fails with `StoreError::Locked` while another holder's lock is fresh.
    /// A lock whose heartbeat is older than `stale_after` is taken over.
    fn acquire_run_lock(
        &self,
        holder: &str,
        purpose: LockPurpose,
        stale_after: Duration,
    ) -> StoreResult<()>;

    /// Refresh the heartbeat of a lock held by `holder`.
    fn refresh_run_lock(&self, holder: &str) -> StoreResult<()>;

    /// Release the lock if `holder` owns it. Returns whether it was released.
    fn release_run_lock(&self, holder: &str) -> StoreResult<bool>;

    /// The current lock, stale or not.
    fn run_lock(&self) -> StoreResult<Option<RunLock>>;
}
