//! Queue selector.
//!
//! Eligibility is read from committed record state only, so a selector that
//! is called again after an interrupted run resumes at the first remaining
//! eligible record.
//!
//! Images enter the localization queue explicitly: a whole scope, the first
//! N images of a scope, a random sample or individual ids. Detections follow
//! their image automatically once it is localized.

use std::sync::Arc;

use tracing::{debug, info};

use trapdata_models::{DetectionId, ImageId, Scope, Stage};
use trapdata_store::{ClearSummary, RecordStore};

use crate::error::{QueueError, QueueResult};
use crate::status::{QueueStatus, StageStatus};

/// One batch of eligible record identifiers, ascending id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batch {
    /// Source images awaiting localization
    Images(Vec<ImageId>),
    /// Detected objects awaiting a classification stage
    Detections(Vec<DetectionId>),
}

impl Batch {
    pub fn len(&self) -> usize {
        match self {
            Batch::Images(ids) => ids.len(),
            Batch::Detections(ids) => ids.len(),
        }
    }

    /// An empty batch means the stage is complete for the scope.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Selects eligible work for each stage.
#[derive(Clone)]
pub struct QueueSelector {
    store: Arc<dyn RecordStore>,
}

impl QueueSelector {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Next batch of at most `batch_size` eligible ids for `stage` in `scope`.
    pub fn select_batch(&self, stage: Stage, scope: &Scope, batch_size: usize) -> QueueResult<Batch> {
        if batch_size == 0 {
            return Err(QueueError::InvalidBatchSize(batch_size));
        }

        let batch = if stage.consumes_images() {
            Batch::Images(self.store.eligible_images(scope, batch_size)?)
        } else {
            Batch::Detections(self.store.eligible_detections(stage, scope, batch_size)?)
        };

        debug!(%stage, %scope, batch_size, selected = batch.len(), "Selected batch");
        Ok(batch)
    }

    /// Queue unprocessed images in `scope`, oldest first, at most `limit`.
    pub fn enqueue(&self, scope: &Scope, limit: Option<usize>) -> QueueResult<u64> {
        if limit == Some(0) {
            return Err(QueueError::InvalidLimit(0));
        }
        Ok(self.store.enqueue(scope, limit)?)
    }

    /// Queue specific images.
    pub fn enqueue_images(&self, ids: &[ImageId]) -> QueueResult<u64> {
        Ok(self.store.enqueue_images(ids)?)
    }

    /// Top up the queue for `scope` to `sample_size` randomly chosen images.
    pub fn enqueue_sample(&self, scope: &Scope, sample_size: usize) -> QueueResult<u64> {
        Ok(self.store.enqueue_sample(scope, sample_size)?)
    }

    /// Reset eligibility for every record in `scope`.
    ///
    /// Deletes derived detections and queues every image in scope again.
    /// Callers must not clear while a run is active.
    pub fn clear_queue(&self, scope: &Scope) -> QueueResult<ClearSummary> {
        let summary = self.store.clear(scope)?;
        info!(
            %scope,
            images_reset = summary.images_reset,
            detections_deleted = summary.detections_deleted,
            "Queue cleared"
        );
        Ok(summary)
    }

    /// Pending/done/failed counts for every stage in `scope`.
    pub fn status(&self, scope: &Scope) -> QueueResult<QueueStatus> {
        let stages = Stage::ALL
            .iter()
            .map(|stage| {
                Ok(StageStatus {
                    stage: *stage,
                    counts: self.store.stage_counts(*stage, scope)?,
                })
            })
            .collect::<QueueResult<Vec<_>>>()?;

        Ok(QueueStatus {
            scope: *scope,
            stages,
        })
    }
}
