//! Queue status snapshots.

use serde::Serialize;

use trapdata_models::{Scope, Stage};
use trapdata_store::StageCounts;

/// Counts for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageStatus {
    pub stage: Stage,
    #[serde(flatten)]
    pub counts: StageCounts,
}

/// Per-stage counts for a scope, in pipeline order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub scope: Scope,
    pub stages: Vec<StageStatus>,
}

impl QueueStatus {
    pub fn stage(&self, stage: Stage) -> Option<&StageStatus> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// True when no stage has queued work left in scope.
    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(|s| s.counts.pending == 0)
    }
}
