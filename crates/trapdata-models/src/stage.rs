//! Pipeline stages, scopes and processing status.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::SessionId;

/// One inference step applied to eligible records.
///
/// The set is closed: every stage is bound to exactly one adapter at
/// configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Object localization on whole source images
    Localization,
    /// Moth / non-moth classification of detected objects
    BinaryClassification,
    /// Fine-grained species classification of moths
    SpeciesClassification,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: &'static [Stage] = &[
        Stage::Localization,
        Stage::BinaryClassification,
        Stage::SpeciesClassification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Localization => "localization",
            Stage::BinaryClassification => "binary_classification",
            Stage::SpeciesClassification => "species_classification",
        }
    }

    /// Whether the stage consumes source images (as opposed to detections).
    pub fn consumes_images(&self) -> bool {
        matches!(self, Stage::Localization)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Stage {
    type Err = StageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "localization" => Ok(Stage::Localization),
            "binary_classification" | "binary" => Ok(Stage::BinaryClassification),
            "species_classification" | "species" => Ok(Stage::SpeciesClassification),
            _ => Err(StageParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown stage: {0}")]
pub struct StageParseError(String);

/// Subset of the store a run or query operates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(tag = "type", content = "session_id", rename_all = "snake_case")]
pub enum Scope {
    /// Every record in the store
    #[default]
    All,
    /// Records of one monitoring session
    Session(SessionId),
}

impl Scope {
    pub fn session(&self) -> Option<SessionId> {
        match self {
            Scope::All => None,
            Scope::Session(id) => Some(*id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => write!(f, "all"),
            Scope::Session(id) => write!(f, "session:{}", id),
        }
    }
}

/// Per-record, per-stage processing marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Not yet processed by the stage
    #[default]
    Pending,
    /// Result committed
    Done,
    /// Stage could not process the record; excluded from later selection
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Done => "done",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// Parse the stored representation.
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProcessingStatus::Pending),
            "done" => Some(ProcessingStatus::Done),
            "failed" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessingStatus::Pending)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Orchestrator status as observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running(Stage),
}

impl RunStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, RunStatus::Running(_))
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            RunStatus::Idle => None,
            RunStatus::Running(stage) => Some(*stage),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Running(stage) => write!(f, "running({})", stage),
        }
    }
}
