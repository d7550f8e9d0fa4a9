//! Detection report export.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use trapdata_models::{
    BoundingBox, DetectedObject, DetectionId, ImageId, MonitoringSession, Scope, SessionId,
    SourceImage,
};
use trapdata_store::RecordStore;

use crate::error::{ReportError, ReportResult};

/// One exported detection with its source image context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExportRecord {
    pub id: DetectionId,
    pub image_id: ImageId,
    pub session_id: SessionId,
    pub source_image: String,
    pub captured_at: DateTime<Utc>,
    pub bbox: BoundingBox,
    pub label: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specific_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specific_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cropped_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
}

impl ExportRecord {
    pub fn new(detection: &DetectedObject, image: &SourceImage) -> Self {
        Self {
            id: detection.id,
            image_id: image.id,
            session_id: image.session_id,
            source_image: image.path.clone(),
            captured_at: image.captured_at,
            bbox: detection.bbox,
            label: detection.best_label().to_string(),
            score: detection.best_score(),
            binary_label: detection.binary_label.clone(),
            binary_score: detection.binary_score,
            specific_label: detection.specific_label.clone(),
            specific_score: detection.specific_score,
            cropped_path: detection.cropped_path.clone(),
            track_id: detection.track_id.clone(),
        }
    }
}

/// Report file name for a session export.
pub fn report_name(trap: &str, day: NaiveDate, created: DateTime<Utc>) -> String {
    format!(
        "{}-detections-for-{}-created-{}.json",
        trap,
        day.format("%Y-%m-%d"),
        created.timestamp()
    )
}

/// Join every detection in `scope` with its source image, ascending detection id.
pub fn collect_records(store: &dyn RecordStore, scope: &Scope) -> ReportResult<Vec<ExportRecord>> {
    let detections = store.detections(scope)?;

    let mut image_ids: Vec<ImageId> = detections.iter().map(|d| d.image_id).collect();
    image_ids.sort();
    image_ids.dedup();
    let images: HashMap<ImageId, SourceImage> = store
        .images(&image_ids)?
        .into_iter()
        .map(|image| (image.id, image))
        .collect();

    Ok(detections
        .iter()
        .filter_map(|d| images.get(&d.image_id).map(|image| ExportRecord::new(d, image)))
        .collect())
}

/// Serialize `records` as a JSON array to `destination`.
pub fn export_records(records: &[ExportRecord], destination: &Path) -> ReportResult<()> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_vec_pretty(records)?;
    std::fs::write(destination, json)?;

    info!(
        destination = %destination.display(),
        records = records.len(),
        "Exported detections"
    );
    Ok(())
}

/// Export one session into `directory` under its standard report name.
pub fn export_session(
    store: &dyn RecordStore,
    session_id: SessionId,
    directory: &Path,
    created: DateTime<Utc>,
) -> ReportResult<PathBuf> {
    let session: MonitoringSession = store
        .session(session_id)?
        .ok_or(ReportError::SessionNotFound(session_id.get()))?;

    let records = collect_records(store, &Scope::Session(session_id))?;
    let destination = directory.join(report_name(session.trap_name(), session.day, created));
    export_records(&records, &destination)?;
    Ok(destination)
}
