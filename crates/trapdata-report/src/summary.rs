//! Per-label summaries.
//!
//! Rows are grouped by their best label (specific, else binary, else
//! unclassified). Rows sharing a track identifier count once; untracked rows
//! count individually. Rows below the confidence threshold are left out of
//! the summary but stay in the store.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use trapdata_models::{DetectedObject, DetectionId, Scope};
use trapdata_store::RecordStore;

use crate::error::{ReportError, ReportResult};

/// A representative detection for a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Example {
    pub detection_id: DetectionId,
    pub score: f64,
    pub cropped_path: Option<String>,
}

/// Summary of one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LabelGroup {
    pub label: String,
    /// Distinct individuals: tracks count once, untracked rows count individually
    pub count: usize,
    /// Mean confidence of the included rows
    pub mean_score: f64,
    /// Highest confidence first, ties by id
    pub examples: Vec<Example>,
}

#[derive(Default)]
struct Accumulator<'a> {
    tracks: HashSet<&'a str>,
    untracked: usize,
    score_sum: f64,
    rows: usize,
    examples: Vec<Example>,
}

fn by_score_then_id(a: &Example, b: &Example) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.detection_id.cmp(&b.detection_id))
}

/// Summarize a fixed set of detections.
pub fn summarize_detections(
    detections: &[DetectedObject],
    confidence_threshold: f64,
    examples_per_group: usize,
) -> ReportResult<Vec<LabelGroup>> {
    if !confidence_threshold.is_finite() {
        return Err(ReportError::InvalidThreshold(confidence_threshold));
    }

    let mut groups: BTreeMap<&str, Accumulator<'_>> = BTreeMap::new();
    for detection in detections {
        let score = detection.best_score();
        if score < confidence_threshold {
            continue;
        }

        let acc = groups.entry(detection.best_label()).or_default();
        match detection.track_id.as_deref() {
            Some(track) => {
                acc.tracks.insert(track);
            }
            None => acc.untracked += 1,
        }
        acc.score_sum += score;
        acc.rows += 1;
        acc.examples.push(Example {
            detection_id: detection.id,
            score,
            cropped_path: detection.cropped_path.clone(),
        });
    }

    let mut summary: Vec<LabelGroup> = groups
        .into_iter()
        .map(|(label, mut acc)| {
            acc.examples.sort_by(by_score_then_id);
            acc.examples.truncate(examples_per_group);
            LabelGroup {
                label: label.to_string(),
                count: acc.tracks.len() + acc.untracked,
                mean_score: acc.score_sum / acc.rows as f64,
                examples: acc.examples,
            }
        })
        .collect();

    // BTreeMap iteration already orders labels; the stable sort keeps that for ties.
    summary.sort_by(|a, b| b.count.cmp(&a.count));
    Ok(summary)
}

/// Summarize every detection in `scope`.
pub fn summarize(
    store: &dyn RecordStore,
    scope: &Scope,
    confidence_threshold: f64,
    examples_per_group: usize,
) -> ReportResult<Vec<LabelGroup>> {
    let detections = store.detections(scope)?;
    let summary = summarize_detections(&detections, confidence_threshold, examples_per_group)?;
    debug!(
        %scope,
        detections = detections.len(),
        groups = summary.len(),
        "Summarized detections"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trapdata_models::{BoundingBox, ImageId, ProcessingStatus, POSITIVE_BINARY_LABEL};

    fn moth(id: i64, species: &str, score: f64, track: Option<&str>) -> DetectedObject {
        DetectedObject {
            id: DetectionId(id),
            image_id: ImageId(1),
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            detection_score: Some(0.99),
            binary_label: Some(POSITIVE_BINARY_LABEL.to_string()),
            binary_score: Some(0.95),
            binary_status: ProcessingStatus::Done,
            specific_label: Some(species.to_string()),
            specific_score: Some(score),
            specific_status: ProcessingStatus::Done,
            cropped_path: None,
            track_id: track.map(str::to_string),
            last_error: None,
        }
    }

    fn tracked_rows(scores: [f64; 5]) -> Vec<DetectedObject> {
        let tracks = [Some("A"), Some("A"), Some("B"), None, None];
        tracks
            .iter()
            .zip(scores)
            .enumerate()
            .map(|(i, (track, score))| moth(i as i64 + 1, "Actias luna", score, *track))
            .collect()
    }

    #[test]
    fn test_tracks_count_once_untracked_individually() {
        let rows = tracked_rows([0.9, 0.8, 0.7, 0.6, 0.5]);
        let summary = summarize_detections(&rows, 0.0, 3).unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].count, 4);
        assert!((summary[0].mean_score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_excludes_rows_before_counting() {
        // A(0.3) and the second untracked row fall below 0.5, leaving A, B, untracked.
        let rows = tracked_rows([0.9, 0.3, 0.8, 0.7, 0.2]);
        let summary = summarize_detections(&rows, 0.5, 10).unwrap();
        assert_eq!(summary[0].count, 3);
        assert_eq!(summary[0].examples.len(), 3);
        assert!((summary[0].mean_score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_examples_highest_confidence_first_ties_by_id() {
        let rows = vec![
            moth(3, "Actias luna", 0.7, None),
            moth(1, "Actias luna", 0.9, None),
            moth(2, "Actias luna", 0.7, None),
        ];
        let summary = summarize_detections(&rows, 0.0, 2).unwrap();
        let ids: Vec<_> = summary[0].examples.iter().map(|e| e.detection_id).collect();
        assert_eq!(ids, vec![DetectionId(1), DetectionId(2)]);
    }

    #[test]
    fn test_groups_ordered_by_count_then_label() {
        let mut unclassified = moth(5, "x", 0.0, None);
        unclassified.binary_label = None;
        unclassified.binary_status = ProcessingStatus::Pending;
        unclassified.specific_label = None;
        unclassified.specific_status = ProcessingStatus::Pending;

        let mut nonmoth = moth(6, "x", 0.0, None);
        nonmoth.binary_label = Some("nonmoth".to_string());
        nonmoth.binary_score = Some(0.8);
        nonmoth.specific_label = None;

        let rows = vec![
            moth(1, "Catocala", 0.9, None),
            moth(2, "Actias luna", 0.9, None),
            moth(3, "Actias luna", 0.9, None),
            moth(4, "Bombyx", 0.9, None),
            unclassified,
            nonmoth,
        ];
        let summary = summarize_detections(&rows, 0.0, 1).unwrap();
        let labels: Vec<_> = summary.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Actias luna", "Bombyx", "Catocala", "nonmoth", "unclassified"]
        );
    }

    #[test]
    fn test_non_finite_threshold_rejected() {
        assert!(matches!(
            summarize_detections(&[], f64::NAN, 1),
            Err(ReportError::InvalidThreshold(_))
        ));
    }
}
