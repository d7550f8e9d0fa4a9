//! Conversion of adapter results into store outcomes.

use std::path::Path;

use image::DynamicImage;

use trapdata_ml::{imaging, ClassificationResult, LocalizationResult, ScoredBox};
use trapdata_models::{BoundingBox, DetectionId, ImageId};
use trapdata_store::{ClassificationOutcome, LocalizationOutcome, NewDetection};

/// Settings applied to localizer boxes before commit.
#[derive(Debug, Clone, Copy)]
pub struct BoxFilter<'a> {
    pub threshold: f64,
    pub crops_dir: Option<&'a Path>,
}

impl BoxFilter<'_> {
    fn keeps(&self, scored: &ScoredBox) -> bool {
        scored.score.map_or(true, |score| score >= self.threshold)
    }
}

/// Write the crop of `bbox` as `{image_id}-{n}.jpg` under `dir`.
///
/// Returns `None` when the box does not overlap the image.
fn write_crop(
    dir: &Path,
    image_id: ImageId,
    n: usize,
    image: &DynamicImage,
    bbox: &BoundingBox,
) -> Result<Option<String>, String> {
    let Some(crop) = imaging::crop(image, bbox) else {
        return Ok(None);
    };
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("failed to create {}: {}", dir.display(), e))?;
    let path = dir.join(format!("{}-{}.jpg", image_id, n));
    imaging::save_jpeg(&crop, &path)
        .map_err(|e| format!("failed to write crop {}: {}", path.display(), e))?;
    Ok(Some(path.to_string_lossy().into_owned()))
}

/// Build the localization outcome for one image.
///
/// A crop that cannot be written fails the whole image, so it is never
/// committed with a partial set of detections.
pub fn localization_outcome(
    image_id: ImageId,
    image: &DynamicImage,
    result: LocalizationResult,
    filter: BoxFilter<'_>,
) -> LocalizationOutcome {
    let boxes = match result {
        LocalizationResult::Boxes(boxes) => boxes,
        LocalizationResult::Failed(reason) => {
            return LocalizationOutcome::Failed { image_id, reason }
        }
    };

    let mut detections = Vec::new();
    for (n, scored) in boxes.iter().filter(|b| filter.keeps(b)).enumerate() {
        let cropped_path = match filter.crops_dir {
            Some(dir) => match write_crop(dir, image_id, n, image, &scored.bbox) {
                Ok(path) => path,
                Err(reason) => return LocalizationOutcome::Failed { image_id, reason },
            },
            None => None,
        };
        detections.push(NewDetection {
            bbox: scored.bbox,
            score: scored.score,
            cropped_path,
        });
    }

    LocalizationOutcome::Detected {
        image_id,
        detections,
    }
}

pub fn classification_outcome(
    detection_id: DetectionId,
    result: ClassificationResult,
) -> ClassificationOutcome {
    match result {
        ClassificationResult::Label { label, score } => ClassificationOutcome::Labeled {
            detection_id,
            label,
            score,
        },
        ClassificationResult::Failed(reason) => ClassificationOutcome::Failed {
            detection_id,
            reason,
        },
    }
}
