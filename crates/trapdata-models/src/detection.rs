//! Detected object model.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{DetectionId, ImageId, ProcessingStatus, POSITIVE_BINARY_LABEL, UNCLASSIFIED_LABEL};

/// Bounding box in absolute pixel coordinates `(x1, y1)`-`(x2, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Clamp to an image of the given size and return integer pixel bounds
    /// `(x, y, width, height)`, or `None` if nothing remains.
    pub fn to_pixel_rect(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let clamp_x = |v: f64| v.max(0.0).min(image_width as f64);
        let clamp_y = |v: f64| v.max(0.0).min(image_height as f64);

        let x1 = clamp_x(self.x1).floor() as u32;
        let y1 = clamp_y(self.y1).floor() as u32;
        let x2 = clamp_x(self.x2).ceil() as u32;
        let y2 = clamp_y(self.y2).ceil() as u32;

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// One bounding-box detection inside a source image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectedObject {
    pub id: DetectionId,

    /// Owning source image
    pub image_id: ImageId,

    pub bbox: BoundingBox,

    /// Localization confidence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_score: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_label: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_score: Option<f64>,

    pub binary_status: ProcessingStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub specific_label: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub specific_score: Option<f64>,

    pub specific_status: ProcessingStatus,

    /// Path of the cropped image written during localization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cropped_path: Option<String>,

    /// Opaque key grouping detections of the same individual
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,

    /// Failure reason of the last failed stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl DetectedObject {
    /// Whether the binary classifier marked this object as a moth.
    pub fn is_positive(&self) -> bool {
        self.binary_label.as_deref() == Some(POSITIVE_BINARY_LABEL)
    }

    /// Most specific label assigned so far.
    pub fn best_label(&self) -> &str {
        self.specific_label
            .as_deref()
            .or(self.binary_label.as_deref())
            .unwrap_or(UNCLASSIFIED_LABEL)
    }

    /// Confidence paired with `best_label`.
    pub fn best_score(&self) -> f64 {
        if self.specific_label.is_some() {
            self.specific_score.unwrap_or(0.0)
        } else if self.binary_label.is_some() {
            self.binary_score.unwrap_or(0.0)
        } else {
            self.detection_score.unwrap_or(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection() -> DetectedObject {
        DetectedObject {
            id: DetectionId(1),
            image_id: ImageId(1),
            bbox: BoundingBox::new(10.0, 20.0, 50.0, 80.0),
            detection_score: Some(0.995),
            binary_label: None,
            binary_score: None,
            binary_status: ProcessingStatus::Pending,
            specific_label: None,
            specific_score: None,
            specific_status: ProcessingStatus::Pending,
            cropped_path: None,
            track_id: None,
            last_error: None,
        }
    }

    #[test]
    fn test_bbox_dimensions() {
        let bbox = BoundingBox::new(10.0, 20.0, 50.0, 80.0);
        assert_eq!(bbox.width(), 40.0);
        assert_eq!(bbox.height(), 60.0);
        assert_eq!(bbox.area(), 2400.0);
    }

    #[test]
    fn test_bbox_pixel_rect_clamps() {
        let bbox = BoundingBox::new(-5.0, 10.2, 120.0, 30.7);
        assert_eq!(bbox.to_pixel_rect(100, 100), Some((0, 10, 100, 21)));

        let outside = BoundingBox::new(150.0, 150.0, 200.0, 200.0);
        assert_eq!(outside.to_pixel_rect(100, 100), None);
    }

    #[test]
    fn test_best_label_falls_back() {
        let mut obj = detection();
        assert_eq!(obj.best_label(), UNCLASSIFIED_LABEL);
        assert_eq!(obj.best_score(), 0.995);

        obj.binary_label = Some(POSITIVE_BINARY_LABEL.to_string());
        obj.binary_score = Some(0.8);
        assert!(obj.is_positive());
        assert_eq!(obj.best_label(), "moth");
        assert_eq!(obj.best_score(), 0.8);

        obj.specific_label = Some("Actias luna".to_string());
        obj.specific_score = Some(0.6);
        assert_eq!(obj.best_label(), "Actias luna");
        assert_eq!(obj.best_score(), 0.6);
    }
}
