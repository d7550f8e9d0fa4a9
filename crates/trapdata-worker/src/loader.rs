//! Parallel input loading.
//!
//! Decoding runs on the blocking pool with at most `num_workers` files in
//! flight. Results are re-joined to their record id, so completion order
//! does not matter. A file that cannot be decoded yields a failure reason
//! for that record instead of failing the batch.

use std::collections::HashMap;
use std::path::Path;

use futures::stream::{self, StreamExt};
use image::DynamicImage;
use tracing::debug;

use trapdata_ml::imaging;
use trapdata_models::{DetectedObject, DetectionId, ImageId, SourceImage};

/// Outcome of loading one input.
pub type Loaded = Result<DynamicImage, String>;

fn open(path: &Path) -> Loaded {
    image::open(path).map_err(|e| format!("failed to decode {}: {}", path.display(), e))
}

/// Loads stage inputs with bounded parallelism.
#[derive(Debug, Clone)]
pub struct InputLoader {
    num_workers: usize,
}

impl InputLoader {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    async fn load_all<K, F>(&self, jobs: Vec<(K, F)>) -> Vec<(K, Loaded)>
    where
        K: Ord + Copy + Send + 'static,
        F: FnOnce() -> Loaded + Send + 'static,
    {
        let mut loaded: Vec<(K, Loaded)> = stream::iter(jobs.into_iter().map(|(key, load)| async move {
            let result = match tokio::task::spawn_blocking(load).await {
                Ok(result) => result,
                Err(e) => Err(format!("loader task failed: {}", e)),
            };
            (key, result)
        }))
        .buffer_unordered(self.num_workers)
        .collect()
        .await;

        loaded.sort_by_key(|(key, _)| *key);
        loaded
    }

    /// Decode source images for localization, ascending id.
    pub async fn load_images(&self, images: &[SourceImage]) -> Vec<(ImageId, Loaded)> {
        let jobs = images
            .iter()
            .map(|image| {
                let path = image.path.clone();
                (image.id, move || open(Path::new(&path)))
            })
            .collect();

        let loaded = self.load_all(jobs).await;
        debug!(
            requested = images.len(),
            failed = loaded.iter().filter(|(_, r)| r.is_err()).count(),
            "Loaded source images"
        );
        loaded
    }

    /// Load classifier inputs, ascending detection id.
    ///
    /// Uses the stored crop when it can be read, otherwise crops the box
    /// out of the source image.
    pub async fn load_crops(
        &self,
        detections: &[DetectedObject],
        images: &HashMap<ImageId, SourceImage>,
    ) -> Vec<(DetectionId, Loaded)> {
        let jobs = detections
            .iter()
            .map(|detection| {
                let cropped_path = detection.cropped_path.clone();
                let source_path = images.get(&detection.image_id).map(|i| i.path.clone());
                let bbox = detection.bbox;
                (detection.id, move || {
                    if let Some(crop) = cropped_path.as_deref().and_then(|p| open(Path::new(p)).ok()) {
                        return Ok(crop);
                    }
                    let source_path = source_path.ok_or_else(|| "source image record missing".to_string())?;
                    let source = open(Path::new(&source_path))?;
                    imaging::crop(&source, &bbox)
                        .ok_or_else(|| "bounding box lies outside the source image".to_string())
                })
            })
            .collect();

        let loaded = self.load_all(jobs).await;
        debug!(
            requested = detections.len(),
            failed = loaded.iter().filter(|(_, r)| r.is_err()).count(),
            "Loaded crops"
        );
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::RgbImage;
    use trapdata_models::{BoundingBox, ProcessingStatus, SessionId};

    fn source(dir: &Path, id: i64, name: &str) -> SourceImage {
        SourceImage {
            id: ImageId(id),
            session_id: SessionId(1),
            path: dir.join(name).to_string_lossy().into_owned(),
            captured_at: Utc::now(),
            queued_at: None,
            status: ProcessingStatus::Pending,
            processed_at: None,
            last_error: None,
        }
    }

    fn detection(id: i64, image_id: i64, bbox: BoundingBox) -> DetectedObject {
        DetectedObject {
            id: DetectionId(id),
            image_id: ImageId(image_id),
            bbox,
            detection_score: Some(0.99),
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

    #[tokio::test]
    async fn test_load_images_rejoins_by_id() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(32, 24).save(dir.path().join("a.jpg")).unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"not a jpeg").unwrap();

        let images = vec![
            source(dir.path(), 7, "a.jpg"),
            source(dir.path(), 3, "b.jpg"),
            source(dir.path(), 5, "missing.jpg"),
        ];
        let loaded = InputLoader::new(2).load_images(&images).await;

        let ids: Vec<_> = loaded.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![ImageId(3), ImageId(5), ImageId(7)]);
        assert!(loaded[0].1.is_err());
        assert!(loaded[1].1.is_err());
        assert_eq!(loaded[2].1.as_ref().unwrap().width(), 32);
    }

    #[tokio::test]
    async fn test_load_crops_falls_back_to_source() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(64, 64).save(dir.path().join("src.jpg")).unwrap();
        let image = source(dir.path(), 1, "src.jpg");
        let images = HashMap::from([(image.id, image)]);

        let mut stale = detection(2, 1, BoundingBox::new(10.0, 10.0, 30.0, 20.0));
        stale.cropped_path = Some(dir.path().join("gone.jpg").to_string_lossy().into_owned());
        let outside = detection(1, 1, BoundingBox::new(100.0, 100.0, 120.0, 120.0));

        let loaded = InputLoader::new(1).load_crops(&[stale, outside], &images).await;
        assert_eq!(loaded[0].0, DetectionId(1));
        assert!(loaded[0].1.is_err());
        let crop = loaded[1].1.as_ref().unwrap();
        assert_eq!((crop.width(), crop.height()), (20, 10));
    }
}
