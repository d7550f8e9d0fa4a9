//! Adapters backed by the inference service.

use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::adapter::{check_result_count, Classifier, Localizer};
use crate::client::{EncodedImage, InferenceClient};
use crate::error::MlResult;
use crate::imaging::encode_jpeg_base64;
use crate::types::{
    ClassificationInput, ClassificationResult, Device, LocalizationInput, LocalizationResult,
};

/// Encode every input. Inputs that fail to encode get a failure reason in
/// their slot and are left out of the request.
fn encode_batch<'a>(
    inputs: impl Iterator<Item = (i64, &'a DynamicImage)>,
    quality: u8,
) -> (Vec<EncodedImage>, Vec<Option<String>>) {
    let mut payload = Vec::new();
    let mut failures = Vec::new();

    for (id, image) in inputs {
        match encode_jpeg_base64(image, quality) {
            Ok(data) => {
                payload.push(EncodedImage { id, data });
                failures.push(None);
            }
            Err(e) => {
                warn!(id, error = %e, "Failed to encode image for inference");
                failures.push(Some(format!("encode failed: {}", e)));
            }
        }
    }

    (payload, failures)
}

/// Merge service results back into input order.
fn merge<T, R: Into<T>>(
    failures: Vec<Option<String>>,
    results: Vec<R>,
    failed: impl Fn(String) -> T,
) -> Vec<T> {
    let mut results = results.into_iter();
    failures
        .into_iter()
        .map(|failure| match failure {
            Some(reason) => failed(reason),
            None => match results.next() {
                Some(result) => result.into(),
                None => failed("no result returned".to_string()),
            },
        })
        .collect()
}

/// Localizer hosted by the inference service.
pub struct RemoteLocalizer {
    client: Arc<InferenceClient>,
    model: String,
    device: Device,
    loaded: OnceCell<()>,
}

impl RemoteLocalizer {
    pub fn new(client: Arc<InferenceClient>, model: impl Into<String>, device: Device) -> Self {
        Self {
            client,
            model: model.into(),
            device,
            loaded: OnceCell::new(),
        }
    }
}

#[async_trait]
impl Localizer for RemoteLocalizer {
    fn name(&self) -> &str {
        &self.model
    }

    async fn prepare(&self) -> MlResult<()> {
        self.loaded
            .get_or_try_init(|| self.client.load_model(&self.model, self.device))
            .await?;
        Ok(())
    }

    async fn run_batch(&self, inputs: &[LocalizationInput]) -> MlResult<Vec<LocalizationResult>> {
        let (payload, failures) = encode_batch(
            inputs.iter().map(|i| (i.image_id.get(), &i.image)),
            self.client.config().jpeg_quality,
        );

        let items = if payload.is_empty() {
            Vec::new()
        } else {
            let items = self.client.detect(&self.model, &payload).await?;
            check_result_count(payload.len(), items.len())?;
            items
        };

        Ok(merge(failures, items, LocalizationResult::Failed))
    }
}

/// Classifier hosted by the inference service.
pub struct RemoteClassifier {
    client: Arc<InferenceClient>,
    model: String,
    device: Device,
    loaded: OnceCell<()>,
}

impl RemoteClassifier {
    pub fn new(client: Arc<InferenceClient>, model: impl Into<String>, device: Device) -> Self {
        Self {
            client,
            model: model.into(),
            device,
            loaded: OnceCell::new(),
        }
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    fn name(&self) -> &str {
        &self.model
    }

    async fn prepare(&self) -> MlResult<()> {
        self.loaded
            .get_or_try_init(|| self.client.load_model(&self.model, self.device))
            .await?;
        Ok(())
    }

    async fn run_batch(
        &self,
        inputs: &[ClassificationInput],
    ) -> MlResult<Vec<ClassificationResult>> {
        let (payload, failures) = encode_batch(
            inputs.iter().map(|i| (i.detection_id.get(), &i.image)),
            self.client.config().jpeg_quality,
        );

        let items = if payload.is_empty() {
            Vec::new()
        } else {
            let items = self.client.classify(&self.model, &payload).await?;
            check_result_count(payload.len(), items.len())?;
            items
        };

        Ok(merge(failures, items, ClassificationResult::Failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InferenceClientConfig;
    use crate::error::MlError;
    use crate::retry::RetryConfig;
    use image::RgbImage;
    use trapdata_models::{DetectionId, ImageId};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> Arc<InferenceClient> {
        Arc::new(
            InferenceClient::new(InferenceClientConfig {
                retry: RetryConfig::none(),
                ..InferenceClientConfig::with_base_url(server.uri())
            })
            .unwrap(),
        )
    }

    fn image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(16, 16))
    }

    #[tokio::test]
    async fn test_prepare_loads_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/detector/load"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let localizer = RemoteLocalizer::new(client_for(&server), "detector", Device::Cpu);
        localizer.prepare().await.unwrap();
        localizer.prepare().await.unwrap();
    }

    #[tokio::test]
    async fn test_prepare_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/species/load"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let classifier = RemoteClassifier::new(client_for(&server), "species", Device::Cpu);
        assert!(matches!(
            classifier.prepare().await,
            Err(MlError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_localizer_keeps_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/detector/detect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"boxes": []},
                    {"boxes": [{"x1": 0.0, "y1": 0.0, "x2": 4.0, "y2": 4.0, "score": 0.99}]}
                ]
            })))
            .mount(&server)
            .await;

        let localizer = RemoteLocalizer::new(client_for(&server), "detector", Device::Cpu);
        let inputs = vec![
            LocalizationInput {
                image_id: ImageId(1),
                image: image(),
            },
            LocalizationInput {
                image_id: ImageId(2),
                image: image(),
            },
        ];
        let results = localizer.run_batch(&inputs).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], LocalizationResult::nothing_detected());
        assert!(matches!(&results[1], LocalizationResult::Boxes(b) if b.len() == 1));
    }

    #[tokio::test]
    async fn test_short_response_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/binary/classify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{"label": "moth", "score": 0.9}]
            })))
            .mount(&server)
            .await;

        let classifier = RemoteClassifier::new(client_for(&server), "binary", Device::Cpu);
        let inputs: Vec<_> = (1..=2)
            .map(|id| ClassificationInput {
                detection_id: DetectionId(id),
                image: image(),
            })
            .collect();

        let err = classifier.run_batch(&inputs).await.unwrap_err();
        assert!(matches!(
            err,
            MlError::ResultCountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_merge_fills_failed_slots() {
        let merged: Vec<ClassificationResult> = merge(
            vec![None, Some("encode failed".to_string()), None],
            vec![
                ClassificationResult::label("moth", 0.9),
                ClassificationResult::label("nonmoth", 0.8),
            ],
            ClassificationResult::Failed,
        );
        assert_eq!(merged[0], ClassificationResult::label("moth", 0.9));
        assert_eq!(merged[1], ClassificationResult::failed("encode failed"));
        assert_eq!(merged[2], ClassificationResult::label("nonmoth", 0.8));
    }
}
