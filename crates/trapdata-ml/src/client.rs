//! HTTP client for the inference service.
//!
//! The service hosts the localization and classification models. Models are
//! addressed by name:
//! - `POST /models/{name}/load` with the requested device
//! - `POST /models/{name}/detect` with base64 JPEG images, one result per image
//! - `POST /models/{name}/classify` with base64 JPEG crops, one result per crop

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MlError, MlResult};
use crate::imaging::DEFAULT_JPEG_QUALITY;
use crate::retry::{with_retry, RetryConfig};
use crate::types::{ClassificationResult, Device, LocalizationResult, ScoredBox};

use trapdata_models::BoundingBox;

/// Inference service client configuration.
#[derive(Debug, Clone)]
pub struct InferenceClientConfig {
    /// Service base URL
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// JPEG quality for uploaded images
    pub jpeg_quality: u8,
    /// Retry configuration
    pub retry: RetryConfig,
}

impl Default for InferenceClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(5),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            retry: RetryConfig::default(),
        }
    }
}

impl InferenceClientConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("TRAPDATA_INFERENCE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            timeout: Duration::from_secs(
                std::env::var("TRAPDATA_INFERENCE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            connect_timeout: Duration::from_secs(5),
            jpeg_quality: std::env::var("TRAPDATA_INFERENCE_JPEG_QUALITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_JPEG_QUALITY),
            retry: RetryConfig::from_env(),
        }
    }
}

/// One image in a batch request.
#[derive(Debug, Clone, Serialize)]
pub struct EncodedImage {
    /// Record id, echoed for service-side logging
    pub id: i64,
    /// Base64 JPEG
    pub data: String,
}

#[derive(Debug, Serialize)]
struct LoadRequest<'a> {
    device: &'a str,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    images: &'a [EncodedImage],
}

#[derive(Debug, Deserialize)]
struct BatchResponse<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct WireBox {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    #[serde(default)]
    score: Option<f64>,
}

/// Detection result for one image.
#[derive(Debug, Deserialize)]
pub struct DetectItem {
    #[serde(default)]
    boxes: Vec<WireBox>,
    #[serde(default)]
    error: Option<String>,
}

impl From<DetectItem> for LocalizationResult {
    fn from(item: DetectItem) -> Self {
        if let Some(error) = item.error {
            return LocalizationResult::Failed(error);
        }
        LocalizationResult::Boxes(
            item.boxes
                .into_iter()
                .map(|b| ScoredBox {
                    bbox: BoundingBox::new(b.x1, b.y1, b.x2, b.y2),
                    score: b.score,
                })
                .collect(),
        )
    }
}

/// Classification result for one crop.
#[derive(Debug, Deserialize)]
pub struct ClassifyItem {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

impl From<ClassifyItem> for ClassificationResult {
    fn from(item: ClassifyItem) -> Self {
        match (item.error, item.label, item.score) {
            (Some(error), _, _) => ClassificationResult::Failed(error),
            (None, Some(label), Some(score)) => ClassificationResult::Label { label, score },
            (None, _, _) => ClassificationResult::failed("response missing label or score"),
        }
    }
}

/// Inference service client.
#[derive(Clone)]
pub struct InferenceClient {
    http: Client,
    config: InferenceClientConfig,
}

impl InferenceClient {
    pub fn new(config: InferenceClientConfig) -> MlResult<Self> {
        if config.base_url.is_empty() {
            return Err(MlError::config("inference service URL cannot be empty"));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("trapdata-ml/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(MlError::Network)?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> MlResult<Self> {
        Self::new(InferenceClientConfig::from_env())
    }

    pub fn config(&self) -> &InferenceClientConfig {
        &self.config
    }

    fn model_url(&self, model: &str, action: &str) -> String {
        format!(
            "{}/models/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            model,
            action
        )
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder, url: String) -> MlResult<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MlError::from_http_status(
                status.as_u16(),
                format!("{} failed: {}", url, body),
            ));
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| MlError::invalid_response(format!("{}: {}", url, e)))
    }

    /// Ask the service to load a model on the requested device.
    pub async fn load_model(&self, model: &str, device: Device) -> MlResult<()> {
        let url = self.model_url(model, "load");
        info!(model, %device, "Loading model");

        with_retry(&self.config.retry, "load_model", || {
            let request = self
                .http
                .post(&url)
                .json(&LoadRequest { device: device.as_str() });
            let url = url.clone();
            async move {
                let _: serde_json::Value = Self::send(request, url).await?;
                Ok(())
            }
        })
        .await
    }

    /// Run the localizer on a batch of images.
    pub async fn detect(&self, model: &str, images: &[EncodedImage]) -> MlResult<Vec<DetectItem>> {
        let url = self.model_url(model, "detect");
        debug!(model, batch = images.len(), "Sending detect request");

        let response: BatchResponse<DetectItem> =
            with_retry(&self.config.retry, "detect", || {
                let request = self.http.post(&url).json(&BatchRequest { images });
                Self::send(request, url.clone())
            })
            .await?;
        Ok(response.results)
    }

    /// Run a classifier on a batch of crops.
    pub async fn classify(
        &self,
        model: &str,
        images: &[EncodedImage],
    ) -> MlResult<Vec<ClassifyItem>> {
        let url = self.model_url(model, "classify");
        debug!(model, batch = images.len(), "Sending classify request");

        let response: BatchResponse<ClassifyItem> =
            with_retry(&self.config.retry, "classify", || {
                let request = self.http.post(&url).json(&BatchRequest { images });
                Self::send(request, url.clone())
            })
            .await?;
        Ok(response.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> InferenceClient {
        InferenceClient::new(InferenceClientConfig {
            retry: RetryConfig::none(),
            ..InferenceClientConfig::with_base_url(server.uri())
        })
        .unwrap()
    }

    fn images(n: i64) -> Vec<EncodedImage> {
        (1..=n)
            .map(|id| EncodedImage {
                id,
                data: "aGVsbG8=".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let result = InferenceClient::new(InferenceClientConfig::with_base_url(""));
        assert!(matches!(result, Err(MlError::Config(_))));
    }

    #[tokio::test]
    async fn test_load_model_sends_device() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/moth_nonmoth/load"))
            .and(body_partial_json(serde_json::json!({"device": "cpu"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .load_model("moth_nonmoth", Device::Cpu)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_model_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/missing/load"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no weights"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .load_model("missing", Device::Accelerated)
            .await
            .unwrap_err();
        assert!(matches!(err, MlError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_detect_maps_boxes_and_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/detector/detect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"boxes": [{"x1": 1.0, "y1": 2.0, "x2": 30.0, "y2": 40.0, "score": 0.995}]},
                    {"boxes": []},
                    {"error": "corrupt image"}
                ]
            })))
            .mount(&server)
            .await;

        let results: Vec<LocalizationResult> = client_for(&server)
            .detect("detector", &images(3))
            .await
            .unwrap()
            .into_iter()
            .map(Into::into)
            .collect();

        assert_eq!(
            results[0],
            LocalizationResult::Boxes(vec![ScoredBox {
                bbox: BoundingBox::new(1.0, 2.0, 30.0, 40.0),
                score: Some(0.995),
            }])
        );
        assert_eq!(results[1], LocalizationResult::nothing_detected());
        assert_eq!(results[2], LocalizationResult::failed("corrupt image"));
    }

    #[tokio::test]
    async fn test_classify_missing_label_is_item_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/species/classify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"label": "Actias luna", "score": 0.8},
                    {"score": 0.1}
                ]
            })))
            .mount(&server)
            .await;

        let results: Vec<ClassificationResult> = client_for(&server)
            .classify("species", &images(2))
            .await
            .unwrap()
            .into_iter()
            .map(Into::into)
            .collect();

        assert_eq!(results[0], ClassificationResult::label("Actias luna", 0.8));
        assert!(matches!(results[1], ClassificationResult::Failed(_)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/detector/detect"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .detect("detector", &images(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MlError::InvalidResponse(_)));
    }
}
