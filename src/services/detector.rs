use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::label::DetectorLabel;

/// How the image reaches the detector.
#[derive(Debug, Clone, Copy)]
pub enum ImageSource<'a> {
    /// Raw bytes, used by local mode.
    Bytes(&'a [u8]),
    /// An object the detector reads from shared storage.
    Stored { store_ref: &'a str, key: &'a str },
}

/// Black-box object detection.
#[async_trait]
pub trait LabelDetector: Send + Sync {
    async fn detect(
        &self,
        image: ImageSource<'_>,
        max_labels: i32,
        min_confidence: f64,
    ) -> Result<Vec<DetectorLabel>, DetectorError>;
}

/// Client for an HTTP label-detection endpoint.
pub struct HttpLabelDetector {
    http: Client,
    endpoint: String,
    api_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum ImagePayload<'a> {
    Bytes(String),
    S3Object { bucket: &'a str, name: &'a str },
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    image: ImagePayload<'a>,
    max_labels: i32,
    min_confidence: f64,
}

#[derive(Deserialize)]
struct DetectResponse {
    labels: Vec<DetectorLabel>,
}

impl HttpLabelDetector {
    pub fn new(
        endpoint: String,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DetectorError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DetectorError::Unavailable)?;
        Ok(Self {
            http,
            endpoint,
            api_token,
        })
    }
}

#[async_trait]
impl LabelDetector for HttpLabelDetector {
    async fn detect(
        &self,
        image: ImageSource<'_>,
        max_labels: i32,
        min_confidence: f64,
    ) -> Result<Vec<DetectorLabel>, DetectorError> {
        let image = match image {
            ImageSource::Bytes(bytes) => {
                ImagePayload::Bytes(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            ImageSource::Stored { store_ref, key } => ImagePayload::S3Object {
                bucket: store_ref,
                name: key,
            },
        };
        let body = DetectRequest {
            image,
            max_labels,
            min_confidence,
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(DetectorError::Unavailable)?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(DetectorError::Status(status.as_u16()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DetectorError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: DetectResponse = response
            .json()
            .await
            .map_err(|e| DetectorError::InvalidResponse(e.to_string()))?;
        Ok(parsed.labels)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("Detection service unavailable: {0}")]
    Unavailable(#[from] reqwest::Error),

    #[error("Detection service returned status {0}")]
    Status(u16),

    #[error("Detection service rejected the image ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Detection service response could not be parsed: {0}")]
    InvalidResponse(String),

    #[error("Detection timed out")]
    Timeout,
}

impl DetectorError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DetectorError::Unavailable(_) | DetectorError::Status(_) | DetectorError::Timeout
        )
    }
}
