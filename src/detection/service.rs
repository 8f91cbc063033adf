//! Backend for the local object-detection model service.
//!
//! Wire contract:
//!   `GET  {base}/`                 -> `{"status": "healthy", ...}`
//!   `POST {base}/analyze`          `{"photoUrl"}`  -> `{"items": [...], "photosAnalyzed": 1}`
//!   `POST {base}/analyze-multiple` `{"photoUrls"}` -> `{"items": [...], "photosAnalyzed": n}`

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use super::{send_json, DetectionBackend, DetectionFuture};
use crate::errors::DetectionError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    photo_url: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeMultipleRequest<'a> {
    photo_urls: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisResponse {
    items: Vec<Value>,
    #[serde(default)]
    #[allow(dead_code)]
    photos_analyzed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: Option<String>,
}

/// Port the detection model service listens on out of the box.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8001";

/// Talks to the detection model service over its JSON API.
pub struct DetectionServiceBackend {
    client: reqwest::Client,
    base_url: String,
    batch: bool,
}

impl DetectionServiceBackend {
    /// `batch` enables the `/analyze-multiple` endpoint for multi-photo
    /// requests.
    pub fn new(base_url: impl Into<String>, batch: bool) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            batch,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl DetectionBackend for DetectionServiceBackend {
    fn name(&self) -> &'static str {
        "detection-service"
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }

    fn probe_health(&self, timeout: Duration) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            let url = self.url("/");
            match send_json::<HealthResponse>(self.client.get(&url), &url, timeout).await {
                Ok(body) => body.status.as_deref() == Some("healthy"),
                Err(e) => {
                    debug!(url = %url, error = %e, "Detection service health probe failed");
                    false
                }
            }
        })
    }

    fn analyze(&self, photo_url: &str, timeout: Duration) -> DetectionFuture<'_, Vec<Value>> {
        let photo_url = photo_url.to_string();
        Box::pin(async move {
            let url = self.url("/analyze");
            let request = self.client.post(&url).json(&AnalyzeRequest {
                photo_url: &photo_url,
            });
            let response: AnalysisResponse = send_json(request, &url, timeout).await?;
            Ok(response.items)
        })
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    fn analyze_batch<'a>(
        &'a self,
        photo_urls: &'a [String],
        timeout: Duration,
    ) -> DetectionFuture<'a, Vec<Value>> {
        Box::pin(async move {
            if !self.batch {
                return Err(DetectionError::ServiceError {
                    status: 0,
                    message: "batch analysis is disabled".to_string(),
                });
            }
            let url = self.url("/analyze-multiple");
            let request = self
                .client
                .post(&url)
                .json(&AnalyzeMultipleRequest { photo_urls });
            let response: AnalysisResponse = send_json(request, &url, timeout).await?;
            Ok(response.items)
        })
    }
}
