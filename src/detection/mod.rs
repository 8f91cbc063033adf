//! AI photo analysis.
//!
//! A [`client::DetectionClient`] tracks whether the external detection
//! service is usable and turns photo URLs into [`types::DetectedItem`]s.
//! The wire protocol of each kind of service lives behind the
//! [`DetectionBackend`] trait:
//!
//! - [`service::DetectionServiceBackend`]: a local object-detection model
//!   served over HTTP (`GET /`, `POST /analyze`, `POST /analyze-multiple`).
//! - [`vision::VisionModelBackend`]: a remote OpenAI-compatible chat API
//!   with image input.
//!
//! Backends return raw JSON detections; [`normalize`] turns them into
//! candidates so the client sees a single shape.

pub mod categories;
pub mod client;
pub mod normalize;
pub mod service;
pub mod types;
pub mod vision;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::errors::DetectionError;

pub use client::{DetectionClient, HealthMonitorHandle};
pub use types::{Condition, Confidence, DetectedItem};

/// Boxed future returned by [`DetectionBackend`] analysis methods.
pub type DetectionFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, DetectionError>> + Send + 'a>>;

/// Wire protocol of one kind of detection service.
pub trait DetectionBackend: Send + Sync + 'static {
    /// Short backend name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Base URL the backend talks to.
    fn endpoint(&self) -> &str;

    /// One health probe.  `true` means the service answered as healthy.
    fn probe_health(&self, timeout: Duration) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    /// Raw detections for one photo.
    fn analyze(&self, photo_url: &str, timeout: Duration) -> DetectionFuture<'_, Vec<Value>>;

    /// Whether [`DetectionBackend::analyze_batch`] is usable.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Raw detections for several photos in a single request.  Each raw
    /// detection should name its `sourcePhoto`.
    fn analyze_batch<'a>(
        &'a self,
        photo_urls: &'a [String],
        timeout: Duration,
    ) -> DetectionFuture<'a, Vec<Value>> {
        let _ = (photo_urls, timeout);
        Box::pin(async move {
            Err(DetectionError::ServiceError {
                status: 0,
                message: format!("{} backend does not support batch analysis", self.name()),
            })
        })
    }
}

/// Send a prepared request and decode a JSON body, classifying failures.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    url: &str,
    timeout: Duration,
) -> Result<T, DetectionError> {
    let timeout_secs = timeout.as_secs();
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| DetectionError::from_transport(e, url, timeout_secs))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DetectionError::from_status(
            status.as_u16(),
            error_message(&body, status.canonical_reason().unwrap_or("error")),
        ));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| DetectionError::from_transport(e, url, timeout_secs))?;
    serde_json::from_slice(&bytes).map_err(|e| DetectionError::MalformedResponse(e.to_string()))
}

/// Pull a human-readable message out of an error body (`detail`,
/// `error.message`, `message`), falling back to the raw text.
fn error_message(body: &str, fallback: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let candidates = [
            json.get("detail"),
            json.get("error").and_then(|e| e.get("message")),
            json.get("message"),
            json.get("error"),
        ];
        if let Some(text) = candidates.into_iter().flatten().find_map(Value::as_str) {
            return text.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"detail":"Failed to download image"}"#, "Bad Request"),
            "Failed to download image"
        );
        assert_eq!(
            error_message(r#"{"error":{"message":"invalid image url"}}"#, "Bad Request"),
            "invalid image url"
        );
        assert_eq!(error_message("plain text", "Bad Request"), "plain text");
        assert_eq!(error_message("", "Bad Request"), "Bad Request");
    }
}
