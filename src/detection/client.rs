//! Detection client: availability tracking and photo analysis.
//!
//! Availability is `feature flag && last health probe succeeded`.  Probes
//! run on a background task started by
//! [`DetectionClient::spawn_health_monitor`]; request paths only read the
//! cached flag and never wait for a probe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::try_join_all;
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::normalize::normalize_detections;
use super::service::DetectionServiceBackend;
use super::types::DetectedItem;
use super::vision::VisionModelBackend;
use super::DetectionBackend;
use crate::config::{AiConfig, AiProvider};
use crate::errors::DetectionError;
use crate::metrics::{AI_AVAILABLE, DETECTION_REQUESTS_TOTAL};

/// Client for the external detection service.
pub struct DetectionClient {
    enabled: bool,
    healthy: AtomicBool,
    backend: Arc<dyn DetectionBackend>,
    single_timeout: Duration,
    batch_timeout: Duration,
    health_interval: Duration,
    health_timeout: Duration,
}

impl DetectionClient {
    /// Wrap an explicit backend.  Health starts out unknown (unavailable).
    pub fn new(config: &AiConfig, backend: Arc<dyn DetectionBackend>) -> Self {
        Self {
            enabled: config.enabled,
            healthy: AtomicBool::new(false),
            backend,
            single_timeout: config.single_timeout(),
            batch_timeout: config.batch_timeout(),
            health_interval: config.health_check_interval(),
            health_timeout: config.health_check_timeout(),
        }
    }

    /// Build the backend named by `config.provider`.
    pub fn from_config(config: &AiConfig) -> anyhow::Result<Self> {
        let backend: Arc<dyn DetectionBackend> = match config.provider {
            AiProvider::DetectionService => Arc::new(DetectionServiceBackend::new(
                config.base_url(),
                config.batch_requests,
            )?),
            AiProvider::VisionModel => {
                let api_key = match (&config.api_key, config.enabled) {
                    (Some(key), _) => key.clone(),
                    // Disabled: never used, so a missing key is not an error.
                    (None, false) => String::from("unused"),
                    (None, true) => {
                        anyhow::bail!("ai.api_key is required for the vision-model provider")
                    }
                };
                Arc::new(VisionModelBackend::new(
                    config.base_url(),
                    api_key,
                    config.model.clone(),
                )?)
            }
        };
        Ok(Self::new(config, backend))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True only when the feature is enabled and the latest probe passed.
    pub fn is_available(&self) -> bool {
        self.enabled && self.healthy.load(Ordering::Relaxed)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Base URL of the configured backend.
    pub fn endpoint(&self) -> &str {
        self.backend.endpoint()
    }

    /// Probe the service once and record the result.
    pub async fn check_health(&self) -> bool {
        let healthy = self.backend.probe_health(self.health_timeout).await;
        let was_healthy = self.healthy.swap(healthy, Ordering::Relaxed);

        if healthy && !was_healthy {
            info!(backend = self.backend.name(), endpoint = %self.backend.endpoint(), "Detection service is available");
        } else if !healthy && was_healthy {
            warn!(backend = self.backend.name(), endpoint = %self.backend.endpoint(), "Detection service became unavailable");
        } else {
            debug!(backend = self.backend.name(), healthy, "Detection service health probe");
        }
        gauge!(AI_AVAILABLE).set(if self.is_available() { 1.0 } else { 0.0 });
        healthy
    }

    /// Start periodic health probing: once immediately, then every
    /// `ai.health_check_interval_secs`.
    ///
    /// The task holds only a weak reference and exits once the client is
    /// dropped.  Nothing is spawned while the feature is disabled.
    pub fn spawn_health_monitor(self: &Arc<Self>) -> HealthMonitorHandle {
        if !self.enabled {
            info!("AI photo analysis disabled; health monitor not started");
            return HealthMonitorHandle { task: None };
        }

        let client: Weak<Self> = Arc::downgrade(self);
        let period = self.health_interval;
        info!(
            backend = self.backend.name(),
            endpoint = %self.backend.endpoint(),
            interval = ?period,
            "Starting detection health monitor"
        );

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(client) = client.upgrade() else {
                    break;
                };
                client.check_health().await;
            }
        });
        HealthMonitorHandle { task: Some(task) }
    }

    /// Analyze one photo.
    ///
    /// Fails with [`DetectionError::FeatureUnavailable`] without touching
    /// the network when the service is not available.
    pub async fn analyze_single_photo(
        &self,
        photo_url: &str,
    ) -> Result<Vec<DetectedItem>, DetectionError> {
        self.ensure_available()?;
        let result = self.analyze_one(photo_url).await;
        record_outcome(self.backend.name(), "single", &result);
        result
    }

    /// Analyze several photos and concatenate the candidates in input
    /// order.  Duplicates are left for consolidation.
    ///
    /// One request per photo is dispatched concurrently; the first failure
    /// fails the whole call.  Backends with native batching get a single
    /// request instead.
    pub async fn analyze_multiple_photos(
        &self,
        photo_urls: &[String],
    ) -> Result<Vec<DetectedItem>, DetectionError> {
        if photo_urls.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_available()?;

        let result = if self.backend.supports_batch() && photo_urls.len() > 1 {
            self.analyze_batch(photo_urls).await
        } else {
            self.analyze_each(photo_urls).await
        };
        record_outcome(self.backend.name(), "multiple", &result);
        result
    }

    fn ensure_available(&self) -> Result<(), DetectionError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(DetectionError::FeatureUnavailable)
        }
    }

    async fn analyze_one(&self, photo_url: &str) -> Result<Vec<DetectedItem>, DetectionError> {
        debug!(photo_url = %photo_url, "Analyzing photo");
        let raw = self.backend.analyze(photo_url, self.single_timeout).await?;
        Ok(normalize_detections(&raw, photo_url))
    }

    async fn analyze_each(&self, photo_urls: &[String]) -> Result<Vec<DetectedItem>, DetectionError> {
        let calls = photo_urls.iter().map(|url| self.analyze_one(url));
        let per_photo = tokio::time::timeout(self.batch_timeout, try_join_all(calls))
            .await
            .map_err(|_| DetectionError::ServiceTimeout {
                timeout_secs: self.batch_timeout.as_secs(),
            })??;
        Ok(per_photo.into_iter().flatten().collect())
    }

    async fn analyze_batch(&self, photo_urls: &[String]) -> Result<Vec<DetectedItem>, DetectionError> {
        let raw = self
            .backend
            .analyze_batch(photo_urls, self.batch_timeout)
            .await?;
        // Items that do not name their photo are attributed to the first one.
        Ok(normalize_detections(&raw, &photo_urls[0]))
    }
}

fn record_outcome<T>(backend: &'static str, kind: &'static str, result: &Result<T, DetectionError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(DetectionError::FeatureUnavailable) => "unavailable",
        Err(DetectionError::ServiceTimeout { .. }) => "timeout",
        Err(DetectionError::ServiceUnreachable { .. }) => "unreachable",
        Err(DetectionError::InvalidInput { .. }) => "invalid_input",
        Err(_) => "error",
    };
    counter!(DETECTION_REQUESTS_TOTAL, "backend" => backend, "kind" => kind, "outcome" => outcome)
        .increment(1);
}

/// Owns the background health probe task; dropping it stops probing.
pub struct HealthMonitorHandle {
    task: Option<JoinHandle<()>>,
}

impl HealthMonitorHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for HealthMonitorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
