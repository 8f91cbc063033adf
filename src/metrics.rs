//! Prometheus metrics for Tote Master.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides the HTTP RED middleware and the
//! `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "totemaster_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "totemaster_http_request_duration_seconds";

/// Photos written to object storage (counter).
pub const PHOTOS_STORED_TOTAL: &str = "totemaster_photos_stored_total";

/// Photos removed from a tote (counter). Labels: storage (`deleted` | `failed`).
pub const PHOTOS_DELETED_TOTAL: &str = "totemaster_photos_deleted_total";

/// Tote analyses run (counter). Labels: outcome.
pub const ANALYSES_TOTAL: &str = "totemaster_analyses_total";

/// Calls to the detection backend (counter). Labels: backend, kind, outcome.
pub const DETECTION_REQUESTS_TOTAL: &str = "totemaster_detection_requests_total";

/// 1 when AI analysis is enabled and the last health probe passed (gauge).
pub const AI_AVAILABLE: &str = "totemaster_ai_available";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent, so tests may
/// call it repeatedly. Returns the global render handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            warn!("A global metrics recorder is already installed; /metrics will be empty");
        }
        handle
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(PHOTOS_STORED_TOTAL, "Photos written to object storage");
    describe_counter!(PHOTOS_DELETED_TOTAL, "Photos removed from totes");
    describe_counter!(ANALYSES_TOTAL, "Tote analyses by outcome");
    describe_counter!(
        DETECTION_REQUESTS_TOTAL,
        "Detection backend calls by backend, kind and outcome"
    );
    describe_gauge!(AI_AVAILABLE, "Whether AI photo analysis is currently available");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// `/metrics` itself is not instrumented.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Map a request path to its route template so tote ids and object keys
/// never become label values.
///
/// - `/api/totes/42/photos` -> `/api/totes/{id}/photos`
/// - `/api/totes/42/analyze` -> `/api/totes/{id}/analyze`
/// - `/uploads/totes/42/a.jpg` -> `/uploads/{key}`
fn normalize_path(path: &str) -> String {
    match path {
        "/" | "/health" | "/metrics" | "/openapi.json" => return path.to_string(),
        _ => {}
    }
    if path.starts_with("/uploads/") {
        return "/uploads/{key}".to_string();
    }
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        ["api", "totes", _, action @ ("photos" | "analyze")] => {
            format!("/api/totes/{{id}}/{action}")
        }
        _ => "/{other}".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics`: render Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// -- Tests --------------------------------------------------------------------
