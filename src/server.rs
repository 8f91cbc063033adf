//! Axum router construction.
//!
//! The [`app`] function wires the photo API, public object serving and the
//! operational endpoints, and returns a ready-to-serve [`axum::Router`].

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};

use crate::errors::generate_request_id;
use crate::handlers::{photos, uploads};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Response header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Room for multipart framing on top of the file payloads.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

// -- OpenAPI specification ----------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tote Master Photo API",
        version = "0.1.0",
        description = "Photo storage and AI item detection for storage totes"
    ),
    paths(
        health_check,
        photos::upload_photos,
        photos::delete_photo,
        photos::analyze_photos,
        uploads::get_upload,
    ),
    components(schemas(
        HealthResponse,
        AiHealth,
        photos::UploadPhotosForm,
        photos::UploadPhotosResponse,
        photos::DeletePhotoRequest,
        photos::DeletePhotoResponse,
        crate::pipeline::AnalysisOutcome,
        crate::detection::DetectedItem,
        crate::detection::Condition,
        crate::detection::Confidence,
        crate::totes::Tote,
    )),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Photos", description = "Tote photo management and analysis"),
        (name = "Uploads", description = "Stored photo bytes"),
    )
)]
pub struct ApiDoc;

/// Build the axum [`Router`] with every route.
pub fn app(state: Arc<AppState>) -> Router {
    let server = &state.config.server;
    let body_limit = server
        .max_files_per_upload
        .saturating_mul(usize::try_from(server.max_file_size).unwrap_or(usize::MAX))
        .saturating_add(MULTIPART_OVERHEAD);

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/openapi.json", get(openapi_json))
        .route(
            "/api/totes/:id/photos",
            post(photos::upload_photos).delete(photos::delete_photo),
        )
        .route("/api/totes/:id/analyze", post(photos::analyze_photos))
        .route("/uploads/*key", get(uploads::get_upload));
    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    let router = router
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(middleware::from_fn(common_headers_middleware));

    if state.config.observability.metrics {
        // Outermost, so the full request lifecycle is timed.
        router.layer(middleware::from_fn(metrics_middleware))
    } else {
        router
    }
}

// -- Common headers middleware -----------------------------------------------

/// Adds to every response:
/// - `x-request-id`: echoed from the request, or a fresh 16-char hex id
/// - `Date`: RFC 7231 formatted timestamp
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .cloned();

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    let request_id = request_id
        .or_else(|| HeaderValue::from_str(&generate_request_id()).ok());
    if let Some(id) = request_id {
        headers.insert(REQUEST_ID_HEADER, id);
    }
    if let Ok(date) = HeaderValue::from_str(&httpdate::fmt_http_date(std::time::SystemTime::now())) {
        headers.insert("date", date);
    }

    response
}

// -- Health and docs ----------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub storage: &'static str,
    pub ai: AiHealth,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AiHealth {
    pub enabled: bool,
    pub available: bool,
    pub backend: &'static str,
}

/// `GET /health`: liveness plus AI availability.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let detector = state.pipeline.detector();
    Json(HealthResponse {
        status: "ok",
        storage: state.pipeline.store().backend_name(),
        ai: AiHealth {
            enabled: detector.is_enabled(),
            available: detector.is_available(),
            backend: detector.backend_name(),
        },
    })
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::detection::client::tests::{available_client, FakeBackend};
    use crate::detection::DetectionClient;
    use crate::pipeline::PhotoPipeline;
    use crate::storage::memory::MemoryObjectStore;
    use crate::totes::{MemoryToteRepository, Tote};
    use axum::body::Body;
    use axum::http::StatusCode;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const BASE: &str = "http://localhost:3001/uploads";
    const BOUNDARY: &str = "----totemaster-test-boundary";

    struct Harness {
        app: Router,
        store: Arc<MemoryObjectStore>,
        backend: Arc<FakeBackend>,
    }

    async fn harness_with(config: Config, detector_available: bool) -> Harness {
        let store = Arc::new(MemoryObjectStore::new(BASE));
        let backend = FakeBackend::healthy();
        let detector = if detector_available {
            available_client(backend.clone()).await
        } else {
            Arc::new(DetectionClient::new(&config.ai, backend.clone()))
        };
        let totes = Arc::new(MemoryToteRepository::new());
        totes
            .insert(Tote {
                id: "t1".into(),
                user_id: "alice".into(),
                name: "Garage shelf".into(),
                photos: vec![],
            })
            .unwrap();
        let pipeline = PhotoPipeline::new(store.clone(), detector, totes);
        let state = Arc::new(AppState { config, pipeline });
        Harness {
            app: app(state),
            store,
            backend,
        }
    }

    async fn harness() -> Harness {
        harness_with(Config::default(), true).await
    }

    fn multipart_body(files: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, content_type, data) in files {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"photos\"; filename=\"{name}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(user: Option<&str>, files: &[(&str, &str, &[u8])]) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/totes/t1/photos")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        builder.body(Body::from(multipart_body(files))).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_ai_state() {
        let h = harness_with(Config::default(), false).await;
        let response = h
            .app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["storage"], "memory");
        assert_eq!(body["ai"]["enabled"], false);
        assert_eq!(body["ai"]["available"], false);
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let h = harness().await;
        let response = h
            .app
            .oneshot(
                Request::get("/health")
                    .header(REQUEST_ID_HEADER, "abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "abc123");
    }

    #[tokio::test]
    async fn test_upload_then_serve() {
        let h = harness().await;
        let response = h
            .app
            .clone()
            .oneshot(upload_request(
                Some("alice"),
                &[("bin.png", "image/png", &b"\x89PNG fake"[..])],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let url = body["photos"][0].as_str().unwrap().to_string();
        assert!(url.starts_with(BASE));
        assert_eq!(h.store.len().await, 1);

        let path = url.trim_start_matches("http://localhost:3001");
        let response = h
            .app
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/png");
        assert!(response.headers().contains_key("last-modified"));
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert!(response.headers()["content-security-policy"]
            .to_str()
            .unwrap()
            .starts_with("sandbox"));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"\x89PNG fake");
    }

    #[tokio::test]
    async fn test_upload_requires_user() {
        let h = harness().await;
        let response = h
            .app
            .oneshot(upload_request(None, &[("a.jpg", "image/jpeg", &b"x"[..])]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "Unauthorized");
    }

    #[tokio::test]
    async fn test_upload_to_someone_elses_tote() {
        let h = harness().await;
        let response = h
            .app
            .oneshot(upload_request(
                Some("mallory"),
                &[("a.jpg", "image/jpeg", &b"x"[..])],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_upload_caps() {
        let mut config = Config::default();
        config.server.max_files_per_upload = 1;
        config.server.max_file_size = 4;
        let h = harness_with(config, true).await;

        let response = h
            .app
            .clone()
            .oneshot(upload_request(
                Some("alice"),
                &[("a.jpg", "image/jpeg", &b"1"[..]), ("b.jpg", "image/jpeg", &b"2"[..])],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "TooManyFiles");

        let response = h
            .app
            .clone()
            .oneshot(upload_request(
                Some("alice"),
                &[("big.jpg", "image/jpeg", &b"123456789"[..])],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let notes_only = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"notes\"\r\n\r\nhello\r\n--{BOUNDARY}--\r\n"
        );
        let response = h
            .app
            .clone()
            .oneshot(
                Request::post("/api/totes/t1/photos")
                    .header("x-user-id", "alice")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={BOUNDARY}"),
                    )
                    .body(Body::from(notes_only))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(response).await["error"]["code"], "NoFiles");

        let response = h
            .app
            .oneshot(upload_request(
                Some("alice"),
                &[("notes.txt", "text/plain", &b"hi"[..])],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_upload_rejects_svg() {
        let h = harness().await;
        let response = h
            .app
            .oneshot(upload_request(
                Some("alice"),
                &[(
                    "cat.svg",
                    "image/svg+xml",
                    &b"<svg><script>alert(document.cookie)</script></svg>"[..],
                )],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "ValidationError");
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_upload_of_key_prefix_is_not_found() {
        let h = harness().await;
        let response = h
            .app
            .clone()
            .oneshot(upload_request(
                Some("alice"),
                &[("a.jpg", "image/jpeg", &b"a"[..])],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = h
            .app
            .oneshot(Request::get("/uploads/totes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_photo_flow() {
        let h = harness().await;
        let response = h
            .app
            .clone()
            .oneshot(upload_request(
                Some("alice"),
                &[("a.jpg", "image/jpeg", &b"a"[..]), ("b.jpg", "image/jpeg", &b"b"[..])],
            ))
            .await
            .unwrap();
        let photos = json_body(response).await["photos"].clone();
        let first = photos[0].as_str().unwrap();

        let delete = |body: Value| {
            Request::delete("/api/totes/t1/photos")
                .header("x-user-id", "alice")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        let response = h
            .app
            .clone()
            .oneshot(delete(json!({"photoUrl": first})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["tote"]["photos"], Value::Array(vec![photos[1].clone()]));
        assert_eq!(h.store.len().await, 1);

        let response = h
            .app
            .clone()
            .oneshot(delete(json!({"photoUrl": first})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"]["code"], "PhotoNotFound");

        let response = h
            .app
            .oneshot(delete(json!({"photoUrl": "not a url"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "ValidationError");
    }

    #[tokio::test]
    async fn test_analyze_empty_tote() {
        let h = harness().await;
        let response = h
            .app
            .oneshot(
                Request::post("/api/totes/t1/analyze")
                    .header("x-user-id", "alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["items"], json!([]));
        assert_eq!(body["photosAnalyzed"], 0);
        assert_eq!(body["message"], "No photos to analyze");
        assert_eq!(h.backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_analyze_returns_consolidated_items() {
        let h = harness().await;
        let response = h
            .app
            .clone()
            .oneshot(upload_request(
                Some("alice"),
                &[("a.jpg", "image/jpeg", &b"a"[..]), ("b.jpg", "image/jpeg", &b"b"[..])],
            ))
            .await
            .unwrap();
        let photos = json_body(response).await["photos"].clone();
        for url in photos.as_array().unwrap() {
            h.backend.respond(
                url.as_str().unwrap(),
                vec![json!({"class": "cup", "confidence": 0.6})],
            );
        }

        let response = h
            .app
            .oneshot(
                Request::post("/api/totes/t1/analyze")
                    .header("x-user-id", "alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["photosAnalyzed"], 2);
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        assert_eq!(body["items"][0]["name"], "Cup");
        assert_eq!(body["items"][0]["quantity"], 2);
        assert_eq!(body["items"][0]["aiGenerated"], true);
        assert!(body.get("message").is_none());
    }

    #[tokio::test]
    async fn test_analyze_when_ai_disabled() {
        let h = harness_with(Config::default(), false).await;
        let response = h
            .app
            .clone()
            .oneshot(upload_request(Some("alice"), &[("a.jpg", "image/jpeg", &b"a"[..])]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = h
            .app
            .oneshot(
                Request::post("/api/totes/t1/analyze")
                    .header("x-user-id", "alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["error"]["code"], "FeatureUnavailable");
        assert_eq!(h.backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_upload_is_404() {
        let h = harness().await;
        let response = h
            .app
            .oneshot(
                Request::get("/uploads/totes/t1/nope.jpg")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_openapi_document() {
        let h = harness().await;
        let response = h
            .app
            .oneshot(Request::get("/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["paths"]["/api/totes/{id}/analyze"].is_object());
        assert!(body["paths"]["/uploads/{key}"].is_object());
    }

    #[tokio::test]
    async fn test_metrics_route_follows_config() {
        crate::metrics::init_metrics();
        let h = harness().await;
        let response = h
            .app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut config = Config::default();
        config.observability.metrics = false;
        let h = harness_with(config, true).await;
        let response = h
            .app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
