//! Public object serving: `GET /uploads/{key}`.
//!
//! Photo URLs handed out by the store point here when the local backend is
//! in use, so the bytes are served with the content type recorded at
//! upload time.

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::errors::PhotoError;
use crate::storage::backend::DEFAULT_CONTENT_TYPE;
use crate::AppState;

/// Keys carry a random token, so a stored object never changes in place.
const CACHE_CONTROL: &str = "public, max-age=86400";

/// Objects come from users: no sniffing, and anything a browser does
/// render gets an opaque origin without scripts.
const CONTENT_SECURITY_POLICY: &str = "sandbox; default-src 'none'";

/// `GET /uploads/{key}`: return a stored object.
#[utoipa::path(
    get,
    path = "/uploads/{key}",
    tag = "Uploads",
    operation_id = "GetUpload",
    params(
        ("key" = String, Path, description = "Object key, may contain slashes"),
    ),
    responses(
        (status = 200, description = "Object bytes"),
        (status = 400, description = "Invalid key"),
        (status = 404, description = "Object not found"),
    )
)]
pub async fn get_upload(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, PhotoError> {
    let object = state.pipeline.store().get_object(&key).await?;

    let content_type = HeaderValue::from_str(&object.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    let mut response = (StatusCode::OK, object.body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );
    if let Some(modified) = object.last_modified {
        let date = httpdate::fmt_http_date(modified.into());
        if let Ok(value) = HeaderValue::from_str(&date) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
    Ok(response)
}
