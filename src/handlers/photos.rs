//! Tote photo endpoints: upload, delete, analyze.

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::HeaderMap;
use axum::Json;
use bytes::BytesMut;
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

use super::user_id;
use crate::errors::PhotoError;
use crate::pipeline::{AnalysisOutcome, UploadedPhoto};
use crate::totes::Tote;
use crate::AppState;

/// Multipart field carrying the photo files.
pub const PHOTOS_FIELD: &str = "photos";

/// Raster formats accepted for upload.  Uploads are served back from this
/// origin, so scriptable image types such as SVG stay out.
pub const ACCEPTED_IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/heic",
    "image/heif",
    "image/bmp",
    "image/tiff",
];

/// Shape of the multipart upload body, for the API document only.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadPhotosForm {
    /// One or more image files.
    #[schema(value_type = Vec<String>)]
    photos: Vec<Vec<u8>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadPhotosResponse {
    /// Every photo URL of the tote after the upload, oldest first.
    pub photos: Vec<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeletePhotoRequest {
    #[garde(length(min = 1, max = 2048), pattern(r"^https?://"))]
    pub photo_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeletePhotoResponse {
    pub tote: Tote,
}

/// `POST /api/totes/{id}/photos`: store uploaded photos on a tote.
#[utoipa::path(
    post,
    path = "/api/totes/{id}/photos",
    tag = "Photos",
    operation_id = "UploadPhotos",
    params(
        ("id" = String, Path, description = "Tote id"),
        ("x-user-id" = String, Header, description = "Authenticated user id"),
    ),
    request_body(content = UploadPhotosForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Photos stored", body = UploadPhotosResponse),
        (status = 400, description = "No files, too many files or not an image"),
        (status = 401, description = "Missing user id"),
        (status = 404, description = "Tote not found"),
        (status = 413, description = "A file is too large"),
    )
)]
pub async fn upload_photos(
    State(state): State<Arc<AppState>>,
    Path(tote_id): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<UploadPhotosResponse>, PhotoError> {
    let user_id = user_id(&headers)?;
    let files = read_photos(
        multipart,
        state.config.server.max_files_per_upload,
        state.config.server.max_file_size,
    )
    .await?;
    debug!(tote_id = %tote_id, files = files.len(), "Received photo upload");

    let photos = state
        .pipeline
        .upload_photos(&tote_id, files, &user_id)
        .await?
        .ok_or(PhotoError::ToteNotFound { tote_id })?;
    Ok(Json(UploadPhotosResponse { photos }))
}

/// `DELETE /api/totes/{id}/photos`: remove one photo from a tote.
#[utoipa::path(
    delete,
    path = "/api/totes/{id}/photos",
    tag = "Photos",
    operation_id = "DeletePhoto",
    params(
        ("id" = String, Path, description = "Tote id"),
        ("x-user-id" = String, Header, description = "Authenticated user id"),
    ),
    request_body = DeletePhotoRequest,
    responses(
        (status = 200, description = "Photo removed", body = DeletePhotoResponse),
        (status = 400, description = "Invalid request body"),
        (status = 401, description = "Missing user id"),
        (status = 404, description = "Tote or photo not found"),
    )
)]
pub async fn delete_photo(
    State(state): State<Arc<AppState>>,
    Path(tote_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<DeletePhotoRequest>, JsonRejection>,
) -> Result<Json<DeletePhotoResponse>, PhotoError> {
    let user_id = user_id(&headers)?;
    let Json(request) = payload.map_err(|e| PhotoError::Validation {
        message: e.body_text(),
    })?;
    request.validate().map_err(|report| PhotoError::Validation {
        message: report.to_string(),
    })?;

    let tote = state
        .pipeline
        .delete_photo(&tote_id, &request.photo_url, &user_id)
        .await?
        .ok_or(PhotoError::ToteNotFound { tote_id })?;
    Ok(Json(DeletePhotoResponse { tote }))
}

/// `POST /api/totes/{id}/analyze`: detect items in every photo of a tote.
#[utoipa::path(
    post,
    path = "/api/totes/{id}/analyze",
    tag = "Photos",
    operation_id = "AnalyzePhotos",
    params(
        ("id" = String, Path, description = "Tote id"),
        ("x-user-id" = String, Header, description = "Authenticated user id"),
    ),
    responses(
        (status = 200, description = "Consolidated item candidates", body = AnalysisOutcome),
        (status = 401, description = "Missing user id"),
        (status = 404, description = "Tote not found"),
        (status = 503, description = "AI analysis is disabled or the detection service is down"),
        (status = 504, description = "Detection timed out"),
    )
)]
pub async fn analyze_photos(
    State(state): State<Arc<AppState>>,
    Path(tote_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AnalysisOutcome>, PhotoError> {
    let user_id = user_id(&headers)?;
    let outcome = state
        .pipeline
        .analyze_photos(&tote_id, &user_id)
        .await?
        .ok_or(PhotoError::ToteNotFound { tote_id })?;
    Ok(Json(outcome))
}

/// Collect the `photos` files, enforcing the count and size caps while
/// streaming so an oversized file is rejected before it is fully buffered.
async fn read_photos(
    mut multipart: Multipart,
    max_files: usize,
    max_file_size: u64,
) -> Result<Vec<UploadedPhoto>, PhotoError> {
    let mut files = Vec::new();
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(PHOTOS_FIELD) {
            continue;
        }
        if files.len() >= max_files {
            return Err(PhotoError::TooManyFiles { max: max_files });
        }

        let original_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        if !is_accepted_image(&content_type) {
            return Err(PhotoError::Validation {
                message: format!("{original_name}: unsupported image type '{content_type}'"),
            });
        }

        let mut data = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if (data.len() + chunk.len()) as u64 > max_file_size {
                return Err(PhotoError::FileTooLarge {
                    name: original_name,
                    max_bytes: max_file_size,
                });
            }
            data.extend_from_slice(&chunk);
        }

        files.push(UploadedPhoto {
            original_name,
            content_type,
            data: data.freeze(),
        });
    }

    if files.is_empty() {
        return Err(PhotoError::NoFiles);
    }
    Ok(files)
}

fn multipart_error(e: MultipartError) -> PhotoError {
    PhotoError::Validation {
        message: format!("Malformed multipart body: {}", e.body_text()),
    }
}

/// Compare the MIME essence (parameters stripped, case folded) against
/// [`ACCEPTED_IMAGE_TYPES`].
fn is_accepted_image(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ACCEPTED_IMAGE_TYPES.contains(&essence.as_str())
}
