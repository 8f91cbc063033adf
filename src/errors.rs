//! Error types for the photo core.
//!
//! Each layer has its own enum: [`StorageError`] for object storage,
//! [`DetectionError`] for the detection service, and [`PhotoError`] for
//! the HTTP-facing surface.  `PhotoError` implements
//! [`axum::response::IntoResponse`] so handlers can simply return
//! `Err(PhotoError::ToteNotFound { .. })`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes)
}

/// Failures raised by an [`ObjectStore`](crate::storage::backend::ObjectStore).
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object exists at the requested key.
    #[error("object not found: {key}")]
    ObjectNotFound { key: String },

    /// The URL does not belong to this store's public base URL.
    #[error("URL {url} does not belong to storage base {base_url}")]
    UrlMismatch { url: String, base_url: String },

    /// The key is not a valid relative object path.
    #[error("invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// The configured backend exists in name only.
    #[error("storage backend '{0}' is not implemented")]
    BackendNotImplemented(String),

    /// Underlying filesystem failure.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sidecar metadata could not be encoded.
    #[error("storage metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Failures raised while talking to the detection service.
#[derive(Debug, Error)]
pub enum DetectionError {
    /// Feature flag is off or the last health probe failed.
    #[error("AI photo analysis is not available. Enable it in the configuration and make sure the detection service is healthy.")]
    FeatureUnavailable,

    /// Connection refused or DNS failure.
    #[error("Cannot connect to the detection service at {url}. Make sure the service is running.")]
    ServiceUnreachable { url: String },

    /// The request exceeded its deadline.
    #[error("Photo analysis timed out after {timeout_secs}s. Try again with fewer or smaller photos.")]
    ServiceTimeout { timeout_secs: u64 },

    /// The service rejected the photo or URL.
    #[error("The detection service rejected the photo: {message}")]
    InvalidInput { message: String },

    /// Any other non-success status.
    #[error("Detection service returned {status}: {message}")]
    ServiceError { status: u16, message: String },

    /// The body could not be decoded into detections.
    #[error("Detection service returned a malformed response: {0}")]
    MalformedResponse(String),
}

impl DetectionError {
    /// Classify a transport-level `reqwest` failure.
    pub fn from_transport(err: reqwest::Error, url: &str, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            DetectionError::ServiceTimeout { timeout_secs }
        } else if err.is_connect() {
            DetectionError::ServiceUnreachable {
                url: url.to_string(),
            }
        } else if err.is_decode() {
            DetectionError::MalformedResponse(err.to_string())
        } else {
            DetectionError::ServiceError {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: err.to_string(),
            }
        }
    }

    /// Classify a non-success HTTP status returned by the service.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 | 422 => DetectionError::InvalidInput { message },
            _ => DetectionError::ServiceError { status, message },
        }
    }
}

/// Errors surfaced through the photo HTTP endpoints.
#[derive(Debug, Error)]
pub enum PhotoError {
    /// The tote does not exist or does not belong to the caller.
    #[error("Tote not found")]
    ToteNotFound { tote_id: String },

    /// The photo URL is not recorded on the tote.
    #[error("Photo not found on this tote")]
    PhotoNotFound { photo_url: String },

    /// The caller identity is missing.
    #[error("Authentication required")]
    Unauthorized,

    /// The upload carried no files.
    #[error("No photos were uploaded")]
    NoFiles,

    /// The upload carried more files than allowed.
    #[error("Too many photos: at most {max} per upload")]
    TooManyFiles { max: usize },

    /// A single file exceeded the size cap.
    #[error("Photo {name} exceeds the maximum size of {max_bytes} bytes")]
    FileTooLarge { name: String, max_bytes: u64 },

    /// Request body failed validation.
    #[error("{message}")]
    Validation { message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    /// Catch-all for unexpected internal errors.
    #[error("We encountered an internal error, please try again.")]
    Internal(#[from] anyhow::Error),
}

impl PhotoError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            PhotoError::ToteNotFound { .. } => "ToteNotFound",
            PhotoError::PhotoNotFound { .. } => "PhotoNotFound",
            PhotoError::Unauthorized => "Unauthorized",
            PhotoError::NoFiles => "NoFiles",
            PhotoError::TooManyFiles { .. } => "TooManyFiles",
            PhotoError::FileTooLarge { .. } => "FileTooLarge",
            PhotoError::Validation { .. } => "ValidationError",
            PhotoError::Storage(e) => match e {
                StorageError::ObjectNotFound { .. } => "ObjectNotFound",
                StorageError::UrlMismatch { .. } => "UrlMismatch",
                StorageError::InvalidKey { .. } => "InvalidKey",
                StorageError::BackendNotImplemented(_) => "NotImplemented",
                StorageError::Io(_) | StorageError::Metadata(_) => "StorageError",
            },
            PhotoError::Detection(e) => match e {
                DetectionError::FeatureUnavailable => "FeatureUnavailable",
                DetectionError::ServiceUnreachable { .. } => "ServiceUnreachable",
                DetectionError::ServiceTimeout { .. } => "ServiceTimeout",
                DetectionError::InvalidInput { .. } => "InvalidInput",
                DetectionError::ServiceError { .. } => "ServiceError",
                DetectionError::MalformedResponse(_) => "MalformedResponse",
            },
            PhotoError::Internal(_) => "InternalError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PhotoError::ToteNotFound { .. } => StatusCode::NOT_FOUND,
            PhotoError::PhotoNotFound { .. } => StatusCode::NOT_FOUND,
            PhotoError::Unauthorized => StatusCode::UNAUTHORIZED,
            PhotoError::NoFiles => StatusCode::BAD_REQUEST,
            PhotoError::TooManyFiles { .. } => StatusCode::BAD_REQUEST,
            PhotoError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            PhotoError::Validation { .. } => StatusCode::BAD_REQUEST,
            PhotoError::Storage(e) => match e {
                StorageError::ObjectNotFound { .. } => StatusCode::NOT_FOUND,
                StorageError::UrlMismatch { .. } | StorageError::InvalidKey { .. } => {
                    StatusCode::BAD_REQUEST
                }
                StorageError::BackendNotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
                StorageError::Io(_) | StorageError::Metadata(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            PhotoError::Detection(e) => match e {
                DetectionError::FeatureUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                DetectionError::ServiceUnreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                DetectionError::ServiceTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                DetectionError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
                DetectionError::ServiceError { .. } | DetectionError::MalformedResponse(_) => {
                    StatusCode::BAD_GATEWAY
                }
            },
            PhotoError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PhotoError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = ?self, "Request failed");
        }

        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });

        (status, Json(body)).into_response()
    }
}
