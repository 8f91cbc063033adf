//! HTTP handlers for the photo API and public object serving.

pub mod photos;
pub mod uploads;

use axum::http::HeaderMap;

use crate::errors::PhotoError;

/// Header carrying the caller's identity, set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Read the already-authenticated user id from the request headers.
pub fn user_id(headers: &HeaderMap) -> Result<String, PhotoError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(PhotoError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_user_id_header() {
        let mut headers = HeaderMap::new();
        assert!(matches!(user_id(&headers), Err(PhotoError::Unauthorized)));

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("  "));
        assert!(matches!(user_id(&headers), Err(PhotoError::Unauthorized)));

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("user-7"));
        assert_eq!(user_id(&headers).unwrap(), "user-7");
    }
}
