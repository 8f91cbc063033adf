//! Abstract object store trait.
//!
//! Every storage backend must implement [`ObjectStore`].  The contract is a
//! strict subset of what remote object stores offer (put/get/delete/list by
//! key plus deterministic public URLs), so a remote backend can be added
//! without touching any caller.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::errors::StorageError;

/// Content type used when nothing better is known.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// File-name suffix of the sidecar metadata record.
pub const SIDECAR_SUFFIX: &str = ".meta.json";

/// Characters escaped inside a single URL path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Free-form string metadata attached to an object.
pub type ObjectMetadata = HashMap<String, String>;

/// Boxed future returned by every [`ObjectStore`] method.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Result of a successful `put_object`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObjectOutput {
    pub key: String,
    pub url: String,
    pub content_type: String,
}

/// A stored object's bytes plus its recorded content type and metadata.
#[derive(Debug, Clone)]
pub struct GetObjectOutput {
    pub body: Bytes,
    pub content_type: String,
    pub metadata: ObjectMetadata,
    /// Last write time, when the backend knows it.
    pub last_modified: Option<DateTime<Utc>>,
}

/// One entry of a `list_objects` result.
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Sidecar record persisted next to a locally stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarRecord {
    pub content_type: String,
    #[serde(default)]
    pub metadata: ObjectMetadata,
    pub uploaded_at: DateTime<Utc>,
}

/// Async object storage contract.
pub trait ObjectStore: Send + Sync + 'static {
    /// Short backend name for logs (`local`, `memory`, ...).
    fn backend_name(&self) -> &'static str;

    /// Public URL mapping shared by every backend.
    fn url_base(&self) -> &PublicUrlBase;

    /// Idempotent one-time setup.  Safe to call more than once.
    fn initialize(&self) -> StorageFuture<'_, ()>;

    /// Write `body` under `key`, overwriting any existing object.
    fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> StorageFuture<'_, PutObjectOutput>;

    /// Read the object at `key`.
    fn get_object(&self, key: &str) -> StorageFuture<'_, GetObjectOutput>;

    /// Delete the object at `key`.  Deleting a missing key succeeds.
    fn delete_object(&self, key: &str) -> StorageFuture<'_, ()>;

    /// All objects whose key starts with `prefix`, sorted by key.  Fails
    /// with `InvalidKey` for a prefix that leaves the key space.
    fn list_objects(&self, prefix: &str) -> StorageFuture<'_, Vec<ObjectSummary>>;

    /// Delete every key independently and report each outcome.
    ///
    /// One failing key never prevents attempts on the others.
    fn delete_objects<'a>(
        &'a self,
        keys: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Vec<(String, Result<(), StorageError>)>> + Send + 'a>> {
        Box::pin(async move {
            let results =
                futures::future::join_all(keys.iter().map(|key| self.delete_object(key))).await;
            keys.iter().cloned().zip(results).collect()
        })
    }

    /// Deterministic public URL for `key`.  No I/O.
    fn public_url(&self, key: &str) -> String {
        self.url_base().url_for(key)
    }

    /// Inverse of [`ObjectStore::public_url`].
    fn key_from_url(&self, url: &str) -> Result<String, StorageError> {
        self.url_base().key_for(url)
    }
}

/// Maps keys to public URLs of the form `{base_url}/{key}` and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicUrlBase {
    base_url: String,
}

impl PublicUrlBase {
    /// Trailing slashes on `base_url` are ignored.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect();
        format!("{}/{}", self.base_url, encoded.join("/"))
    }

    pub fn key_for(&self, url: &str) -> Result<String, StorageError> {
        let mismatch = || StorageError::UrlMismatch {
            url: url.to_string(),
            base_url: self.base_url.clone(),
        };

        let rest = url
            .strip_prefix(self.base_url.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
            .ok_or_else(mismatch)?;

        let segments = rest
            .split('/')
            .map(|segment| {
                percent_decode_str(segment)
                    .decode_utf8()
                    .map(|s| s.into_owned())
                    .map_err(|_| mismatch())
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(segments.join("/"))
    }
}

/// Check that `key` is a relative `/`-separated path that is safe to map
/// onto a filesystem.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = |reason| StorageError::InvalidKey {
        key: key.to_string(),
        reason,
    };

    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key.starts_with('/') {
        return Err(invalid("key must be relative"));
    }
    if key.contains('\\') || key.contains('\0') {
        return Err(invalid("key contains a forbidden character"));
    }
    if key.ends_with(SIDECAR_SUFFIX) {
        return Err(invalid("key uses the reserved metadata suffix"));
    }
    for segment in key.split('/') {
        if segment.is_empty() {
            return Err(invalid("key contains an empty segment"));
        }
        if segment.starts_with('.') {
            return Err(invalid("key segments must not start with '.'"));
        }
    }
    Ok(())
}

/// Check a listing prefix.  Unlike a key it may be empty or end part way
/// through a segment, but it must stay inside the key space.
pub fn validate_prefix(prefix: &str) -> Result<(), StorageError> {
    let invalid = |reason| StorageError::InvalidKey {
        key: prefix.to_string(),
        reason,
    };

    if prefix.starts_with('/') {
        return Err(invalid("prefix must be relative"));
    }
    if prefix.contains('\\') || prefix.contains('\0') {
        return Err(invalid("prefix contains a forbidden character"));
    }
    if prefix.split('/').any(|segment| segment.starts_with('.')) {
        return Err(invalid("prefix segments must not start with '.'"));
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────
