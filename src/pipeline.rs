//! Photo pipeline: upload, delete and analyze the photos of a tote.
//!
//! Ties the object store, the tote repository and the detection client
//! together. Every operation is scoped to the requesting user; a tote the
//! user does not own is reported as `Ok(None)`, the same as a missing one.

use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::consolidate::consolidate;
use crate::detection::{DetectedItem, DetectionClient};
use crate::errors::PhotoError;
use crate::metrics::{ANALYSES_TOTAL, PHOTOS_DELETED_TOTAL, PHOTOS_STORED_TOTAL};
use crate::storage::backend::{ObjectMetadata, ObjectStore, DEFAULT_CONTENT_TYPE};
use crate::totes::{Tote, ToteRepository};

/// Message returned when a tote has nothing to analyze.
pub const NO_PHOTOS_MESSAGE: &str = "No photos to analyze";

/// One file received for upload.
#[derive(Debug, Clone)]
pub struct UploadedPhoto {
    pub original_name: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Consolidated result of analyzing every photo of a tote.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub items: Vec<DetectedItem>,
    pub photos_analyzed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub struct PhotoPipeline {
    store: Arc<dyn ObjectStore>,
    detector: Arc<DetectionClient>,
    totes: Arc<dyn ToteRepository>,
}

impl PhotoPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        detector: Arc<DetectionClient>,
        totes: Arc<dyn ToteRepository>,
    ) -> Self {
        Self {
            store,
            detector,
            totes,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn detector(&self) -> &Arc<DetectionClient> {
        &self.detector
    }

    /// Store `files` under the tote and append their public URLs to its
    /// photo list. Returns the full updated list.
    ///
    /// Nothing is written when the tote does not exist. If a write fails
    /// part way, the objects already written by this call are removed
    /// again and the tote is left untouched.
    pub async fn upload_photos(
        &self,
        tote_id: &str,
        files: Vec<UploadedPhoto>,
        user_id: &str,
    ) -> Result<Option<Vec<String>>, PhotoError> {
        let Some(tote) = self.totes.find_tote(tote_id, user_id).await? else {
            return Ok(None);
        };

        let mut written: Vec<String> = Vec::with_capacity(files.len());
        let mut urls: Vec<String> = Vec::with_capacity(files.len());
        for file in files {
            let key = photo_key(tote_id, &file.original_name, &file.content_type);
            let content_type = if file.content_type.is_empty() {
                DEFAULT_CONTENT_TYPE.to_string()
            } else {
                file.content_type.clone()
            };
            let metadata = ObjectMetadata::from([
                ("toteId".to_string(), tote_id.to_string()),
                ("userId".to_string(), user_id.to_string()),
                ("originalName".to_string(), file.original_name.clone()),
            ]);
            let size = file.data.len();

            match self
                .store
                .put_object(&key, file.data, &content_type, metadata)
                .await
            {
                Ok(out) => {
                    debug!(key = %out.key, size, content_type = %out.content_type, "Stored photo");
                    counter!(PHOTOS_STORED_TOTAL).increment(1);
                    written.push(out.key);
                    urls.push(out.url);
                }
                Err(e) => {
                    self.discard(&written).await;
                    return Err(e.into());
                }
            }
        }

        let mut photos = tote.photos;
        photos.extend(urls);
        match self.totes.update_photos(tote_id, user_id, photos).await {
            Ok(Some(updated)) => {
                info!(tote_id, added = written.len(), total = updated.photos.len(), "Photos uploaded");
                Ok(Some(updated.photos))
            }
            // Removed between lookup and update.
            Ok(None) => {
                self.discard(&written).await;
                Ok(None)
            }
            Err(e) => {
                self.discard(&written).await;
                Err(e.into())
            }
        }
    }

    /// Remove `photo_url` from the tote and delete its bytes.
    ///
    /// A URL not on the tote fails with [`PhotoError::PhotoNotFound`]
    /// before storage is touched. A failed byte deletion is logged and the
    /// reference is removed anyway.
    pub async fn delete_photo(
        &self,
        tote_id: &str,
        photo_url: &str,
        user_id: &str,
    ) -> Result<Option<Tote>, PhotoError> {
        let Some(tote) = self.totes.find_tote(tote_id, user_id).await? else {
            return Ok(None);
        };
        if !tote.photos.iter().any(|p| p == photo_url) {
            return Err(PhotoError::PhotoNotFound {
                photo_url: photo_url.to_string(),
            });
        }

        let storage_outcome = match self.store.key_from_url(photo_url) {
            Ok(key) => match self.store.delete_object(&key).await {
                Ok(()) => "deleted",
                Err(e) => {
                    warn!(tote_id, key = %key, error = %e, "Failed to delete photo bytes; removing reference anyway");
                    "failed"
                }
            },
            Err(e) => {
                warn!(tote_id, photo_url, error = %e, "Photo URL is not in this store; removing reference only");
                "failed"
            }
        };
        counter!(PHOTOS_DELETED_TOTAL, "storage" => storage_outcome).increment(1);

        let photos: Vec<String> = tote
            .photos
            .into_iter()
            .filter(|p| p != photo_url)
            .collect();
        let updated = self.totes.update_photos(tote_id, user_id, photos).await?;
        if updated.is_some() {
            info!(tote_id, photo_url, "Photo removed from tote");
        }
        Ok(updated)
    }

    /// Analyze every photo of the tote and return the consolidated items.
    ///
    /// Results are not persisted. A tote without photos yields an empty
    /// list and a message, and no detection request is sent.
    pub async fn analyze_photos(
        &self,
        tote_id: &str,
        user_id: &str,
    ) -> Result<Option<AnalysisOutcome>, PhotoError> {
        let Some(tote) = self.totes.find_tote(tote_id, user_id).await? else {
            return Ok(None);
        };
        if tote.photos.is_empty() {
            counter!(ANALYSES_TOTAL, "outcome" => "empty").increment(1);
            return Ok(Some(AnalysisOutcome {
                items: Vec::new(),
                photos_analyzed: 0,
                message: Some(NO_PHOTOS_MESSAGE.to_string()),
            }));
        }

        let candidates = match self.detector.analyze_multiple_photos(&tote.photos).await {
            Ok(candidates) => candidates,
            Err(e) => {
                counter!(ANALYSES_TOTAL, "outcome" => "failed").increment(1);
                warn!(tote_id, photos = tote.photos.len(), error = %e, "Tote analysis failed");
                return Err(e.into());
            }
        };
        let found = candidates.len();
        let items = consolidate(candidates);
        counter!(ANALYSES_TOTAL, "outcome" => "success").increment(1);
        info!(
            tote_id,
            photos = tote.photos.len(),
            candidates = found,
            items = items.len(),
            "Tote analyzed"
        );

        Ok(Some(AnalysisOutcome {
            items,
            photos_analyzed: tote.photos.len(),
            message: None,
        }))
    }

    async fn discard(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        for (key, result) in self.store.delete_objects(keys).await {
            if let Err(e) = result {
                warn!(key = %key, error = %e, "Failed to clean up photo after aborted upload");
            }
        }
    }
}

/// `totes/{tote_id}/{uuid}{ext}`.
fn photo_key(tote_id: &str, original_name: &str, content_type: &str) -> String {
    format!(
        "totes/{}/{}{}",
        tote_id,
        uuid::Uuid::new_v4(),
        photo_extension(original_name, content_type)
    )
}

/// Extension (with dot) taken from the file name, else guessed from the
/// content type, else empty.
fn photo_extension(original_name: &str, content_type: &str) -> String {
    let from_name = original_name
        .rsplit_once('.')
        .map(|(stem, ext)| (stem, ext.to_ascii_lowercase()))
        .filter(|(stem, ext)| {
            !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 8
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|(_, ext)| ext);
    if let Some(ext) = from_name {
        return format!(".{ext}");
    }

    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let guessed = match essence.as_str() {
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/heic" => ".heic",
        "image/heif" => ".heif",
        "image/bmp" => ".bmp",
        "image/tiff" => ".tiff",
        _ => "",
    };
    guessed.to_string()
}
