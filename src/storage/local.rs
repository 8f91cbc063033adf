//! Local filesystem object store.
//!
//! Objects are stored as plain files under a configurable root directory;
//! the key is used directly as a relative path (e.g., "totes/42/abc.jpg").
//! Content type and metadata live in a JSON sidecar at `<path>.meta.json`.
//!
//! Writes go to a temp file under `.tmp/`, are fsynced, then renamed into
//! place.  A crash between the body rename and the sidecar rename can leave
//! an object without its sidecar; readers fall back to defaults.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::backend::{
    validate_key, validate_prefix, GetObjectOutput, ObjectMetadata, ObjectStore, ObjectSummary,
    PublicUrlBase, PutObjectOutput, SidecarRecord, StorageFuture, DEFAULT_CONTENT_TYPE,
    SIDECAR_SUFFIX,
};
use crate::errors::StorageError;

/// Name of the scratch directory used for atomic writes.
const TMP_DIR: &str = ".tmp";

/// Stores objects on the local filesystem.
pub struct LocalObjectStore {
    /// Root directory for all stored objects.
    root: PathBuf,
    urls: PublicUrlBase,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`.  No I/O happens until
    /// [`ObjectStore::initialize`] or the first write.
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            urls: PublicUrlBase::new(base_url),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to an absolute file path.
    ///
    /// Key validation rejects `..` and dot-prefixed segments, so the
    /// resolved path always stays inside the root.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(TMP_DIR).join(format!("tmp-{}", id))
    }

    /// Temp-fsync-rename write of `data` to `final_path`.
    async fn write_atomic(&self, final_path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.temp_path();
        if let Some(parent) = tmp_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&tmp_path, final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }
        Ok(())
    }

    /// Remove a file, treating "already gone" as success.
    async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn is_dir(path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Load the sidecar for `path`; `None` when missing or unreadable.
    async fn read_sidecar(path: &Path) -> Option<SidecarRecord> {
        let sidecar = Self::sidecar_path(path);
        let raw = match tokio::fs::read(&sidecar).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %sidecar.display(), "No sidecar metadata, using defaults");
                return None;
            }
            Err(e) => {
                warn!(path = %sidecar.display(), error = %e, "Failed to read sidecar metadata");
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %sidecar.display(), error = %e, "Corrupt sidecar metadata ignored");
                None
            }
        }
    }

    /// Turn a path below the root back into a `/`-joined key.
    fn key_for_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Option<Vec<&str>> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect();
        Some(segments?.join("/"))
    }
}

impl ObjectStore for LocalObjectStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    fn url_base(&self) -> &PublicUrlBase {
        &self.urls
    }

    fn initialize(&self) -> StorageFuture<'_, ()> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.root).await?;
            tokio::fs::create_dir_all(self.root.join(TMP_DIR)).await?;
            Ok(())
        })
    }

    fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> StorageFuture<'_, PutObjectOutput> {
        let key = key.to_string();
        let content_type = content_type.to_string();
        Box::pin(async move {
            let path = self.resolve(&key)?;
            self.write_atomic(&path, &body).await?;

            // The content type has nowhere else to live, so a non-default
            // type also earns a sidecar.
            let sidecar = Self::sidecar_path(&path);
            if !metadata.is_empty() || content_type != DEFAULT_CONTENT_TYPE {
                let record = SidecarRecord {
                    content_type: content_type.clone(),
                    metadata,
                    uploaded_at: Utc::now(),
                };
                let json = serde_json::to_vec_pretty(&record)?;
                self.write_atomic(&sidecar, &json).await?;
            } else {
                Self::remove_if_exists(&sidecar).await?;
            }

            debug!(key = %key, size = body.len(), "Stored object");
            Ok(PutObjectOutput {
                url: self.public_url(&key),
                key,
                content_type,
            })
        })
    }

    fn get_object(&self, key: &str) -> StorageFuture<'_, GetObjectOutput> {
        let key = key.to_string();
        Box::pin(async move {
            let path = self.resolve(&key)?;
            let body = match tokio::fs::read(&path).await {
                Ok(body) => Bytes::from(body),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(StorageError::ObjectNotFound { key });
                }
                Err(e) => {
                    // A directory under the root is a key prefix, not an object.
                    if Self::is_dir(&path).await {
                        return Err(StorageError::ObjectNotFound { key });
                    }
                    return Err(e.into());
                }
            };

            let (content_type, metadata) = match Self::read_sidecar(&path).await {
                Some(record) => (record.content_type, record.metadata),
                None => (DEFAULT_CONTENT_TYPE.to_string(), ObjectMetadata::new()),
            };

            let last_modified = tokio::fs::metadata(&path)
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);

            Ok(GetObjectOutput {
                body,
                content_type,
                metadata,
                last_modified,
            })
        })
    }

    fn delete_object(&self, key: &str) -> StorageFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            let path = self.resolve(&key)?;
            Self::remove_if_exists(&path).await?;
            Self::remove_if_exists(&Self::sidecar_path(&path)).await?;
            debug!(key = %key, "Deleted object");
            Ok(())
        })
    }

    fn list_objects(&self, prefix: &str) -> StorageFuture<'_, Vec<ObjectSummary>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            validate_prefix(&prefix)?;
            // Start at the deepest directory the prefix fully names.
            let start = match prefix.rfind('/') {
                Some(idx) => self.root.join(&prefix[..idx]),
                None => self.root.clone(),
            };

            let mut results = Vec::new();
            let mut pending = vec![start];
            while let Some(dir) = pending.pop() {
                let mut entries = match tokio::fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                        continue
                    }
                    Err(e) => return Err(e.into()),
                };

                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    if name.starts_with('.') || name.ends_with(SIDECAR_SUFFIX) {
                        continue;
                    }

                    let meta = entry.metadata().await?;
                    if meta.is_dir() {
                        pending.push(path);
                        continue;
                    }

                    let Some(key) = self.key_for_path(&path) else {
                        continue;
                    };
                    if !key.starts_with(&prefix) {
                        continue;
                    }
                    let last_modified = meta
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now());
                    results.push(ObjectSummary {
                        key,
                        size: meta.len(),
                        last_modified,
                    });
                }
            }

            results.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(results)
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (tempfile::TempDir, LocalObjectStore) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = LocalObjectStore::new(dir.path().join("uploads"), "http://localhost:3001/uploads");
        store.initialize().await.expect("failed to initialize store");
        (dir, store)
    }

    fn meta(pairs: &[(&str, &str)]) -> ObjectMetadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let (_dir, store) = test_store().await;

        let out = store
            .put_object("totes/t1/a.jpg", Bytes::from("jpeg bytes"), "image/jpeg", ObjectMetadata::new())
            .await
            .unwrap();
        assert_eq!(out.key, "totes/t1/a.jpg");
        assert_eq!(out.url, "http://localhost:3001/uploads/totes/t1/a.jpg");
        assert_eq!(out.content_type, "image/jpeg");

        let obj = store.get_object("totes/t1/a.jpg").await.unwrap();
        assert_eq!(obj.body, Bytes::from("jpeg bytes"));
        assert_eq!(obj.content_type, "image/jpeg");
        assert!(obj.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_put_with_metadata_writes_sidecar() {
        let (_dir, store) = test_store().await;
        let metadata = meta(&[("toteId", "t1"), ("userId", "u1"), ("originalName", "box.png")]);

        store
            .put_object("totes/t1/b.png", Bytes::from("png"), "image/png", metadata.clone())
            .await
            .unwrap();

        let sidecar = store.root().join("totes/t1/b.png.meta.json");
        assert!(sidecar.exists());

        let obj = store.get_object("totes/t1/b.png").await.unwrap();
        assert_eq!(obj.metadata, metadata);
        assert_eq!(obj.content_type, "image/png");
    }

    #[tokio::test]
    async fn test_get_without_sidecar_uses_defaults() {
        let (_dir, store) = test_store().await;
        store
            .put_object("raw/blob", Bytes::from("x"), "image/png", meta(&[("a", "b")]))
            .await
            .unwrap();
        std::fs::remove_file(store.root().join("raw/blob.meta.json")).unwrap();

        let obj = store.get_object("raw/blob").await.unwrap();
        assert_eq!(obj.body, Bytes::from("x"));
        assert_eq!(obj.content_type, DEFAULT_CONTENT_TYPE);
        assert!(obj.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_get_with_corrupt_sidecar_uses_defaults() {
        let (_dir, store) = test_store().await;
        store
            .put_object("raw/blob", Bytes::from("x"), "image/png", meta(&[("a", "b")]))
            .await
            .unwrap();
        std::fs::write(store.root().join("raw/blob.meta.json"), b"{not json").unwrap();

        let obj = store.get_object("raw/blob").await.unwrap();
        assert_eq!(obj.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_get_nonexistent_is_object_not_found() {
        let (_dir, store) = test_store().await;
        let err = store.get_object("totes/none.jpg").await.unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_directory_key_is_object_not_found() {
        let (_dir, store) = test_store().await;
        store
            .put_object("totes/t1/a.jpg", Bytes::from("x"), "image/jpeg", ObjectMetadata::new())
            .await
            .unwrap();

        for prefix in ["totes", "totes/t1"] {
            let err = store.get_object(prefix).await.unwrap_err();
            assert!(
                matches!(err, StorageError::ObjectNotFound { ref key } if key == prefix),
                "{prefix}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_put_overwrites_and_drops_stale_sidecar() {
        let (_dir, store) = test_store().await;
        store
            .put_object("k/obj", Bytes::from("v1"), "image/png", meta(&[("a", "b")]))
            .await
            .unwrap();
        store
            .put_object("k/obj", Bytes::from("v2"), DEFAULT_CONTENT_TYPE, ObjectMetadata::new())
            .await
            .unwrap();

        let obj = store.get_object("k/obj").await.unwrap();
        assert_eq!(obj.body, Bytes::from("v2"));
        assert!(obj.metadata.is_empty());
        assert!(!store.root().join("k/obj.meta.json").exists());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, store) = test_store().await;
        store
            .put_object("totes/t1/c.jpg", Bytes::from("c"), "image/jpeg", meta(&[("a", "b")]))
            .await
            .unwrap();

        store.delete_object("totes/t1/c.jpg").await.unwrap();
        assert!(!store.root().join("totes/t1/c.jpg").exists());
        assert!(!store.root().join("totes/t1/c.jpg.meta.json").exists());

        // Second delete must not error.
        store.delete_object("totes/t1/c.jpg").await.unwrap();
        store.delete_object("never/existed").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_objects_reports_each_key() {
        let (_dir, store) = test_store().await;
        store
            .put_object("a/1", Bytes::from("1"), "text/plain", ObjectMetadata::new())
            .await
            .unwrap();

        let keys = vec!["a/1".to_string(), "../escape".to_string(), "a/2".to_string()];
        let results = store.delete_objects(&keys).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(StorageError::InvalidKey { .. })));
        assert!(results[2].1.is_ok());
        assert!(!store.root().join("a/1").exists());
    }

    #[tokio::test]
    async fn test_list_excludes_sidecars() {
        let (_dir, store) = test_store().await;
        store
            .put_object("totes/t1/a.jpg", Bytes::from("aaaa"), "image/jpeg", meta(&[("toteId", "t1")]))
            .await
            .unwrap();
        store
            .put_object("totes/t1/nested/b.jpg", Bytes::from("bb"), "image/jpeg", meta(&[("toteId", "t1")]))
            .await
            .unwrap();
        store
            .put_object("totes/t2/c.jpg", Bytes::from("c"), "image/jpeg", ObjectMetadata::new())
            .await
            .unwrap();

        let listed = store.list_objects("totes/t1/").await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["totes/t1/a.jpg", "totes/t1/nested/b.jpg"]);
        assert_eq!(listed[0].size, 4);
        assert!(listed.iter().all(|o| !o.key.ends_with(SIDECAR_SUFFIX)));

        let all = store.list_objects("").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_list_partial_segment_prefix() {
        let (_dir, store) = test_store().await;
        for key in ["totes/t1/a", "totes/t10/b", "totes/t2/c"] {
            store
                .put_object(key, Bytes::from("x"), "text/plain", ObjectMetadata::new())
                .await
                .unwrap();
        }

        let listed = store.list_objects("totes/t1").await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["totes/t1/a", "totes/t10/b"]);
    }

    #[tokio::test]
    async fn test_list_missing_prefix_is_empty() {
        let (_dir, store) = test_store().await;
        assert!(store.list_objects("nothing/here/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (_dir, store) = test_store().await;
        store.initialize().await.unwrap();
        store.initialize().await.unwrap();
        assert!(store.root().join(TMP_DIR).is_dir());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, store) = test_store().await;
        let err = store
            .put_object("../outside", Bytes::from("x"), "text/plain", ObjectMetadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn test_list_prefix_outside_root_rejected() {
        let (dir, store) = test_store().await;
        std::fs::write(dir.path().join("outside.jpg"), b"x").unwrap();

        for prefix in ["../", "totes/../../", "/etc/", ".tmp/"] {
            let err = store.list_objects(prefix).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey { .. }), "{prefix}: {err:?}");
        }
    }

    #[tokio::test]
    async fn test_public_url_inverse() {
        let (_dir, store) = test_store().await;
        let url = store.public_url("totes/t1/a b.jpg");
        assert_eq!(store.key_from_url(&url).unwrap(), "totes/t1/a b.jpg");
        assert!(matches!(
            store.key_from_url("http://elsewhere/totes/t1/a.jpg"),
            Err(StorageError::UrlMismatch { .. })
        ));
    }
}
