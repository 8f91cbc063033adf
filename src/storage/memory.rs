//! In-memory object store.
//!
//! Objects live in a `tokio::sync::RwLock<HashMap<...>>`.  Nothing is
//! persisted; useful for tests and throwaway deployments.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::backend::{
    validate_key, validate_prefix, GetObjectOutput, ObjectMetadata, ObjectStore, ObjectSummary,
    PublicUrlBase, PutObjectOutput, StorageFuture,
};
use crate::errors::StorageError;

#[derive(Debug, Clone)]
struct MemoryEntry {
    body: Bytes,
    content_type: String,
    metadata: ObjectMetadata,
    last_modified: DateTime<Utc>,
}

/// In-memory storage backend.
pub struct MemoryObjectStore {
    objects: tokio::sync::RwLock<HashMap<String, MemoryEntry>>,
    urls: PublicUrlBase,
}

impl MemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            objects: tokio::sync::RwLock::new(HashMap::new()),
            urls: PublicUrlBase::new(base_url),
        }
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn url_base(&self) -> &PublicUrlBase {
        &self.urls
    }

    fn initialize(&self) -> StorageFuture<'_, ()> {
        Box::pin(async { Ok(()) })
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
            validate_key(&key)?;
            let entry = MemoryEntry {
                body,
                content_type: content_type.clone(),
                metadata,
                last_modified: Utc::now(),
            };
            self.objects.write().await.insert(key.clone(), entry);
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
            validate_key(&key)?;
            let objects = self.objects.read().await;
            let entry = objects
                .get(&key)
                .ok_or_else(|| StorageError::ObjectNotFound { key: key.clone() })?;
            Ok(GetObjectOutput {
                body: entry.body.clone(),
                content_type: entry.content_type.clone(),
                metadata: entry.metadata.clone(),
                last_modified: Some(entry.last_modified),
            })
        })
    }

    fn delete_object(&self, key: &str) -> StorageFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            validate_key(&key)?;
            self.objects.write().await.remove(&key);
            Ok(())
        })
    }

    fn list_objects(&self, prefix: &str) -> StorageFuture<'_, Vec<ObjectSummary>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            validate_prefix(&prefix)?;
            let objects = self.objects.read().await;
            let mut results: Vec<ObjectSummary> = objects
                .iter()
                .filter(|(key, _)| key.starts_with(&prefix))
                .map(|(key, entry)| ObjectSummary {
                    key: key.clone(),
                    size: entry.body.len() as u64,
                    last_modified: entry.last_modified,
                })
                .collect();
            results.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(results)
        })
    }
}
