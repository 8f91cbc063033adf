//! Photo object storage.
//!
//! The [`backend::ObjectStore`] trait abstracts over where photo bytes
//! physically live.  [`create_object_store`] picks the implementation once
//! at startup from configuration; the returned handle is passed to whoever
//! needs it rather than kept in a global.

pub mod backend;
pub mod local;
pub mod memory;

use std::sync::Arc;

use tracing::info;

use crate::config::StorageConfig;
use crate::errors::StorageError;
use backend::ObjectStore;

/// Build the configured object store.
///
/// Unknown or unimplemented backends fail instead of falling back to local
/// storage.  Call [`ObjectStore::initialize`] on the result before use.
pub fn create_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
    let store: Arc<dyn ObjectStore> = match config.backend.as_str() {
        "local" => {
            let root = &config.local.root_dir;
            info!(
                root = %root,
                base_url = %config.public_base_url,
                "Local storage backend selected"
            );
            Arc::new(local::LocalObjectStore::new(
                root.clone(),
                config.public_base_url.clone(),
            ))
        }
        "memory" => {
            info!(base_url = %config.public_base_url, "Memory storage backend selected");
            Arc::new(memory::MemoryObjectStore::new(
                config.public_base_url.clone(),
            ))
        }
        other => return Err(StorageError::BackendNotImplemented(other.to_string())),
    };
    Ok(store)
}
