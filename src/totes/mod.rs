//! Tote records as seen by the photo pipeline.
//!
//! The pipeline only reads a tote (scoped to its owner) and replaces its
//! photo list. Everything else about totes lives elsewhere, so the
//! repository contract is deliberately narrow.

pub mod memory;
pub mod sqlite;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use utoipa::ToSchema;

pub use memory::MemoryToteRepository;
pub use sqlite::SqliteToteRepository;

/// A storage tote and the public URLs of its photos, in upload order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Tote {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub photos: Vec<String>,
}

/// Boxed future returned by [`ToteRepository`] methods.
pub type ToteFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Persistence for totes, always scoped to the owning user.
///
/// A tote owned by someone else is indistinguishable from a missing one:
/// both come back as `None`.
pub trait ToteRepository: Send + Sync + 'static {
    /// Fetch a tote owned by `user_id`.
    fn find_tote(&self, tote_id: &str, user_id: &str) -> ToteFuture<'_, Option<Tote>>;

    /// Replace the photo list of a tote owned by `user_id` and return the
    /// updated tote, or `None` when no such tote exists.
    fn update_photos(
        &self,
        tote_id: &str,
        user_id: &str,
        photos: Vec<String>,
    ) -> ToteFuture<'_, Option<Tote>>;
}
