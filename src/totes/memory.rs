//! In-memory tote repository for tests and throwaway deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{Tote, ToteFuture, ToteRepository};

#[derive(Default)]
pub struct MemoryToteRepository {
    totes: RwLock<HashMap<String, Tote>>,
}

impl MemoryToteRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tote.
    pub fn insert(&self, tote: Tote) -> anyhow::Result<()> {
        let mut totes = self
            .totes
            .write()
            .map_err(|_| anyhow::anyhow!("tote map lock poisoned"))?;
        totes.insert(tote.id.clone(), tote);
        Ok(())
    }
}

impl ToteRepository for MemoryToteRepository {
    fn find_tote(&self, tote_id: &str, user_id: &str) -> ToteFuture<'_, Option<Tote>> {
        let tote_id = tote_id.to_string();
        let user_id = user_id.to_string();
        Box::pin(async move {
            let totes = self
                .totes
                .read()
                .map_err(|_| anyhow::anyhow!("tote map lock poisoned"))?;
            Ok(totes
                .get(&tote_id)
                .filter(|tote| tote.user_id == user_id)
                .cloned())
        })
    }

    fn update_photos(
        &self,
        tote_id: &str,
        user_id: &str,
        photos: Vec<String>,
    ) -> ToteFuture<'_, Option<Tote>> {
        let tote_id = tote_id.to_string();
        let user_id = user_id.to_string();
        Box::pin(async move {
            let mut totes = self
                .totes
                .write()
                .map_err(|_| anyhow::anyhow!("tote map lock poisoned"))?;
            match totes.get_mut(&tote_id) {
                Some(tote) if tote.user_id == user_id => {
                    tote.photos = photos;
                    Ok(Some(tote.clone()))
                }
                _ => Ok(None),
            }
        })
    }
}
