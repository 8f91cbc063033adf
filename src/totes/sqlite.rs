//! SQLite-backed tote repository.
//!
//! Uses `rusqlite` with the `bundled` feature. Async trait methods wrap
//! synchronous calls made under a `Mutex`. The photo list is stored as a
//! JSON array in a single column.

use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Tote, ToteFuture, ToteRepository};

pub struct SqliteToteRepository {
    conn: Mutex<Connection>,
}

impl SqliteToteRepository {
    /// Open (or create) the database at `path` and ensure the schema.
    ///
    /// `":memory:"` gives a private in-memory database.
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open tote database at {path}"))?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init_db()?;
        Ok(repo)
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("tote database mutex poisoned"))
    }

    /// Idempotent; runs on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS totes (
                id         TEXT PRIMARY KEY,
                user_id    TEXT NOT NULL,
                name       TEXT NOT NULL DEFAULT '',
                photos     TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_totes_user
                ON totes(user_id);
            ",
        )?;
        Ok(())
    }

    /// Insert a new tote, or replace the one with the same id.
    pub fn create_tote(&self, tote: &Tote) -> anyhow::Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let photos = serde_json::to_string(&tote.photos)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO totes (id, user_id, name, photos, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![tote.id, tote.user_id, tote.name, photos, now],
        )?;
        Ok(())
    }

    fn select(conn: &Connection, tote_id: &str, user_id: &str) -> anyhow::Result<Option<Tote>> {
        let row = conn
            .query_row(
                "SELECT id, user_id, name, photos FROM totes WHERE id = ?1 AND user_id = ?2",
                params![tote_id, user_id],
                read_row,
            )
            .optional()?;
        row.map(|(id, user_id, name, photos)| {
            let photos: Vec<String> = serde_json::from_str(&photos)
                .with_context(|| format!("tote {id} has a corrupt photo list"))?;
            Ok(Tote {
                id,
                user_id,
                name,
                photos,
            })
        })
        .transpose()
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

impl ToteRepository for SqliteToteRepository {
    fn find_tote(&self, tote_id: &str, user_id: &str) -> ToteFuture<'_, Option<Tote>> {
        let tote_id = tote_id.to_string();
        let user_id = user_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            Self::select(&conn, &tote_id, &user_id)
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
            let encoded = serde_json::to_string(&photos)?;
            let now = chrono::Utc::now().to_rfc3339();
            let conn = self.lock()?;
            let changed = conn.execute(
                "UPDATE totes SET photos = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
                params![encoded, now, tote_id, user_id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            Self::select(&conn, &tote_id, &user_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo_with_tote() -> SqliteToteRepository {
        let repo = SqliteToteRepository::new(":memory:").unwrap();
        repo.create_tote(&Tote {
            id: "t1".into(),
            user_id: "alice".into(),
            name: "Camping gear".into(),
            photos: vec!["http://x/1.jpg".into()],
        })
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn test_find_tote() {
        let repo = repo_with_tote();
        let tote = repo.find_tote("t1", "alice").await.unwrap().unwrap();
        assert_eq!(tote.name, "Camping gear");
        assert_eq!(tote.photos, vec!["http://x/1.jpg"]);

        assert!(repo.find_tote("t1", "mallory").await.unwrap().is_none());
        assert!(repo.find_tote("nope", "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_photos_keeps_order() {
        let repo = repo_with_tote();
        let photos = vec!["http://x/1.jpg".to_string(), "http://x/2.jpg".to_string()];
        let tote = repo
            .update_photos("t1", "alice", photos.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tote.photos, photos);

        let reloaded = repo.find_tote("t1", "alice").await.unwrap().unwrap();
        assert_eq!(reloaded.photos, photos);
    }

    #[tokio::test]
    async fn test_update_photos_wrong_owner() {
        let repo = repo_with_tote();
        assert!(repo
            .update_photos("t1", "mallory", vec![])
            .await
            .unwrap()
            .is_none());
        let tote = repo.find_tote("t1", "alice").await.unwrap().unwrap();
        assert_eq!(tote.photos.len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("totes.db");
        let path = path.to_str().unwrap();
        {
            let repo = SqliteToteRepository::new(path).unwrap();
            repo.create_tote(&Tote {
                id: "t9".into(),
                user_id: "u".into(),
                name: "Books".into(),
                photos: vec![],
            })
            .unwrap();
        }
        let repo = SqliteToteRepository::new(path).unwrap();
        assert!(repo.find_tote("t9", "u").await.unwrap().is_some());
    }
}
