use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use tokio::sync::Mutex;
use tracing::info;

use crate::core::types::BotConfig;
use crate::platform::{NativePlatform, Platform};

/// Durable home of bot configurations. The pipeline only ever reads a
/// snapshot per run; edits and clones land here and apply on the next
/// trigger.
pub struct BotStore {
    db: Arc<Mutex<Connection>>,
}

impl BotStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            NativePlatform::restrict_dir_permissions(parent);
        }
        let db = Connection::open(path)
            .with_context(|| format!("opening bot store at {}", path.display()))?;
        NativePlatform::restrict_file_permissions(path);
        Self::bootstrap(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::bootstrap(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    fn bootstrap(db: &Connection) -> Result<()> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS bots (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                config TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                last_run_at TEXT,
                last_run_summary TEXT
            )",
            [],
        )?;
        Ok(())
    }

    /// Raw connection handle, shared with the vault so one database file
    /// holds both bots and credentials.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.db.clone()
    }

    pub async fn save(&self, config: &BotConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO bots (id, name, config) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name=excluded.name, config=excluded.config",
            params![config.id, config.name, json],
        )?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<BotConfig>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT config FROM bots ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut bots = Vec::new();
        for row in rows {
            bots.push(serde_json::from_str(&row?)?);
        }
        Ok(bots)
    }

    /// Look a bot up by id first, then by name.
    pub async fn find(&self, id_or_name: &str) -> Result<Option<BotConfig>> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare("SELECT config FROM bots WHERE id = ?1 OR name = ?1 LIMIT 1")?;
        let mut rows = stmt.query([id_or_name])?;
        match rows.next()? {
            Some(row) => {
                let json: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    pub async fn remove(&self, id_or_name: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let deleted = db.execute(
            "DELETE FROM bots WHERE id = ?1 OR name = ?1",
            [id_or_name],
        )?;
        Ok(deleted > 0)
    }

    /// Replicate an existing bot under a new name. The clone gets a fresh
    /// id and schedule anchor and shares nothing with the original beyond
    /// the common posting ledger.
    pub async fn clone_bot(&self, id_or_name: &str, new_name: &str) -> Result<BotConfig> {
        let source = self
            .find(id_or_name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no bot matching '{}'", id_or_name))?;
        let clone = source.replicate(new_name);
        self.save(&clone).await?;
        info!(source = %source.name, clone = %clone.name, "bot replicated");
        Ok(clone)
    }

    /// Write-back of the most recent run, shown by `bots list`.
    pub async fn record_last_run(&self, bot_id: &str, at: &str, summary: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE bots SET last_run_at = ?2, last_run_summary = ?3 WHERE id = ?1",
            params![bot_id, at, summary],
        )?;
        Ok(())
    }

    pub async fn last_run_summary(&self, bot_id: &str) -> Result<Option<(String, String)>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT last_run_at, last_run_summary FROM bots
             WHERE id = ?1 AND last_run_at IS NOT NULL",
        )?;
        let mut rows = stmt.query([bot_id])?;
        match rows.next()? {
            Some(row) => Ok(Some((row.get(0)?, row.get(1)?))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        DestinationSpec, PlatformKind, SourceKind, SourceSpec, TransformOptions,
    };

    fn sample_bot(name: &str) -> BotConfig {
        BotConfig {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            topics: vec!["rust".into(), "systems".into()],
            sources: vec![SourceSpec {
                kind: SourceKind::Feed,
                identifier: "https://example.com/rss".into(),
                max_items: 5,
            }],
            destinations: vec![DestinationSpec {
                platform: PlatformKind::Twitter,
                enabled: true,
                credential_ref: "twitter-main".into(),
            }],
            schedule: "0 0 */6 * * *".into(),
            transform: TransformOptions::default(),
        }
    }

    #[tokio::test]
    async fn save_find_roundtrip_by_id_and_name() {
        let store = BotStore::open_in_memory().unwrap();
        let bot = sample_bot("rust-news");
        store.save(&bot).await.unwrap();

        let by_id = store.find(&bot.id).await.unwrap().unwrap();
        let by_name = store.find("rust-news").await.unwrap().unwrap();
        assert_eq!(by_id.id, bot.id);
        assert_eq!(by_name.id, bot.id);
        assert_eq!(by_id.topics, bot.topics);
    }

    #[tokio::test]
    async fn clone_creates_independent_entry() {
        let store = BotStore::open_in_memory().unwrap();
        let bot = sample_bot("rust-news");
        store.save(&bot).await.unwrap();

        let clone = store.clone_bot("rust-news", "rust-news-eu").await.unwrap();
        assert_ne!(clone.id, bot.id);
        assert_eq!(clone.sources.len(), bot.sources.len());

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);

        // Removing the clone leaves the original untouched.
        assert!(store.remove("rust-news-eu").await.unwrap());
        assert!(store.find(&bot.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn last_run_write_back() {
        let store = BotStore::open_in_memory().unwrap();
        let bot = sample_bot("rust-news");
        store.save(&bot).await.unwrap();

        assert!(store.last_run_summary(&bot.id).await.unwrap().is_none());
        store
            .record_last_run(&bot.id, "2026-08-06T00:00:00Z", "completed: 3 items")
            .await
            .unwrap();
        let (at, summary) = store.last_run_summary(&bot.id).await.unwrap().unwrap();
        assert_eq!(at, "2026-08-06T00:00:00Z");
        assert!(summary.starts_with("completed"));
    }
}
