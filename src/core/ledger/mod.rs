use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tokio::sync::Mutex;
use tracing::warn;

use crate::core::types::{Fingerprint, PlatformKind, PostOutcome, PostStatus, RunRecord};
use crate::platform::{NativePlatform, Platform};

/// Append-only record of publish attempts, and the single source of truth
/// for duplicate decisions. All pipeline workers mutate state through this
/// type only.
///
/// The exactly-one-`posted` guarantee per (fingerprint, destination) is
/// enforced twice: in-process by the per-pair lock handed to the runner,
/// and at rest by a partial unique index over posted rows, which holds
/// across processes and crash-restart.
pub struct PostingLedger {
    db: Arc<Mutex<Connection>>,
    pair_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Row filter for `history`.
#[derive(Debug, Default, Clone)]
pub struct HistoryFilter {
    pub bot_id: Option<String>,
    pub fingerprint: Option<String>,
    pub destination: Option<PlatformKind>,
    pub limit: usize,
}

impl PostingLedger {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            NativePlatform::restrict_dir_permissions(parent);
        }
        let db = Connection::open(path)
            .with_context(|| format!("opening ledger at {}", path.display()))?;
        NativePlatform::restrict_file_permissions(path);
        Self::bootstrap(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            pair_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::bootstrap(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            pair_locks: Mutex::new(HashMap::new()),
        })
    }

    fn bootstrap(db: &Connection) -> Result<()> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS post_outcomes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bot_id TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                destination TEXT NOT NULL,
                status TEXT NOT NULL,
                post_id TEXT,
                error_kind TEXT,
                attempted_at TEXT NOT NULL
            )",
            [],
        )?;
        // At most one posted row may ever exist for a pair, no matter how
        // many processes share the database file.
        db.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS posted_once
             ON post_outcomes(fingerprint, destination) WHERE status = 'posted'",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS outcomes_by_pair
             ON post_outcomes(fingerprint, destination)",
            [],
        )?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS run_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                bot_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                detail TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Serialize check → publish → record for one (fingerprint,
    /// destination) pair. The runner holds this lock across the whole
    /// attempt; two workers racing on the same pair queue up behind it.
    pub async fn pair_lock(&self, fingerprint: &str, destination: PlatformKind) -> Arc<Mutex<()>> {
        let key = format!("{}:{}", fingerprint, destination);
        let mut locks = self.pair_locks.lock().await;
        locks.entry(key).or_default().clone()
    }

    pub async fn has_posted(&self, fingerprint: &str, destination: PlatformKind) -> Result<bool> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT EXISTS(
                SELECT 1 FROM post_outcomes
                WHERE fingerprint = ?1 AND destination = ?2 AND status = 'posted'
            )",
        )?;
        let exists: i64 = stmt.query_row(params![fingerprint, destination.to_string()], |row| {
            row.get(0)
        })?;
        Ok(exists != 0)
    }

    /// True when every destination in the slice already has a posted row.
    /// An empty slice is vacuously false so a destination-less run still
    /// reports its items.
    pub async fn all_posted(
        &self,
        fingerprint: &str,
        destinations: &[PlatformKind],
    ) -> Result<bool> {
        if destinations.is_empty() {
            return Ok(false);
        }
        for dest in destinations {
            if !self.has_posted(fingerprint, *dest).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Append one outcome. Returns the status actually recorded: a
    /// `posted` row that loses the unique-index race degrades to
    /// `skipped_duplicate` rather than erroring the run.
    pub async fn record(&self, outcome: &PostOutcome) -> Result<PostStatus> {
        let db = self.db.lock().await;
        let result = db.execute(
            "INSERT INTO post_outcomes
                (bot_id, fingerprint, destination, status, post_id, error_kind, attempted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                outcome.bot_id,
                outcome.fingerprint.as_str(),
                outcome.destination.to_string(),
                outcome.status.to_string(),
                outcome.post_id,
                outcome.error_kind,
                outcome.attempted_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(outcome.status),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
                    && outcome.status == PostStatus::Posted =>
            {
                warn!(
                    fingerprint = outcome.fingerprint.as_str(),
                    destination = %outcome.destination,
                    "pair already posted elsewhere; recording duplicate skip"
                );
                db.execute(
                    "INSERT INTO post_outcomes
                        (bot_id, fingerprint, destination, status, post_id, error_kind, attempted_at)
                     VALUES (?1, ?2, ?3, 'skipped_duplicate', NULL, NULL, ?4)",
                    params![
                        outcome.bot_id,
                        outcome.fingerprint.as_str(),
                        outcome.destination.to_string(),
                        outcome.attempted_at.to_rfc3339(),
                    ],
                )?;
                Ok(PostStatus::SkippedDuplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn history(&self, filter: HistoryFilter) -> Result<Vec<PostOutcome>> {
        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        let db = self.db.lock().await;
        let mut sql = String::from(
            "SELECT bot_id, fingerprint, destination, status, post_id, error_kind, attempted_at
             FROM post_outcomes WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(bot_id) = &filter.bot_id {
            args.push(bot_id.clone());
            sql.push_str(&format!(" AND bot_id = ?{}", args.len()));
        }
        if let Some(fp) = &filter.fingerprint {
            args.push(fp.clone());
            sql.push_str(&format!(" AND fingerprint = ?{}", args.len()));
        }
        if let Some(dest) = &filter.destination {
            args.push(dest.to_string());
            sql.push_str(&format!(" AND destination = ?{}", args.len()));
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", limit));

        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_outcome)?;
        let mut outcomes = Vec::new();
        for row in rows {
            outcomes.push(row?);
        }
        Ok(outcomes)
    }

    /// Persist a finished run. Rows are append-only; reruns of the same
    /// slot insert fresh rows.
    pub async fn record_run(&self, record: &RunRecord) -> Result<()> {
        let detail = serde_json::to_string(record)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO run_records (run_id, bot_id, status, started_at, ended_at, detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.run_id,
                record.bot_id,
                record.status.to_string(),
                record.started_at.to_rfc3339(),
                record.ended_at.to_rfc3339(),
                detail,
            ],
        )?;
        Ok(())
    }

    /// Note a trigger that found its bot still running. Informational,
    /// never an error.
    pub async fn record_overlap_skip(&self, bot_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO run_records (run_id, bot_id, status, started_at, ended_at, detail)
             VALUES (?1, ?2, 'skipped_overlap', ?3, ?3, '{}')",
            params![uuid::Uuid::new_v4().to_string(), bot_id, now],
        )?;
        Ok(())
    }

    /// Most recent run rows for a bot (or all bots), newest first.
    /// `skipped_overlap` markers come back as (status, started_at, None).
    pub async fn recent_runs(
        &self,
        bot_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, String, Option<RunRecord>)>> {
        let limit = if limit == 0 { 20 } else { limit };
        let db = self.db.lock().await;
        let mut sql = String::from("SELECT status, started_at, detail FROM run_records");
        let mut args: Vec<String> = Vec::new();
        if let Some(bot_id) = bot_id {
            args.push(bot_id.to_string());
            sql.push_str(" WHERE bot_id = ?1");
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", limit));

        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut runs = Vec::new();
        for row in rows {
            let (status, started_at, detail) = row?;
            let record = serde_json::from_str(&detail).ok();
            runs.push((status, started_at, record));
        }
        Ok(runs)
    }
}

fn row_to_outcome(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostOutcome> {
    let destination: String = row.get(2)?;
    let status: String = row.get(3)?;
    let attempted_at: String = row.get(6)?;
    Ok(PostOutcome {
        bot_id: row.get(0)?,
        fingerprint: Fingerprint::from_hex(row.get(1)?),
        destination: PlatformKind::from_str(&destination)
            .map_err(|e| conversion_error(2, e))?,
        status: PostStatus::from_str(&status).map_err(|e| conversion_error(3, e))?,
        post_id: row.get(4)?,
        error_kind: row.get(5)?,
        attempted_at: DateTime::parse_from_rfc3339(&attempted_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(6, e.to_string()))?,
    })
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Fingerprint;

    fn fp(tag: &str) -> Fingerprint {
        Fingerprint::from_hex(format!("{:0<64}", tag))
    }

    #[tokio::test]
    async fn posted_then_duplicate_posted_degrades_to_skip() {
        let ledger = PostingLedger::open_in_memory().unwrap();
        let fingerprint = fp("a1");

        let first = PostOutcome::posted("bot", &fingerprint, PlatformKind::Twitter, "100".into());
        assert_eq!(ledger.record(&first).await.unwrap(), PostStatus::Posted);

        // A second posted row for the same pair must not survive as posted.
        let second = PostOutcome::posted("bot2", &fingerprint, PlatformKind::Twitter, "101".into());
        assert_eq!(
            ledger.record(&second).await.unwrap(),
            PostStatus::SkippedDuplicate
        );

        assert!(
            ledger
                .has_posted(fingerprint.as_str(), PlatformKind::Twitter)
                .await
                .unwrap()
        );
        let rows = ledger
            .history(HistoryFilter {
                fingerprint: Some(fingerprint.as_str().to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let posted_rows = rows
            .iter()
            .filter(|o| o.status == PostStatus::Posted)
            .count();
        assert_eq!(posted_rows, 1);
    }

    #[tokio::test]
    async fn failed_attempts_do_not_mark_the_pair_posted() {
        let ledger = PostingLedger::open_in_memory().unwrap();
        let fingerprint = fp("b2");

        let outcome = PostOutcome::failed("bot", &fingerprint, PlatformKind::Reddit, "auth");
        ledger.record(&outcome).await.unwrap();

        assert!(
            !ledger
                .has_posted(fingerprint.as_str(), PlatformKind::Reddit)
                .await
                .unwrap()
        );
        // A later posted attempt is still allowed.
        let retry = PostOutcome::posted("bot", &fingerprint, PlatformKind::Reddit, "7".into());
        assert_eq!(ledger.record(&retry).await.unwrap(), PostStatus::Posted);
    }

    #[tokio::test]
    async fn all_posted_requires_every_destination() {
        let ledger = PostingLedger::open_in_memory().unwrap();
        let fingerprint = fp("c3");
        let dests = [PlatformKind::Twitter, PlatformKind::Reddit];

        ledger
            .record(&PostOutcome::posted(
                "bot",
                &fingerprint,
                PlatformKind::Twitter,
                "1".into(),
            ))
            .await
            .unwrap();
        assert!(!ledger.all_posted(fingerprint.as_str(), &dests).await.unwrap());

        ledger
            .record(&PostOutcome::posted(
                "bot",
                &fingerprint,
                PlatformKind::Reddit,
                "2".into(),
            ))
            .await
            .unwrap();
        assert!(ledger.all_posted(fingerprint.as_str(), &dests).await.unwrap());
        assert!(!ledger.all_posted(fingerprint.as_str(), &[]).await.unwrap());
    }

    #[tokio::test]
    async fn pair_lock_is_shared_per_pair() {
        let ledger = PostingLedger::open_in_memory().unwrap();
        let a1 = ledger.pair_lock("aaa", PlatformKind::Twitter).await;
        let a2 = ledger.pair_lock("aaa", PlatformKind::Twitter).await;
        let b = ledger.pair_lock("aaa", PlatformKind::Reddit).await;
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }

    #[tokio::test]
    async fn overlap_skips_show_up_in_recent_runs() {
        let ledger = PostingLedger::open_in_memory().unwrap();
        ledger.record_overlap_skip("bot-9").await.unwrap();
        let runs = ledger.recent_runs(Some("bot-9"), 5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, "skipped_overlap");
        assert!(runs[0].2.is_none());
    }
}
