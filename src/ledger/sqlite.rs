//! SQLite usage ledger, one row per server key.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::traits::{UsageLedger, UsageRecord};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteUsageLedger {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteUsageLedger {
    /// Open (or create) `usage.db` inside `data_dir`.
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        Self::open(&data_dir.join("usage.db"))
    }

    /// Open a ledger at an explicit database path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open usage ledger: {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS usage (
                 key             TEXT PRIMARY KEY,
                 minutes_played  INTEGER NOT NULL,
                 last_reset_date TEXT NOT NULL,
                 updated_at      TEXT NOT NULL
             );",
        )
        .context("Failed to initialize usage ledger schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .context("usage ledger task panicked")?
    }
}

#[async_trait]
impl UsageLedger for SqliteUsageLedger {
    async fn get(&self, key: &str) -> Result<Option<UsageRecord>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT minutes_played, last_reset_date FROM usage WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            let Some((minutes, date)) = row else {
                return Ok(None);
            };
            let last_reset_date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
                .with_context(|| format!("Corrupt last_reset_date for {key}: {date}"))?;
            Ok(Some(UsageRecord {
                minutes_played: u32::try_from(minutes.max(0)).unwrap_or(u32::MAX),
                last_reset_date,
            }))
        })
        .await
    }

    async fn set(&self, key: &str, record: &UsageRecord) -> Result<()> {
        let key = key.to_string();
        let record = *record;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO usage (key, minutes_played, last_reset_date, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     minutes_played = excluded.minutes_played,
                     last_reset_date = excluded.last_reset_date,
                     updated_at = excluded.updated_at",
                params![
                    key,
                    i64::from(record.minutes_played),
                    record.last_reset_date.format(DATE_FORMAT).to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn increment(&self, key: &str, delta: u32) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE usage SET minutes_played = minutes_played + ?1, updated_at = ?2
                 WHERE key = ?3",
                params![i64::from(delta), Utc::now().to_rfc3339(), key],
            )?;
            if changed == 0 {
                bail!("usage record not found: {key}");
            }
            Ok(())
        })
        .await
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
