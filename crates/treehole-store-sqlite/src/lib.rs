#![allow(clippy::missing_errors_doc)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use time::OffsetDateTime;
use treehole_core::{
    format_rfc3339, now_utc, parse_rfc3339_utc, truncate_to_seconds, utc_day, DailyLimit, Letter,
    LetterId, NewLetter, ReplyUpdate, SettingKey,
};

const SCHEMA_VERSION: i64 = 1;
const PREVIEW_CHARS: usize = 120;

const SCHEMA_V1: &str = r"
CREATE TABLE IF NOT EXISTS letters (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  content TEXT NOT NULL,
  origin TEXT NOT NULL,
  created_at TEXT NOT NULL,
  created_day TEXT NOT NULL,
  reply_text TEXT,
  reply_created_at TEXT,
  CHECK ((reply_text IS NULL) = (reply_created_at IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_letters_origin_day
  ON letters(origin, created_day);
CREATE INDEX IF NOT EXISTS idx_letters_created_at
  ON letters(created_at DESC, id DESC);

CREATE TABLE IF NOT EXISTS settings (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
";

const LETTER_COLUMNS: &str =
    "id, content, origin, created_at, reply_text, reply_created_at";

/// Result of a quota-checked submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted(Letter),
    QuotaExceeded { daily_limit: DailyLimit },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
}

/// Condensed letter row for operator reports.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct LetterSummary {
    pub id: LetterId,
    pub created_at: String,
    #[serde(rename = "ip_address")]
    pub origin: String,
    pub has_reply: bool,
    pub preview: String,
}

/// Process-wide handle to the letters database.
///
/// Created once at startup by [`TreeholeStore::connect`], cloned into every
/// request. Each operation opens its own connection, so all coordination
/// between concurrent requests happens inside `SQLite`.
#[derive(Debug, Clone)]
pub struct TreeholeStore {
    db_path: Arc<PathBuf>,
}

impl TreeholeStore {
    /// Opens the database at `db_path` and applies the schema. Fails if the
    /// schema cannot be created.
    pub fn connect(db_path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::unmigrated(db_path);
        store.open()?.migrate()?;
        Ok(store)
    }

    /// Handle that has not touched the database yet.
    #[must_use]
    pub fn unmigrated(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Arc::new(db_path.into()),
        }
    }

    pub fn open(&self) -> Result<SqliteTreeholeStore> {
        SqliteTreeholeStore::open(&self.db_path)
    }

    /// Folds the write-ahead log back into the main database file.
    pub fn shutdown(&self) -> Result<()> {
        self.open()?.checkpoint()
    }
}

pub struct SqliteTreeholeStore {
    conn: Connection,
}

impl SqliteTreeholeStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA busy_timeout = 5000;
             PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn.execute_batch(SCHEMA_V1).context("failed to apply letters schema")?;

        let now = format_rfc3339(truncate_to_seconds(now_utc()))?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now],
            )
            .context("failed to register letters schema migration")?;

        Ok(())
    }

    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let has_migrations = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
                [],
                |_| Ok(()),
            )
            .optional()
            .context("failed to query sqlite_master")?
            .is_some();

        let current_version = if has_migrations {
            self.conn
                .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
                    row.get::<_, i64>(0)
                })
                .context("failed to read schema version")?
        } else {
            0
        };

        Ok(SchemaStatus {
            current_version,
            target_version: SCHEMA_VERSION,
        })
    }

    /// Reads a setting, first persisting the built-in default when the row is
    /// absent. Racing first reads are harmless: the default insert is a no-op
    /// once any row exists.
    pub fn get_setting(&mut self, key: SettingKey) -> Result<String> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start settings transaction")?;
        let value = ensure_setting(&tx, key)?;
        tx.commit().context("failed to commit settings transaction")?;
        Ok(value)
    }

    pub fn set_setting(&self, key: SettingKey, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO settings(key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key.as_str(), value],
            )
            .with_context(|| format!("failed to upsert setting {}", key.as_str()))?;
        Ok(())
    }

    pub fn list_settings(&self) -> Result<Vec<SettingRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM settings ORDER BY key ASC")
            .context("failed to prepare settings listing")?;
        let mut rows = stmt.query([])?;

        let mut settings = Vec::new();
        while let Some(row) = rows.next()? {
            settings.push(SettingRow {
                key: row.get(0)?,
                value: row.get(1)?,
            });
        }
        Ok(settings)
    }

    /// Current daily limit. A malformed stored value reads as the default but
    /// is left in place.
    pub fn daily_limit(&mut self) -> Result<DailyLimit> {
        let raw = self.get_setting(SettingKey::DailyLimit)?;
        Ok(DailyLimit::parse_setting(&raw).unwrap_or_default())
    }

    pub fn set_daily_limit(&self, limit: DailyLimit) -> Result<()> {
        self.set_setting(SettingKey::DailyLimit, &limit.to_string())
    }

    pub fn submit_letter(&mut self, letter: &NewLetter) -> Result<SubmissionOutcome> {
        self.submit_letter_at(letter, now_utc())
    }

    /// Inserts `letter` unless its origin already reached the daily limit for
    /// the UTC day of `at`.
    ///
    /// The limit lookup, the count and the insert share one `BEGIN IMMEDIATE`
    /// transaction, and the insert itself is conditional on the count. Writers
    /// therefore serialize on the database write lock and the number of
    /// accepted letters per origin and day never exceeds the limit.
    pub fn submit_letter_at(
        &mut self,
        letter: &NewLetter,
        at: OffsetDateTime,
    ) -> Result<SubmissionOutcome> {
        let created_at = truncate_to_seconds(at);
        let created_at_text = format_rfc3339(created_at)?;
        let created_day = utc_day(created_at);

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start submission transaction")?;

        let raw_limit = ensure_setting(&tx, SettingKey::DailyLimit)?;
        let daily_limit = DailyLimit::parse_setting(&raw_limit).unwrap_or_default();

        let inserted = tx
            .execute(
                "INSERT INTO letters(content, origin, created_at, created_day)
                 SELECT ?1, ?2, ?3, ?4
                 WHERE (
                   SELECT COUNT(*) FROM letters WHERE origin = ?2 AND created_day = ?4
                 ) < ?5",
                params![
                    letter.content,
                    letter.origin,
                    created_at_text,
                    created_day,
                    daily_limit.get()
                ],
            )
            .context("failed to insert letter")?;

        if inserted == 0 {
            tx.commit().context("failed to commit submission transaction")?;
            return Ok(SubmissionOutcome::QuotaExceeded { daily_limit });
        }

        let id = LetterId(tx.last_insert_rowid());
        tx.commit().context("failed to commit submission transaction")?;

        Ok(SubmissionOutcome::Accepted(Letter {
            id,
            content: letter.content.clone(),
            origin: letter.origin.clone(),
            created_at,
            reply_text: None,
            reply_created_at: None,
        }))
    }

    pub fn set_reply(&self, id: LetterId, update: &ReplyUpdate) -> Result<bool> {
        self.set_reply_at(id, update, now_utc())
    }

    /// Overwrites the reply state of a letter in one statement. Returns whether
    /// a row matched; an unknown id is not an error.
    pub fn set_reply_at(
        &self,
        id: LetterId,
        update: &ReplyUpdate,
        at: OffsetDateTime,
    ) -> Result<bool> {
        let replied_at = match update {
            ReplyUpdate::Set(_) => Some(format_rfc3339(truncate_to_seconds(at))?),
            ReplyUpdate::Clear => None,
        };

        let updated = self
            .conn
            .execute(
                "UPDATE letters SET reply_text = ?1, reply_created_at = ?2 WHERE id = ?3",
                params![update.text(), replied_at, id.0],
            )
            .with_context(|| format!("failed to update reply for letter {id}"))?;

        Ok(updated > 0)
    }

    pub fn get_letter(&self, id: LetterId) -> Result<Option<Letter>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {LETTER_COLUMNS} FROM letters WHERE id = ?1"))
            .context("failed to prepare letter lookup")?;
        let mut rows = stmt.query(params![id.0])?;

        match rows.next()? {
            Some(row) => Ok(Some(letter_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Every letter, newest first.
    pub fn list_letters(&self) -> Result<Vec<Letter>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {LETTER_COLUMNS} FROM letters ORDER BY created_at DESC, id DESC"
            ))
            .context("failed to prepare letters listing")?;
        let mut rows = stmt.query([])?;

        let mut letters = Vec::new();
        while let Some(row) = rows.next()? {
            letters.push(letter_from_row(row)?);
        }
        Ok(letters)
    }

    pub fn recent_letter_summaries(&self, limit: usize) -> Result<Vec<LetterSummary>> {
        let limit = i64::try_from(limit).with_context(|| format!("invalid limit: {limit}"))?;
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, created_at, origin, reply_text IS NOT NULL, content
                 FROM letters
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?1",
            )
            .context("failed to prepare recent letters query")?;
        let mut rows = stmt.query(params![limit])?;

        let mut summaries = Vec::new();
        while let Some(row) = rows.next()? {
            let content: String = row.get(4)?;
            summaries.push(LetterSummary {
                id: LetterId(row.get(0)?),
                created_at: row.get(1)?,
                origin: row.get(2)?,
                has_reply: row.get(3)?,
                preview: content.chars().take(PREVIEW_CHARS).collect(),
            });
        }
        Ok(summaries)
    }

    pub fn checkpoint(&self) -> Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .context("failed to checkpoint write-ahead log")?;
        Ok(())
    }
}

fn ensure_setting(conn: &Connection, key: SettingKey) -> Result<String> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES (?1, ?2) ON CONFLICT(key) DO NOTHING",
        params![key.as_str(), key.default_value()],
    )
    .with_context(|| format!("failed to materialize default for setting {}", key.as_str()))?;

    conn.query_row("SELECT value FROM settings WHERE key = ?1", params![key.as_str()], |row| {
        row.get::<_, String>(0)
    })
    .with_context(|| format!("failed to read setting {}", key.as_str()))
}

fn letter_from_row(row: &Row<'_>) -> Result<Letter> {
    let created_at: String = row.get(3)?;
    let reply_created_at: Option<String> = row.get(5)?;

    Ok(Letter {
        id: LetterId(row.get(0)?),
        content: row.get(1)?,
        origin: row.get(2)?,
        created_at: parse_rfc3339_utc(&created_at)
            .with_context(|| format!("invalid stored created_at: {created_at}"))?,
        reply_text: row.get(4)?,
        reply_created_at: reply_created_at
            .as_deref()
            .map(parse_rfc3339_utc)
            .transpose()
            .context("invalid stored reply_created_at")?,
    })
}
