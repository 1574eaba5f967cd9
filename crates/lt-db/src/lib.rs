//! Storage layer for learning time reconciliation.
//!
//! Provides persistence for raw event logs and the reconciliation ledgers
//! using `rusqlite`.
//!
//! # Thread Safety
//!
//! [`Database`] wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Reconciliation sinks must be `Sync`, so [`SharedDatabase`] guards a
//! `Database` with a mutex. Two `SharedDatabase`s opened on the same file can
//! write concurrently; each connection waits on SQLite's lock for up to
//! [`BUSY_TIMEOUT`].
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps written by this crate are RFC 3339 TEXT with millisecond
//! precision (e.g., `2021-12-20T06:30:00.000Z`). Event `created_at` values are
//! stored exactly as received so legacy layouts survive until normalization.
//!
//! ## Ledgers
//!
//! - `learning_time_sessions`: one row per (student, session), replaced on
//!   every reconciliation
//! - `learning_time_daily`: per (student, day) totals, recomputed from the
//!   session rows in the same transaction
//! - `study_plan_item_completions`: per (student, study plan item)
//! - `lo_completeness`: per (student, session, learning objective)

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use lt_core::{
    CompletenessRecord, CompletenessRecorder, CorrelationKey, LearningTimeLedger,
    ReconciliationResult, RawEventLog, SinkError, StudentId, StudyPlanItemId,
    StudyPlanItemTracker,
};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How long a connection waits for another writer before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored day could not be parsed.
    #[error("invalid day {day} for student {student_id}")]
    InvalidDay {
        student_id: String,
        day: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A thread panicked while holding the connection.
    #[error("database lock poisoned")]
    LockPoisoned,
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// A raw event log as received.
///
/// The payload is kept as JSON text so malformed payloads are stored and only
/// rejected when normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub student_id: String,
    pub kind: String,
    pub created_at: String,
    pub payload: String,
}

impl RawEventLog for EventRecord {
    fn event_id(&self) -> &str {
        &self.event_id
    }

    fn student_id(&self) -> &str {
        &self.student_id
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn created_at(&self) -> &str {
        &self.created_at
    }

    fn payload(&self) -> &str {
        &self.payload
    }
}

/// Restricts which stored events are listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub student_id: Option<String>,
    pub session_id: Option<String>,
}

/// Learning time stored for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLearningTime {
    pub student_id: String,
    pub session_id: String,
    pub day: NaiveDate,
    pub learning_time_ms: i64,
    pub completed_at: String,
}

/// Total learning time for one student on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyLearningTime {
    pub student_id: String,
    pub day: NaiveDate,
    pub learning_time_ms: i64,
    /// Sessions contributing to the total, ordered by ID.
    pub sessions: Vec<String>,
}

/// A completed study plan item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyPlanItemCompletion {
    pub student_id: String,
    pub study_plan_item_id: String,
    pub completed_at: String,
}

/// A stored LO completeness row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletenessRow {
    pub student_id: String,
    pub session_id: String,
    pub lo_id: String,
    pub study_plan_item_id: Option<String>,
    pub first_completed_at: String,
    pub last_completed_at: String,
    pub completions: i64,
}

/// Row counts for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub events: i64,
    /// Distinct (student, session) pairs among stored events.
    pub correlation_keys: i64,
    pub session_ledger_rows: i64,
    pub daily_ledger_rows: i64,
    pub completed_items: i64,
    pub completeness_rows: i64,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened database");
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            -- Raw event logs, stored verbatim
            -- session_id: copied out of the payload when it decodes, for filtering
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                payload TEXT NOT NULL,
                session_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_events_student ON events(student_id);
            CREATE INDEX IF NOT EXISTS idx_events_session ON events(student_id, session_id);

            CREATE TABLE IF NOT EXISTS learning_time_sessions (
                student_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                day TEXT NOT NULL,
                learning_time_ms INTEGER NOT NULL,
                completed_at TEXT NOT NULL,
                PRIMARY KEY (student_id, session_id)
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_day ON learning_time_sessions(student_id, day);

            CREATE TABLE IF NOT EXISTS learning_time_daily (
                student_id TEXT NOT NULL,
                day TEXT NOT NULL,
                learning_time_ms INTEGER NOT NULL,
                session_count INTEGER NOT NULL,
                PRIMARY KEY (student_id, day)
            );

            CREATE TABLE IF NOT EXISTS study_plan_item_completions (
                student_id TEXT NOT NULL,
                study_plan_item_id TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                PRIMARY KEY (student_id, study_plan_item_id)
            );

            CREATE TABLE IF NOT EXISTS lo_completeness (
                student_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                lo_id TEXT NOT NULL,
                study_plan_item_id TEXT,
                first_completed_at TEXT NOT NULL,
                last_completed_at TEXT NOT NULL,
                completions INTEGER NOT NULL,
                PRIMARY KEY (student_id, session_id, lo_id)
            );
            ",
        )?;
        Ok(())
    }

    /// Inserts a batch of events, ignoring duplicates by ID.
    pub fn insert_events(&mut self, events: &[EventRecord]) -> Result<usize, DbError> {
        if events.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR IGNORE INTO events
                (id, student_id, type, created_at, payload, session_id)
                VALUES (?, ?, ?, ?, ?, ?)
                ",
            )?;
            for event in events {
                inserted += stmt.execute(params![
                    event.event_id,
                    event.student_id,
                    event.kind,
                    event.created_at,
                    event.payload,
                    payload_session_id(&event.payload),
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(received = events.len(), inserted, "stored events");
        Ok(inserted)
    }

    /// Lists events matching `filter` in ingestion order.
    pub fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, student_id, type, created_at, payload
            FROM events
            WHERE (?1 IS NULL OR student_id = ?1)
              AND (?2 IS NULL OR session_id = ?2)
            ORDER BY rowid ASC
            ",
        )?;
        let rows = stmt.query_map(params![filter.student_id, filter.session_id], |row| {
            Ok(EventRecord {
                event_id: row.get(0)?,
                student_id: row.get(1)?,
                kind: row.get(2)?,
                created_at: row.get(3)?,
                payload: row.get(4)?,
            })
        })?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Replaces a session's learning time and recomputes the affected days.
    ///
    /// Results without a completion write nothing. Returns whether a row was
    /// written.
    pub fn upsert_learning_time(
        &mut self,
        key: &CorrelationKey,
        result: &ReconciliationResult,
    ) -> Result<bool, DbError> {
        let Some(completed_at) = result.completed_at else {
            tracing::debug!(key = %key, "no completion, ledger untouched");
            return Ok(false);
        };
        let student_id = key.student_id.as_str();
        let session_id = key.session_id.as_str();
        let day = completed_at.date_naive().format(DAY_FORMAT).to_string();

        // Reads before writing, so take the write lock up front.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let previous_day: Option<String> = tx
            .query_row(
                "SELECT day FROM learning_time_sessions WHERE student_id = ? AND session_id = ?",
                params![student_id, session_id],
                |row| row.get(0),
            )
            .optional()?;

        tx.execute(
            "
            INSERT INTO learning_time_sessions
            (student_id, session_id, day, learning_time_ms, completed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(student_id, session_id) DO UPDATE SET
                day = excluded.day,
                learning_time_ms = excluded.learning_time_ms,
                completed_at = excluded.completed_at
            ",
            params![
                student_id,
                session_id,
                day,
                result.learning_time_ms(),
                format_timestamp(completed_at),
            ],
        )?;

        recompute_daily(&tx, student_id, &day)?;
        if let Some(previous) = previous_day.filter(|previous| *previous != day) {
            recompute_daily(&tx, student_id, &previous)?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// Marks a study plan item completed, keeping the latest completion time.
    pub fn mark_study_plan_item_completed(
        &mut self,
        student_id: &str,
        study_plan_item_id: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO study_plan_item_completions (student_id, study_plan_item_id, completed_at)
            VALUES (?, ?, ?)
            ON CONFLICT(student_id, study_plan_item_id) DO UPDATE SET
                completed_at = excluded.completed_at
            ",
            params![student_id, study_plan_item_id, format_timestamp(completed_at)],
        )?;
        Ok(())
    }

    /// Upserts completeness records keyed by (student, session, LO).
    pub fn upsert_completeness(&mut self, records: &[CompletenessRecord]) -> Result<usize, DbError> {
        if records.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO lo_completeness
                (student_id, session_id, lo_id, study_plan_item_id,
                 first_completed_at, last_completed_at, completions)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(student_id, session_id, lo_id) DO UPDATE SET
                    study_plan_item_id = excluded.study_plan_item_id,
                    first_completed_at = excluded.first_completed_at,
                    last_completed_at = excluded.last_completed_at,
                    completions = excluded.completions
                ",
            )?;
            for record in records {
                written += stmt.execute(params![
                    record.student_id.as_str(),
                    record.session_id.as_str(),
                    record.lo_id.as_str(),
                    record.study_plan_item_id.as_ref().map(StudyPlanItemId::as_str),
                    format_timestamp(record.first_completed_at),
                    format_timestamp(record.last_completed_at),
                    record.completions,
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Returns the stored learning time for one session.
    pub fn session_learning_time(
        &self,
        student_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionLearningTime>, DbError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT day, learning_time_ms, completed_at
                FROM learning_time_sessions
                WHERE student_id = ? AND session_id = ?
                ",
                params![student_id, session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(day, learning_time_ms, completed_at)| {
            Ok(SessionLearningTime {
                student_id: student_id.to_string(),
                session_id: session_id.to_string(),
                day: parse_day(student_id, &day)?,
                learning_time_ms,
                completed_at,
            })
        })
        .transpose()
    }

    /// Lists a student's daily totals, ordered by day.
    ///
    /// `start` is inclusive and `end` exclusive; either may be open.
    pub fn daily_learning_time(
        &self,
        student_id: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyLearningTime>, DbError> {
        let start = start.map(|day| day.format(DAY_FORMAT).to_string());
        let end = end.map(|day| day.format(DAY_FORMAT).to_string());

        let mut sessions: HashMap<String, Vec<String>> = HashMap::new();
        {
            let mut stmt = self.conn.prepare(
                "
                SELECT day, session_id
                FROM learning_time_sessions
                WHERE student_id = ?1
                  AND (?2 IS NULL OR day >= ?2)
                  AND (?3 IS NULL OR day < ?3)
                ORDER BY day ASC, session_id ASC
                ",
            )?;
            let rows = stmt.query_map(params![student_id, start, end], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (day, session_id) = row?;
                sessions.entry(day).or_default().push(session_id);
            }
        }

        let mut stmt = self.conn.prepare(
            "
            SELECT day, learning_time_ms
            FROM learning_time_daily
            WHERE student_id = ?1
              AND (?2 IS NULL OR day >= ?2)
              AND (?3 IS NULL OR day < ?3)
            ORDER BY day ASC
            ",
        )?;
        let rows = stmt.query_map(params![student_id, start, end], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut days = Vec::new();
        for row in rows {
            let (day, learning_time_ms) = row?;
            days.push(DailyLearningTime {
                student_id: student_id.to_string(),
                day: parse_day(student_id, &day)?,
                learning_time_ms,
                sessions: sessions.remove(&day).unwrap_or_default(),
            });
        }
        Ok(days)
    }

    /// Lists a student's completed study plan items, ordered by item ID.
    pub fn completed_study_plan_items(
        &self,
        student_id: &str,
    ) -> Result<Vec<StudyPlanItemCompletion>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT study_plan_item_id, completed_at
            FROM study_plan_item_completions
            WHERE student_id = ?
            ORDER BY study_plan_item_id ASC
            ",
        )?;
        let rows = stmt.query_map([student_id], |row| {
            Ok(StudyPlanItemCompletion {
                student_id: student_id.to_string(),
                study_plan_item_id: row.get(0)?,
                completed_at: row.get(1)?,
            })
        })?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Lists a student's completeness rows, ordered by session then LO.
    pub fn lo_completeness(&self, student_id: &str) -> Result<Vec<CompletenessRow>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT session_id, lo_id, study_plan_item_id,
                   first_completed_at, last_completed_at, completions
            FROM lo_completeness
            WHERE student_id = ?
            ORDER BY session_id ASC, lo_id ASC
            ",
        )?;
        let rows = stmt.query_map([student_id], |row| {
            Ok(CompletenessRow {
                student_id: student_id.to_string(),
                session_id: row.get(0)?,
                lo_id: row.get(1)?,
                study_plan_item_id: row.get(2)?,
                first_completed_at: row.get(3)?,
                last_completed_at: row.get(4)?,
                completions: row.get(5)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Number of distinct learning objectives a student has finished.
    pub fn finished_lo_count(&self, student_id: &str) -> Result<i64, DbError> {
        let count = self.conn.query_row(
            "SELECT COUNT(DISTINCT lo_id) FROM lo_completeness WHERE student_id = ?",
            [student_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Counts rows across the store.
    pub fn stats(&self) -> Result<StoreStats, DbError> {
        let count = |sql: &str| -> Result<i64, DbError> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };
        Ok(StoreStats {
            events: count("SELECT COUNT(*) FROM events")?,
            correlation_keys: count(
                "
                SELECT COUNT(*) FROM (
                    SELECT DISTINCT student_id, session_id
                    FROM events
                    WHERE session_id IS NOT NULL
                )
                ",
            )?,
            session_ledger_rows: count("SELECT COUNT(*) FROM learning_time_sessions")?,
            daily_ledger_rows: count("SELECT COUNT(*) FROM learning_time_daily")?,
            completed_items: count("SELECT COUNT(*) FROM study_plan_item_completions")?,
            completeness_rows: count("SELECT COUNT(*) FROM lo_completeness")?,
        })
    }
}

/// Rebuilds one (student, day) total from its session rows.
fn recompute_daily(conn: &Connection, student_id: &str, day: &str) -> Result<(), DbError> {
    conn.execute(
        "DELETE FROM learning_time_daily WHERE student_id = ? AND day = ?",
        params![student_id, day],
    )?;
    conn.execute(
        "
        INSERT INTO learning_time_daily (student_id, day, learning_time_ms, session_count)
        SELECT student_id, day, SUM(learning_time_ms), COUNT(*)
        FROM learning_time_sessions
        WHERE student_id = ?1 AND day = ?2
        GROUP BY student_id, day
        ",
        params![student_id, day],
    )?;
    Ok(())
}

fn payload_session_id(payload: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    value
        .get("session_id")
        .and_then(serde_json::Value::as_str)
        .filter(|session_id| !session_id.trim().is_empty())
        .map(str::to_string)
}

fn parse_day(student_id: &str, day: &str) -> Result<NaiveDate, DbError> {
    NaiveDate::parse_from_str(day, DAY_FORMAT).map_err(|source| DbError::InvalidDay {
        student_id: student_id.to_string(),
        day: day.to_string(),
        source,
    })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A [`Database`] usable as a reconciliation sink from several threads.
pub struct SharedDatabase {
    inner: Mutex<Database>,
}

impl SharedDatabase {
    pub const fn new(db: Database) -> Self {
        Self {
            inner: Mutex::new(db),
        }
    }

    /// Locks the connection for direct use.
    pub fn lock(&self) -> Result<MutexGuard<'_, Database>, DbError> {
        self.inner.lock().map_err(|_| DbError::LockPoisoned)
    }
}

impl From<DbError> for SinkError {
    fn from(err: DbError) -> Self {
        Self::with_source(err.to_string(), err)
    }
}

impl LearningTimeLedger for SharedDatabase {
    fn upsert_learning_time(
        &self,
        key: &CorrelationKey,
        result: &ReconciliationResult,
    ) -> Result<(), SinkError> {
        self.lock()?.upsert_learning_time(key, result)?;
        Ok(())
    }
}

impl StudyPlanItemTracker for SharedDatabase {
    fn mark_completed(
        &self,
        student_id: &StudentId,
        study_plan_item_id: &StudyPlanItemId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        self.lock()?.mark_study_plan_item_completed(
            student_id.as_str(),
            study_plan_item_id.as_str(),
            completed_at,
        )?;
        Ok(())
    }
}

impl CompletenessRecorder for SharedDatabase {
    fn record_completeness(&self, records: &[CompletenessRecord]) -> Result<usize, SinkError> {
        Ok(self.lock()?.upsert_completeness(records)?)
    }
}
