//! Append-only status history in SQLite, plus the change filter that
//! bounds what gets written.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::error::{Result, UptimizerError};
use crate::status::{CheckResult, EndpointStatus};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS status_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint_id TEXT NOT NULL,
    ts_ms INTEGER NOT NULL,
    status TEXT NOT NULL,
    status_code INTEGER,
    response_time_ms INTEGER,
    details TEXT
);
CREATE INDEX IF NOT EXISTS idx_status_history_endpoint_ts
    ON status_history (endpoint_id, ts_ms DESC);
";

/// A persisted status-change event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub endpoint_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: EndpointStatus,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub details: Option<String>,
}

/// A row returned from a range query, in chart-friendly shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySample {
    pub timestamp: DateTime<Utc>,
    pub status: EndpointStatus,
    pub response_time_ms: Option<u64>,
}

/// The most recently persisted observation for one endpoint. Lives only
/// in memory; after a restart the next observation is persisted again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedStatus {
    pub status: EndpointStatus,
    pub details: Option<String>,
}

/// Decide whether an observation warrants a new history record.
///
/// Persists on first observation, on every UP sample (keeps response-time
/// samples flowing while steadily up), on any status transition, and when
/// a DOWN/ERROR state stays the same but the failure details change.
pub fn should_persist(prev: Option<&SavedStatus>, curr: &CheckResult) -> bool {
    let Some(prev) = prev else {
        return true;
    };
    if curr.status == EndpointStatus::Up {
        return true;
    }
    if curr.status != prev.status {
        return true;
    }
    matches!(
        curr.status,
        EndpointStatus::Down | EndpointStatus::Error
    ) && curr.details != prev.details
}

/// SQLite-backed history store behind a single write connection.
///
/// Every operation returns `StoreUnavailable` instead of panicking when
/// the store could not be opened; the check cycle and the API both
/// degrade gracefully.
pub struct HistoryStore {
    conn: Option<Mutex<Connection>>,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl HistoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Some(Mutex::new(conn)),
        })
    }

    /// A store that rejects every operation; used when SQLite cannot be
    /// opened or persistence is disabled.
    pub fn disabled() -> Self {
        Self { conn: None }
    }

    /// Cheap readiness check so callers can skip persistence attempts
    /// without paying for a failed call.
    pub fn is_ready(&self) -> bool {
        self.conn.is_some()
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        match &self.conn {
            Some(conn) => {
                let guard = conn.lock().await;
                f(&guard)
            }
            None => Err(UptimizerError::StoreUnavailable),
        }
    }

    /// Durably insert one record.
    pub async fn append(&self, record: &HistoryRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO status_history
                    (endpoint_id, ts_ms, status, status_code, response_time_ms, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.endpoint_id,
                    record.timestamp.timestamp_millis(),
                    record.status.as_str(),
                    record.status_code,
                    record.response_time_ms,
                    record.details,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Latest persisted status strictly before `instant`.
    pub async fn most_recent_before(
        &self,
        endpoint_id: &str,
        instant: DateTime<Utc>,
    ) -> Result<Option<EndpointStatus>> {
        let endpoint_id = endpoint_id.to_string();
        self.with_conn(move |conn| {
            let status: Option<String> = conn
                .query_row(
                    "SELECT status FROM status_history
                     WHERE endpoint_id = ?1 AND ts_ms < ?2
                     ORDER BY ts_ms DESC LIMIT 1",
                    params![endpoint_id, instant.timestamp_millis()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(status.map(|s| EndpointStatus::parse(&s)))
        })
        .await
    }

    /// All records in `[start, end]` (inclusive bounds), ascending by
    /// timestamp. Callers may request arbitrarily long windows; nothing is
    /// truncated here.
    pub async fn range(
        &self,
        endpoint_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistorySample>> {
        let endpoint_id = endpoint_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT ts_ms, status, response_time_ms FROM status_history
                 WHERE endpoint_id = ?1 AND ts_ms >= ?2 AND ts_ms <= ?3
                 ORDER BY ts_ms ASC",
            )?;
            let rows = stmt.query_map(
                params![
                    endpoint_id,
                    start.timestamp_millis(),
                    end.timestamp_millis()
                ],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<u64>>(2)?,
                    ))
                },
            )?;

            let mut samples = Vec::new();
            for row in rows {
                let (ts_ms, status, response_time_ms) = row?;
                samples.push(HistorySample {
                    timestamp: DateTime::from_timestamp_millis(ts_ms)
                        .unwrap_or(DateTime::UNIX_EPOCH),
                    status: EndpointStatus::parse(&status),
                    response_time_ms,
                });
            }
            Ok(samples)
        })
        .await
    }

    /// All endpoint ids ever recorded; supports administrative purges.
    pub async fn distinct_endpoint_ids(&self) -> Result<HashSet<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT endpoint_id FROM status_history")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut ids = HashSet::new();
            for row in rows {
                ids.insert(row?);
            }
            Ok(ids)
        })
        .await
    }

    /// Delete all records for an endpoint; returns whether anything was
    /// deleted.
    pub async fn purge(&self, endpoint_id: &str) -> Result<bool> {
        let endpoint_id = endpoint_id.to_string();
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM status_history WHERE endpoint_id = ?1",
                params![endpoint_id],
            )?;
            Ok(deleted > 0)
        })
        .await
    }
}
