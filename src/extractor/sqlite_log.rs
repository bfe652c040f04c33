//! Upstream event log stored in SQLite.
//!
//! The production log is opened read-only; queries run on the blocking pool.

use super::{EventLogSource, UpstreamEventRow};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::sync::Arc;
use tracing::info;

/// Shape of the upstream `events` table.
///
/// `created_time_utc` is written by several producers; it is compared through
/// `julianday()` so `T`/`Z` and space-separated forms order as instants.
pub const UPSTREAM_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_identifier TEXT NOT NULL,
    sequence TEXT NOT NULL,
    payload BLOB NOT NULL,
    payload_type TEXT NOT NULL,
    created_time_utc TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_identifier
    ON events(event_identifier, payload_type, created_time_utc);
"#;

#[derive(Clone)]
pub struct SqliteEventLog {
    conn: Arc<Mutex<Connection>>,
    label: String,
}

impl SqliteEventLog {
    pub fn open_read_only(path: &str) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("Failed to open production event log at {}", path))?;
        info!("🔌 Production event log opened (read-only): {}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            label: path.to_string(),
        })
    }

    /// Wrap an existing connection (seeded fixtures, tooling).
    pub fn from_connection(conn: Connection, label: impl Into<String>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            label: label.into(),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&*guard)
        })
        .await
        .map_err(|e| anyhow!("event log query task failed: {}", e))?
    }
}

#[async_trait::async_trait]
impl EventLogSource for SqliteEventLog {
    async fn cutoff_time(
        &self,
        event_identifier: &str,
        marker_type: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let id = event_identifier.to_string();
        let marker = marker_type.to_string();
        self.with_conn(move |conn| {
            let cutoff: Option<DateTime<Utc>> = conn
                .query_row(
                    "SELECT created_time_utc FROM events
                     WHERE event_identifier = ?1 AND payload_type = ?2
                     ORDER BY julianday(created_time_utc) ASC, id ASC
                     LIMIT 1",
                    params![id, marker],
                    |row| row.get(0),
                )
                .optional()
                .context("cutoff lookup")?;
            Ok(cutoff)
        })
        .await
    }

    async fn events_until(
        &self,
        event_identifier: &str,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<UpstreamEventRow>> {
        let id = event_identifier.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT event_identifier, sequence, payload, payload_type, created_time_utc
                 FROM events
                 WHERE event_identifier = ?1
                   AND (?2 IS NULL OR julianday(created_time_utc) <= julianday(?2))
                 ORDER BY sequence ASC, julianday(created_time_utc) ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(params![id, cutoff], |row| {
                    Ok(UpstreamEventRow {
                        event_identifier: row.get(0)?,
                        sequence: row.get(1)?,
                        payload: row.get(2)?,
                        payload_type: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("read upstream events")?;
            Ok(rows)
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get::<_, i64>(0))
                .context("events table not readable")?;
            Ok(())
        })
        .await
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.label)
    }
}
