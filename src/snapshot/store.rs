//! SQLite-backed Snapshot Store.
//!
//! Snapshots are written once, atomically with their full event list, and are
//! immutable afterwards apart from deletion.

use super::{sort_by_sequence, NewSnapshot, SnapshotEvent, SnapshotSummary, SnapshotWithEvents};
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS snapshot (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_fixture_id TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    fetched_by TEXT,
    total_events INTEGER NOT NULL,
    notes TEXT
);

CREATE INDEX IF NOT EXISTS idx_snapshot_fetched_at
    ON snapshot(fetched_at DESC);

CREATE TABLE IF NOT EXISTS snapshot_event (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id INTEGER NOT NULL REFERENCES snapshot(id) ON DELETE CASCADE,
    event_identifier TEXT NOT NULL,
    sequence TEXT NOT NULL,
    payload BLOB NOT NULL,
    payload_type TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshot_event_snapshot
    ON snapshot_event(snapshot_id, id);
"#;

const SUMMARY_COLUMNS: &str =
    "id, source_fixture_id, display_name, fetched_at, fetched_by, total_events, notes";

/// Result of [`SnapshotStore::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { id: i64, event_count: i64 },
    /// A snapshot for the same source fixture already exists; nothing was written.
    Duplicate { existing_id: i64, event_count: i64 },
}

#[derive(Clone)]
pub struct SnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SnapshotStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open snapshot store at {}", db_path))?;
        Self::from_connection(conn, db_path)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory snapshot store")?;
        Self::from_connection(conn, ":memory:")
    }

    fn from_connection(conn: Connection, label: &str) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize snapshot schema")?;

        let fk_enabled: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap_or(0);
        if fk_enabled != 1 {
            warn!("foreign_keys pragma not active; cascade deletes will not apply");
        }

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM snapshot", [], |row| row.get(0))
            .unwrap_or(0);
        info!("📼 Snapshot store ready at {} ({} snapshots)", label, count);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Persist a snapshot and all its events in one transaction.
    pub fn create(&self, snapshot: &NewSnapshot) -> Result<CreateOutcome> {
        let mut conn = self.conn.lock();

        if let Some(existing) = find_by_source(&conn, &snapshot.source_fixture_id)? {
            return Ok(CreateOutcome::Duplicate {
                existing_id: existing.0,
                event_count: existing.1,
            });
        }

        let tx = conn.transaction().context("begin snapshot transaction")?;
        let event_count = snapshot.events.len() as i64;

        let inserted = tx.execute(
            "INSERT INTO snapshot (source_fixture_id, display_name, fetched_at, fetched_by, total_events, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                snapshot.source_fixture_id,
                snapshot.display_name,
                snapshot.fetched_at,
                snapshot.fetched_by,
                event_count,
                snapshot.notes,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                // Lost a race with a concurrent ingest of the same fixture
                drop(tx);
                let existing = find_by_source(&conn, &snapshot.source_fixture_id)?
                    .context("duplicate snapshot vanished during create")?;
                return Ok(CreateOutcome::Duplicate {
                    existing_id: existing.0,
                    event_count: existing.1,
                });
            }
            Err(e) => return Err(e).context("insert snapshot"),
        }

        let id = tx.last_insert_rowid();
        let created_at = Utc::now();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO snapshot_event (snapshot_id, event_identifier, sequence, payload, payload_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for event in &snapshot.events {
                stmt.execute(params![
                    id,
                    event.event_identifier,
                    event.sequence,
                    event.payload,
                    event.payload_type,
                    created_at,
                ])
                .context("insert snapshot event")?;
            }
        }
        tx.commit().context("commit snapshot")?;

        info!(
            snapshot_id = id,
            source_fixture_id = %snapshot.source_fixture_id,
            "💾 Stored snapshot with {} events",
            event_count
        );
        Ok(CreateOutcome::Created { id, event_count })
    }

    /// Snapshot summaries, most recently fetched first.
    pub fn list(&self) -> Result<Vec<SnapshotSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM snapshot ORDER BY fetched_at DESC, id DESC",
            SUMMARY_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], summary_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read snapshots")?;
        Ok(rows)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<SnapshotSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM snapshot WHERE id = ?1",
            SUMMARY_COLUMNS
        ))?;
        match stmt.query_row([id], summary_from_row) {
            Ok(summary) => Ok(Some(summary)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Metadata plus events in replay order.
    pub fn get_with_events(&self, id: i64) -> Result<Option<SnapshotWithEvents>> {
        let Some(summary) = self.get_by_id(id)? else {
            return Ok(None);
        };

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, snapshot_id, event_identifier, sequence, payload, payload_type, created_at
             FROM snapshot_event WHERE snapshot_id = ?1 ORDER BY id ASC",
        )?;
        let mut events: Vec<SnapshotEvent> = stmt
            .query_map([id], |row| {
                Ok(SnapshotEvent {
                    id: row.get(0)?,
                    snapshot_id: row.get(1)?,
                    event_identifier: row.get(2)?,
                    sequence: row.get(3)?,
                    payload: row.get(4)?,
                    payload_type: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()
            .context("read snapshot events")?;

        sort_by_sequence(&mut events, |e| e.sequence.as_str());
        debug!(snapshot_id = id, "Loaded {} snapshot events", events.len());

        Ok(Some(SnapshotWithEvents { summary, events }))
    }

    /// Remove a snapshot and its events. Returns false for unknown ids.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn
            .execute("DELETE FROM snapshot WHERE id = ?1", [id])
            .context("delete snapshot")?;
        if removed > 0 {
            info!(snapshot_id = id, "🗑️ Deleted snapshot");
        }
        Ok(removed > 0)
    }

    /// Number of stored event rows for a snapshot id.
    pub fn event_count(&self, snapshot_id: i64) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM snapshot_event WHERE snapshot_id = ?1",
            [snapshot_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn find_by_source(&self, source_fixture_id: &str) -> Result<Option<SnapshotSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM snapshot WHERE source_fixture_id = ?1",
            SUMMARY_COLUMNS
        ))?;
        Ok(stmt
            .query_row([source_fixture_id], summary_from_row)
            .optional()?)
    }
}

fn find_by_source(conn: &Connection, source_fixture_id: &str) -> Result<Option<(i64, i64)>> {
    let row = conn
        .query_row(
            "SELECT id, total_events FROM snapshot WHERE source_fixture_id = ?1",
            [source_fixture_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row)
}

fn summary_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotSummary> {
    Ok(SnapshotSummary {
        id: row.get(0)?,
        source_fixture_id: row.get(1)?,
        display_name: row.get(2)?,
        fetched_at: row.get(3)?,
        fetched_by: row.get(4)?,
        total_events: row.get(5)?,
        notes: row.get(6)?,
    })
}
