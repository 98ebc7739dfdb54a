//! SQLite persistence for sentryd.
//!
//! Append-only: closed usage sessions are inserted once and never updated.
//! Reads serve the history views (newest first) and single-record lookups.

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use sensor_sentry_protocol::SensorKind;
use std::path::PathBuf;

use crate::error::StorageError;
use crate::session::{format_timestamp, parse_timestamp, StoredSession, UsageSession};

/// Write/read contract for completed sessions.
pub trait SessionStore: Send + Sync {
    /// Appends a closed session and returns its row id.
    fn insert(&self, session: &UsageSession) -> Result<i64, StorageError>;

    /// Sessions ordered by start time, newest first.
    fn list_sessions(
        &self,
        sensor: Option<SensorKind>,
        limit: usize,
    ) -> Result<Vec<StoredSession>, StorageError>;

    fn get_session(&self, id: i64) -> Result<Option<StoredSession>, StorageError>;
}

pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, StorageError> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn count_sessions(&self) -> Result<i64, StorageError> {
        self.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM usage_sessions", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(StorageError::Query)
        })
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS usage_sessions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    sensor TEXT NOT NULL,
                    actor TEXT,
                    started_at TEXT NOT NULL,
                    ended_at TEXT NOT NULL,
                    CHECK (started_at <= ended_at)
                 );
                 CREATE INDEX IF NOT EXISTS usage_sessions_started_at
                    ON usage_sessions (started_at DESC);
                 COMMIT;",
            )
            .map_err(StorageError::Schema)
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, StorageError> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(|source| StorageError::DataDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags).map_err(StorageError::Open)?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StorageError::Open)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(StorageError::Open)?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(StorageError::Open)?;

        Ok(conn)
    }
}

impl SessionStore for Db {
    fn insert(&self, session: &UsageSession) -> Result<i64, StorageError> {
        if session.started_at > session.ended_at {
            return Err(StorageError::Rejected(format!(
                "started_at {} is after ended_at {}",
                format_timestamp(&session.started_at),
                format_timestamp(&session.ended_at)
            )));
        }

        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO usage_sessions (sensor, actor, started_at, ended_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    session.sensor.as_str(),
                    session.actor,
                    format_timestamp(&session.started_at),
                    format_timestamp(&session.ended_at)
                ],
            )
            .map_err(StorageError::Insert)?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn list_sessions(
        &self,
        sensor: Option<SensorKind>,
        limit: usize,
    ) -> Result<Vec<StoredSession>, StorageError> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, sensor, actor, started_at, ended_at FROM usage_sessions \
                     WHERE ?1 IS NULL OR sensor = ?1 \
                     ORDER BY started_at DESC, id DESC \
                     LIMIT ?2",
                )
                .map_err(StorageError::Query)?;

            let rows = stmt
                .query_map(
                    params![sensor.map(|kind| kind.as_str()), limit as i64],
                    read_raw_row,
                )
                .map_err(StorageError::Query)?;

            let mut sessions = Vec::new();
            for row in rows {
                let raw = row.map_err(StorageError::Query)?;
                sessions.push(raw.into_stored()?);
            }
            Ok(sessions)
        })
    }

    fn get_session(&self, id: i64) -> Result<Option<StoredSession>, StorageError> {
        let raw = self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, sensor, actor, started_at, ended_at FROM usage_sessions WHERE id = ?1",
                params![id],
                read_raw_row,
            )
            .optional()
            .map_err(StorageError::Query)
        })?;
        raw.map(RawSessionRow::into_stored).transpose()
    }
}

struct RawSessionRow {
    id: i64,
    sensor: String,
    actor: Option<String>,
    started_at: String,
    ended_at: String,
}

impl RawSessionRow {
    fn into_stored(self) -> Result<StoredSession, StorageError> {
        let decode = |details: String| StorageError::Decode {
            id: self.id,
            details,
        };
        let sensor = SensorKind::parse(&self.sensor)
            .ok_or_else(|| decode(format!("unknown sensor {}", self.sensor)))?;
        let started_at = parse_timestamp(&self.started_at)
            .ok_or_else(|| decode(format!("bad started_at {}", self.started_at)))?;
        let ended_at = parse_timestamp(&self.ended_at)
            .ok_or_else(|| decode(format!("bad ended_at {}", self.ended_at)))?;

        Ok(StoredSession::new(
            self.id,
            UsageSession {
                sensor,
                actor: self.actor,
                started_at,
                ended_at,
            },
        ))
    }
}

fn read_raw_row(row: &Row<'_>) -> rusqlite::Result<RawSessionRow> {
    Ok(RawSessionRow {
        id: row.get(0)?,
        sensor: row.get(1)?,
        actor: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
    })
}
