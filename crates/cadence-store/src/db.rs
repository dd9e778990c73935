use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{types::Type, Connection, Row};

use crate::error::{Result, StoreError};

/// A connection shared between store handles (and, in tests, between stores).
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Initialise the scheduler schema in `conn`.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedules (
            tenant_id              TEXT    NOT NULL,
            sync_type              TEXT    NOT NULL,
            interval_secs          INTEGER NOT NULL,
            enabled                INTEGER NOT NULL DEFAULT 1,
            active_trigger_source  TEXT    NOT NULL DEFAULT 'in_process',
            created_at             TEXT    NOT NULL,
            updated_at             TEXT    NOT NULL,
            PRIMARY KEY (tenant_id, sync_type)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_schedules_enabled ON schedules (enabled);

        CREATE TABLE IF NOT EXISTS schedule_runs (
            run_id            TEXT    NOT NULL PRIMARY KEY,
            tenant_id         TEXT    NOT NULL,
            sync_type         TEXT    NOT NULL,
            trigger_source    TEXT    NOT NULL,
            started_at        TEXT    NOT NULL,
            finished_at       TEXT,
            status            TEXT    NOT NULL,
            watermark_before  TEXT,
            watermark_after   TEXT,
            item_count        INTEGER,
            error_kind        TEXT,
            error_detail      TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_runs_key_status
            ON schedule_runs (tenant_id, sync_type, status);
        CREATE INDEX IF NOT EXISTS idx_runs_key_started
            ON schedule_runs (tenant_id, sync_type, started_at DESC);

        -- At most one running row per key: the cross-process mutex.
        CREATE UNIQUE INDEX IF NOT EXISTS uq_runs_one_running
            ON schedule_runs (tenant_id, sync_type) WHERE status = 'running';
        ",
    )?;
    Ok(())
}

/// Open `path`, apply the pragmas every cadence process uses, and run
/// migrations. The parent directory is created if missing.
pub fn open(path: &str, busy_timeout: Duration) -> Result<SharedConnection> {
    if let Some(parent) = Path::new(path).parent() {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    init_db(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// A private in-memory database with the schema applied.
pub fn open_in_memory() -> Result<SharedConnection> {
    let conn = Connection::open_in_memory()?;
    init_db(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub(crate) fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| StoreError::LockPoisoned)
}

/// Current time at the precision the stores persist.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Fixed-width RFC 3339 so stored timestamps compare lexically.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(_) => get_ts(row, idx).map(Some),
    }
}

/// Read a column stored as the `as_str()` form of a domain enum.
pub(crate) fn get_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

pub(crate) fn get_opt_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = String>,
{
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(_) => get_enum(row, idx).map(Some),
    }
}

#[cfg(test)]
pub(crate) fn memory() -> SharedConnection {
    open_in_memory().expect("open in-memory db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }

    #[test]
    fn unusable_parent_directory_is_reported() {
        let blocker = std::env::temp_dir().join(format!("cadence-db-blocker-{}", std::process::id()));
        std::fs::write(&blocker, b"not a directory").unwrap();
        let path = blocker.join("nested").join("cadence.db");

        let err = open(&path.to_string_lossy(), Duration::from_millis(10)).unwrap_err();
        std::fs::remove_file(&blocker).unwrap();
        assert!(matches!(err, StoreError::Directory { .. }));
        assert!(err.is_unavailable());
    }

    #[test]
    fn timestamps_sort_lexically() {
        let a = DateTime::parse_from_rfc3339("2026-03-01T09:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let b = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(ts(a), "2026-03-01T09:00:00.500Z");
        assert!(ts(a) < ts(b));
    }
}
