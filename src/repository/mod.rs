//! Repository layer for the embedded work queue.
//!
//! All database access goes through rusqlite with WAL journaling so that
//! readers never block the single writer. Each worker opens its own handle;
//! handles are never shared between workers.

mod queue;

pub use queue::WorkQueue;

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A state transition found the row in an unexpected status. This is a
    /// programming error, not a runtime condition.
    #[error("work item {id} is not in '{expected}' state")]
    InvariantViolation { id: i64, expected: &'static str },
    #[error("{0}")]
    Storage(String),
}

impl QueueError {
    /// Whether this error is write-lock contention that exhausted the store's
    /// internal 5 s busy wait. Callers back off and retry; anything else
    /// propagates.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::DatabaseBusy
        )
    }
}

/// Open a read-write connection with the pipeline's pragma discipline:
/// WAL journaling, 5 s busy wait, reduced fsync (safe under WAL), and a
/// 64 MiB page cache.
pub(crate) fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    // WAL must be verified: SQLite silently keeps the default journal mode on
    // filesystems without shared-memory support, which would break the
    // concurrent-reader assumptions of the claim protocol.
    let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    if !journal_mode.eq_ignore_ascii_case("wal") {
        return Err(QueueError::Storage(format!(
            "failed to enable WAL mode: SQLite returned '{}' instead of 'wal'",
            journal_mode
        )));
    }

    conn.execute_batch(
        r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        PRAGMA cache_size = -65536;
        "#,
    )?;

    Ok(conn)
}

/// Open a read-only connection for monitoring. Shares the busy-wait setting
/// but never takes the write lock.
pub(crate) fn connect_readonly(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    conn.execute_batch(
        r#"
        PRAGMA busy_timeout = 5000;
        PRAGMA cache_size = -65536;
        "#,
    )?;
    Ok(conn)
}

/// Remove a stale queue file and its WAL/SHM journals from a prior run.
/// Missing files are not an error.
pub fn remove_queue_files(path: &Path) -> io::Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut target = path.as_os_str().to_os_string();
        target.push(suffix);
        match std::fs::remove_file(PathBuf::from(target)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
