//! Schema bootstrap, batch insert, orphan recovery, and status aggregates.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{params, Connection, TransactionBehavior};

use crate::models::{SourceRow, WorkStatus};
use crate::repository::Result;

pub(super) fn init_schema(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS work_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',

            -- Timing
            created_at TEXT NOT NULL,
            processed_at TEXT,

            -- Fan-out results, one triple per remote call
            result_1_body TEXT,
            result_1_status INTEGER,
            result_1_duration_ms REAL,
            result_2_body TEXT,
            result_2_status INTEGER,
            result_2_duration_ms REAL,
            result_3_body TEXT,
            result_3_status INTEGER,
            result_3_duration_ms REAL
        );

        -- Keeps the claim subquery cheap
        CREATE INDEX IF NOT EXISTS idx_work_queue_status ON work_queue(status);
        "#,
    )?;
    Ok(())
}

/// Insert one page of rows as `pending`. All-or-nothing: the whole page goes
/// in under a single immediate transaction.
pub(super) fn enqueue_batch(conn: &mut Connection, rows: &[SourceRow]) -> Result<usize> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let now = Utc::now().to_rfc3339();
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO work_queue (source_id, payload, status, created_at)
             VALUES (?1, ?2, 'pending', ?3)",
        )?;
        for row in rows {
            stmt.execute(params![row.source_id, row.payload, now])?;
            inserted += 1;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

/// Resurrect rows a terminated consumer left behind: `processing -> pending`,
/// `processed_at` cleared. The reversal is destructive so a human inspecting
/// the final file can identify orphans by their null timestamps.
pub(super) fn reset_orphans(conn: &mut Connection) -> Result<usize> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let reset = tx.execute(
        "UPDATE work_queue SET status = 'pending', processed_at = NULL
          WHERE status = 'processing'",
        [],
    )?;
    tx.commit()?;
    Ok(reset)
}

pub(super) fn status_counts(conn: &mut Connection) -> Result<BTreeMap<WorkStatus, u64>> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM work_queue GROUP BY status")?;
    let mut counts = BTreeMap::new();
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (status, count) = row?;
        if let Some(status) = WorkStatus::from_str(&status) {
            counts.insert(status, count as u64);
        }
    }
    Ok(counts)
}
