//! Claim and finalize operations.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::helpers::{row_to_work_item, ITEM_COLUMNS};
use crate::models::{CallResult, WorkItem};
use crate::repository::{QueueError, Result};

/// Atomically claim one pending row.
///
/// A single UPDATE-of-subquery with RETURNING, executed inside an immediate
/// transaction: the write lock is held for the whole select-and-transition,
/// so two concurrent claimers can never observe the same row as pending.
/// Tie-break between pending rows is left to the subquery.
pub(super) fn claim_one(conn: &mut Connection) -> Result<Option<WorkItem>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let sql = format!(
        "UPDATE work_queue
            SET status = 'processing', processed_at = ?1
          WHERE id = (SELECT id FROM work_queue WHERE status = 'pending' LIMIT 1)
      RETURNING {ITEM_COLUMNS}"
    );
    let item = tx
        .query_row(&sql, params![Utc::now().to_rfc3339()], row_to_work_item)
        .optional()?;
    tx.commit()?;
    Ok(item)
}

pub(super) fn mark_done(conn: &mut Connection, id: i64, results: &[CallResult; 3]) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let updated = tx.execute(
        "UPDATE work_queue
            SET status = 'done',
                result_1_body = ?1, result_1_status = ?2, result_1_duration_ms = ?3,
                result_2_body = ?4, result_2_status = ?5, result_2_duration_ms = ?6,
                result_3_body = ?7, result_3_status = ?8, result_3_duration_ms = ?9
          WHERE id = ?10 AND status = 'processing'",
        params![
            results[0].body,
            results[0].status,
            results[0].duration_ms,
            results[1].body,
            results[1].status,
            results[1].duration_ms,
            results[2].body,
            results[2].status,
            results[2].duration_ms,
            id,
        ],
    )?;
    if updated == 0 {
        return Err(QueueError::InvariantViolation {
            id,
            expected: "processing",
        });
    }
    tx.commit()?;
    Ok(())
}

/// Terminal failure. Result columns stay null; partial results from the
/// fan-out are discarded.
pub(super) fn mark_failed(conn: &mut Connection, id: i64) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let updated = tx.execute(
        "UPDATE work_queue SET status = 'failed' WHERE id = ?1 AND status = 'processing'",
        params![id],
    )?;
    if updated == 0 {
        return Err(QueueError::InvariantViolation {
            id,
            expected: "processing",
        });
    }
    tx.commit()?;
    Ok(())
}
