//! Row mapping for the work queue.

use rusqlite::types::Type;
use rusqlite::Row;

use crate::models::{CallResult, WorkItem, WorkStatus};
use crate::repository::{parse_datetime, parse_datetime_opt};

/// Column list shared by every statement that reads full items, so the
/// mapping below stays index-stable.
pub(crate) const ITEM_COLUMNS: &str = "id, source_id, payload, status, created_at, processed_at, \
     result_1_body, result_1_status, result_1_duration_ms, \
     result_2_body, result_2_status, result_2_duration_ms, \
     result_3_body, result_3_status, result_3_duration_ms";

pub(crate) fn row_to_work_item(row: &Row) -> rusqlite::Result<WorkItem> {
    let status_str: String = row.get(3)?;
    let status = WorkStatus::from_str(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown status '{status_str}'").into(),
        )
    })?;

    let created_at: String = row.get(4)?;

    let mut results: [Option<CallResult>; 3] = [None, None, None];
    for (k, slot) in results.iter_mut().enumerate() {
        let base = 6 + k * 3;
        let body: Option<String> = row.get(base)?;
        let code: Option<u16> = row.get(base + 1)?;
        let duration_ms: Option<f64> = row.get(base + 2)?;
        if let (Some(body), Some(code), Some(duration_ms)) = (body, code, duration_ms) {
            *slot = Some(CallResult {
                status: code,
                body,
                duration_ms,
            });
        }
    }

    Ok(WorkItem {
        id: row.get(0)?,
        source_id: row.get(1)?,
        payload: row.get(2)?,
        status,
        created_at: parse_datetime(&created_at),
        processed_at: parse_datetime_opt(row.get(5)?),
        results,
    })
}
