//! Work queue state machine tests.
//!
//! Exercises the claim protocol, the status transitions, and the orphan
//! reset against real queue files, including concurrent claimers racing on
//! one database.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tempfile::{tempdir, TempDir};
use tokio::sync::Mutex;

use drainpipe::models::{CallResult, SourceRow, WorkStatus};
use drainpipe::repository::{QueueError, WorkQueue};

fn sample_rows(n: usize) -> Vec<SourceRow> {
    (0..n)
        .map(|i| SourceRow {
            source_id: i as i64 + 1,
            payload: format!("{{\"id\": {}, \"name\": \"row {}\"}}", i + 1, i + 1),
        })
        .collect()
}

fn sample_result(status: u16) -> CallResult {
    CallResult {
        status,
        body: "{\"delay\": 0.12}".to_string(),
        duration_ms: 123.4,
    }
}

async fn fresh_queue(dir: &TempDir) -> (WorkQueue, PathBuf) {
    let path = dir.path().join("queue.db");
    let queue = WorkQueue::open(&path).unwrap();
    queue.init_schema().await.unwrap();
    (queue, path)
}

#[tokio::test]
async fn test_enqueue_and_claim() {
    let dir = tempdir().unwrap();
    let (queue, _path) = fresh_queue(&dir).await;

    let inserted = queue.enqueue_batch(sample_rows(3)).await.unwrap();
    assert_eq!(inserted, 3);

    let counts = queue.status_counts().await.unwrap();
    assert_eq!(counts.get(&WorkStatus::Pending), Some(&3));

    let item = queue.claim_one().await.unwrap().expect("a pending row");
    assert_eq!(item.status, WorkStatus::Processing);
    assert!(item.processed_at.is_some());
    assert!(item.results.iter().all(|r| r.is_none()));
    assert!(item.payload.contains("\"name\""));

    let counts = queue.status_counts().await.unwrap();
    assert_eq!(counts.get(&WorkStatus::Pending), Some(&2));
    assert_eq!(counts.get(&WorkStatus::Processing), Some(&1));
}

#[tokio::test]
async fn test_claim_empty_queue_returns_none() {
    let dir = tempdir().unwrap();
    let (queue, _path) = fresh_queue(&dir).await;
    assert!(queue.claim_one().await.unwrap().is_none());
}

#[tokio::test]
async fn test_payload_survives_round_trip_as_json() {
    let dir = tempdir().unwrap();
    let (queue, _path) = fresh_queue(&dir).await;

    queue.enqueue_batch(sample_rows(1)).await.unwrap();
    let item = queue.claim_one().await.unwrap().unwrap();

    let parsed: serde_json::Value = serde_json::from_str(&item.payload).unwrap();
    assert_eq!(parsed["id"], 1);
    assert_eq!(item.source_id, 1);
}

#[tokio::test]
async fn test_mark_done_writes_all_result_fields() {
    let dir = tempdir().unwrap();
    let (queue, path) = fresh_queue(&dir).await;

    queue.enqueue_batch(sample_rows(1)).await.unwrap();
    let item = queue.claim_one().await.unwrap().unwrap();
    queue
        .mark_done(
            item.id,
            [sample_result(200), sample_result(503), sample_result(200)],
        )
        .await
        .unwrap();

    let counts = queue.status_counts().await.unwrap();
    assert_eq!(counts.get(&WorkStatus::Done), Some(&1));

    // Done-completeness: all nine result columns are non-null.
    let conn = Connection::open(&path).unwrap();
    let nulls: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM work_queue
              WHERE status = 'done'
                AND (result_1_body IS NULL OR result_1_status IS NULL OR result_1_duration_ms IS NULL
                  OR result_2_body IS NULL OR result_2_status IS NULL OR result_2_duration_ms IS NULL
                  OR result_3_body IS NULL OR result_3_status IS NULL OR result_3_duration_ms IS NULL)",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(nulls, 0);

    // Non-2xx statuses are stored verbatim, not treated as failures.
    let second_status: u16 = conn
        .query_row(
            "SELECT result_2_status FROM work_queue WHERE id = ?1",
            [item.id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(second_status, 503);
}

#[tokio::test]
async fn test_mark_done_rejects_non_processing_row() {
    let dir = tempdir().unwrap();
    let (queue, _path) = fresh_queue(&dir).await;

    queue.enqueue_batch(sample_rows(1)).await.unwrap();

    // Row 1 is still pending; finalizing it is a programming error.
    let err = queue
        .mark_done(
            1,
            [sample_result(200), sample_result(200), sample_result(200)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvariantViolation { id: 1, .. }));
}

#[tokio::test]
async fn test_mark_failed_is_terminal_and_keeps_results_null() {
    let dir = tempdir().unwrap();
    let (queue, path) = fresh_queue(&dir).await;

    queue.enqueue_batch(sample_rows(2)).await.unwrap();
    let item = queue.claim_one().await.unwrap().unwrap();
    queue.mark_failed(item.id).await.unwrap();

    let counts = queue.status_counts().await.unwrap();
    assert_eq!(counts.get(&WorkStatus::Failed), Some(&1));

    let conn = Connection::open(&path).unwrap();
    let (status, body): (String, Option<String>) = conn
        .query_row(
            "SELECT status, result_1_body FROM work_queue WHERE id = ?1",
            [item.id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(status, "failed");
    assert_eq!(body, None);

    // A failed row never comes back out of the queue.
    let next = queue.claim_one().await.unwrap().unwrap();
    assert_ne!(next.id, item.id);

    // And it cannot be failed twice.
    let err = queue.mark_failed(item.id).await.unwrap_err();
    assert!(matches!(err, QueueError::InvariantViolation { .. }));
}

#[tokio::test]
async fn test_reset_orphans_is_idempotent() {
    let dir = tempdir().unwrap();
    let (queue, path) = fresh_queue(&dir).await;

    queue.enqueue_batch(sample_rows(3)).await.unwrap();
    queue.claim_one().await.unwrap().unwrap();
    queue.claim_one().await.unwrap().unwrap();

    assert_eq!(queue.reset_orphans().await.unwrap(), 2);
    assert_eq!(queue.reset_orphans().await.unwrap(), 0);

    let counts = queue.status_counts().await.unwrap();
    assert_eq!(counts.get(&WorkStatus::Pending), Some(&3));
    assert_eq!(counts.get(&WorkStatus::Processing), None);

    // The reversal is destructive: processed_at is cleared.
    let conn = Connection::open(&path).unwrap();
    let stamped: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM work_queue WHERE processed_at IS NOT NULL",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(stamped, 0);
}

#[tokio::test]
async fn test_reset_orphans_leaves_done_and_failed_alone() {
    let dir = tempdir().unwrap();
    let (queue, _path) = fresh_queue(&dir).await;

    queue.enqueue_batch(sample_rows(3)).await.unwrap();
    let done = queue.claim_one().await.unwrap().unwrap();
    queue
        .mark_done(
            done.id,
            [sample_result(200), sample_result(200), sample_result(200)],
        )
        .await
        .unwrap();
    let failed = queue.claim_one().await.unwrap().unwrap();
    queue.mark_failed(failed.id).await.unwrap();
    queue.claim_one().await.unwrap().unwrap();

    assert_eq!(queue.reset_orphans().await.unwrap(), 1);

    let counts = queue.status_counts().await.unwrap();
    assert_eq!(counts.get(&WorkStatus::Done), Some(&1));
    assert_eq!(counts.get(&WorkStatus::Failed), Some(&1));
    assert_eq!(counts.get(&WorkStatus::Pending), Some(&1));
}

#[tokio::test]
async fn test_init_schema_is_idempotent() {
    let dir = tempdir().unwrap();
    let (queue, _path) = fresh_queue(&dir).await;

    queue.enqueue_batch(sample_rows(2)).await.unwrap();
    queue.init_schema().await.unwrap();

    // Existing rows survive a re-run of the bootstrap.
    let counts = queue.status_counts().await.unwrap();
    assert_eq!(counts.get(&WorkStatus::Pending), Some(&2));
}

/// No double-claim: across concurrent claimers on separate handles, every
/// row id is returned by at most one successful claim.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claimers_never_share_a_row() {
    let dir = tempdir().unwrap();
    let (queue, path) = fresh_queue(&dir).await;

    let total = 50;
    queue.enqueue_batch(sample_rows(total)).await.unwrap();

    let claimed: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    for _ in 0..4 {
        let path = path.clone();
        let claimed = Arc::clone(&claimed);
        handles.push(tokio::spawn(async move {
            let queue = WorkQueue::open(&path).unwrap();
            loop {
                match queue.claim_one().await {
                    Ok(Some(item)) => claimed.lock().await.push(item.id),
                    Ok(None) => break,
                    Err(e) if e.is_busy() => {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Err(e) => panic!("unexpected queue error: {e}"),
                }
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let claimed = claimed.lock().await;
    assert_eq!(claimed.len(), total, "every row claimed exactly once");
    let unique: HashSet<i64> = claimed.iter().copied().collect();
    assert_eq!(unique.len(), total, "no row claimed twice");

    let counts = queue.status_counts().await.unwrap();
    assert_eq!(counts.get(&WorkStatus::Processing), Some(&(total as u64)));
    assert_eq!(counts.get(&WorkStatus::Pending), None);
}
