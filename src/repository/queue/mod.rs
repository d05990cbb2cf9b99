//! The work queue: a typed layer over the store that encodes the item state
//! machine.
//!
//! Every mutation runs under an immediate transaction so the write lock is
//! acquired upfront; there is no read-to-write lock upgrade anywhere, which
//! is what keeps the producer's batch inserts and the consumers' claims from
//! deadlocking against each other.

mod claim;
mod helpers;
mod state;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use super::{QueueError, Result};
use crate::models::{CallResult, SourceRow, WorkItem, WorkStatus};

/// A per-worker handle onto the queue file.
///
/// Each worker of the pipeline opens its own `WorkQueue`; handles are never
/// shared between workers. Synchronous rusqlite operations run under
/// `tokio::task::spawn_blocking` so a 5 s busy wait never stalls the async
/// runtime.
pub struct WorkQueue {
    conn: Arc<Mutex<Connection>>,
}

impl WorkQueue {
    /// Open a read-write handle.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = super::connect(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a read-only monitor handle.
    pub fn open_readonly(path: &Path) -> Result<Self> {
        let conn = super::connect_readonly(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| QueueError::Storage("connection mutex poisoned".into()))?;
            op(&mut guard)
        })
        .await
        .map_err(|e| QueueError::Storage(format!("blocking task failed: {e}")))?
    }

    /// Create the `work_queue` table and its status index. Idempotent; run
    /// once by the orchestrator before any worker opens its handle.
    pub async fn init_schema(&self) -> Result<()> {
        self.with_conn(|conn| state::init_schema(conn)).await
    }

    /// Insert a page of rows as `pending` in one write transaction.
    /// All-or-nothing per batch. Returns the number of rows inserted.
    pub async fn enqueue_batch(&self, rows: Vec<SourceRow>) -> Result<usize> {
        self.with_conn(move |conn| state::enqueue_batch(conn, &rows))
            .await
    }

    /// Atomically claim one pending item, transitioning it to `processing`
    /// and stamping `processed_at`. Returns `None` when the queue has no
    /// pending rows. Two concurrent claimers can never receive the same row.
    pub async fn claim_one(&self) -> Result<Option<WorkItem>> {
        self.with_conn(|conn| claim::claim_one(conn)).await
    }

    /// Transition `processing -> done`, writing all nine result columns.
    /// Fails with an invariant error if the row is not currently processing.
    pub async fn mark_done(&self, id: i64, results: [CallResult; 3]) -> Result<()> {
        self.with_conn(move |conn| claim::mark_done(conn, id, &results))
            .await
    }

    /// Transition `processing -> failed`. Result columns stay null.
    pub async fn mark_failed(&self, id: i64) -> Result<()> {
        self.with_conn(move |conn| claim::mark_failed(conn, id))
            .await
    }

    /// Reset every `processing` row back to `pending`, clearing
    /// `processed_at`. Shutdown-only. Returns the count reset.
    pub async fn reset_orphans(&self) -> Result<usize> {
        self.with_conn(|conn| state::reset_orphans(conn)).await
    }

    /// Per-status row counts for progress sampling and the final summary.
    pub async fn status_counts(&self) -> Result<BTreeMap<WorkStatus, u64>> {
        self.with_conn(|conn| state::status_counts(conn)).await
    }
}
