//! Pipeline configuration, worker events, and run outcome.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::models::WorkStatus;

/// Poll cadence when the queue is empty or busy. Coupled with
/// [`DRAIN_EMPTY_POLLS`]: together they give the drain guard its safety
/// margin, so treat them as a single tuning pair.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Consecutive empty polls a consumer must observe after producer-done
/// before it may exit. Closes the race where the producer-done message
/// overtakes the producer's last batch still propagating through the WAL.
pub const DRAIN_EMPTY_POLLS: u32 = 3;

/// How often the orchestrator samples and logs queue status.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(2000);

/// How long the orchestrator waits for consumers to drain after a deadline
/// before terminating them outright.
pub const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of consumer workers.
    pub consumers: usize,
    /// Producer page size.
    pub batch_size: u32,
    /// Max rows to enqueue; 0 means unbounded.
    pub row_limit: u64,
    /// Wall-clock deadline in seconds; 0 means unbounded.
    pub max_duration: u64,
}

/// Messages from workers to the orchestrator's event loop.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// One page committed to the queue.
    BatchInserted { count: usize },
    /// Producer finished; relayed to consumers as the producer-done flag.
    ProducerDone { total_inserted: u64 },
    /// Producer hit a fatal error. Pipeline-fatal.
    ProducerFailed { error: String },
    /// One item finalized (done or failed).
    ItemProcessed { worker_id: usize, source_id: i64 },
    /// Consumer observed the queue as drained and exited cleanly.
    ConsumerDone { worker_id: usize },
    /// Consumer hit a fatal store error. Pipeline-fatal.
    ConsumerFailed { worker_id: usize, error: String },
}

/// Final account of a run, rendered by the CLI and logged at shutdown.
#[derive(Debug)]
pub struct PipelineSummary {
    /// Sum of `BatchInserted` counts observed by the orchestrator.
    pub rows_produced: u64,
    /// Items finalized by consumers (done + failed).
    pub items_processed: u64,
    /// Rows reset from `processing` back to `pending` at shutdown.
    pub orphans_reset: usize,
    /// Final per-status counts from the queue file.
    pub counts: BTreeMap<WorkStatus, u64>,
    pub elapsed: Duration,
    /// 0 on normal or deadline-drained completion, 1 on fatal errors.
    pub exit_code: i32,
}

impl PipelineSummary {
    pub fn count(&self, status: WorkStatus) -> u64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Row conservation: every produced row must still be accounted for in
    /// the final file.
    pub fn is_conserved(&self) -> bool {
        self.rows_produced == self.counts.values().sum::<u64>()
    }
}
