//! Work item entity and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a work item.
///
/// Transitions are linear: `pending -> processing -> {done, failed}`.
/// The shutdown-time orphan reset (`processing -> pending`) is the only
/// exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// All statuses, in lifecycle order. Used by summaries so every bucket
    /// is reported even when its count is zero.
    pub fn all() -> [Self; 4] {
        [Self::Pending, Self::Processing, Self::Done, Self::Failed]
    }
}

/// A single row fetched from the upstream source, ready to enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRow {
    /// Upstream identifier, preserved opaquely.
    pub source_id: i64,
    /// The full upstream record serialized as JSON text.
    pub payload: String,
}

/// Outcome of one remote delay call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResult {
    /// HTTP status code, captured verbatim (non-2xx is not a failure).
    pub status: u16,
    /// Full response body as text.
    pub body: String,
    /// Wall-clock elapsed time for the call in milliseconds.
    pub duration_ms: f64,
}

/// One row of the `work_queue` table.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Store-assigned primary key.
    pub id: i64,
    pub source_id: i64,
    pub payload: String,
    pub status: WorkStatus,
    /// Set on insert.
    pub created_at: DateTime<Utc>,
    /// Set when the item is claimed.
    pub processed_at: Option<DateTime<Utc>>,
    /// Results of the three fan-out calls. All present iff status is done.
    pub results: [Option<CallResult>; 3],
}
