//! Data models for the work-queue pipeline.

mod work_item;

pub use work_item::{CallResult, SourceRow, WorkItem, WorkStatus};
