//! Producer worker: pages rows out of the upstream source into the queue.

use tokio::sync::mpsc;

use super::types::{WorkerEvent, POLL_INTERVAL};
use crate::models::SourceRow;
use crate::repository::WorkQueue;
use crate::upstream::RowSource;

pub struct Producer<S: RowSource> {
    source: S,
    queue: WorkQueue,
    page_size: u32,
    /// 0 means unbounded.
    row_limit: u64,
    events: mpsc::Sender<WorkerEvent>,
}

impl<S: RowSource> Producer<S> {
    pub fn new(
        source: S,
        queue: WorkQueue,
        page_size: u32,
        row_limit: u64,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Self {
        Self {
            source,
            queue,
            page_size,
            row_limit,
            events,
        }
    }

    /// Fetch pages in stable id order and insert each as one write
    /// transaction, until the source is exhausted or the row limit is hit.
    ///
    /// Any upstream or store error aborts the producer; the caller reports
    /// it as pipeline-fatal.
    pub async fn run(self) -> anyhow::Result<u64> {
        let mut offset = 0u64;
        let mut total_inserted = 0u64;

        loop {
            let mut page = self.source.fetch_page(self.page_size, offset).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as u64;

            if self.row_limit > 0 {
                let remaining = (self.row_limit - total_inserted) as usize;
                page.truncate(remaining);
            }

            let count = self.enqueue_with_backoff(page).await?;
            total_inserted += count as u64;
            tracing::debug!("enqueued batch of {} (total {})", count, total_inserted);

            let _ = self.events.send(WorkerEvent::BatchInserted { count }).await;

            if self.row_limit > 0 && total_inserted >= self.row_limit {
                break;
            }
        }

        tracing::info!("producer done, {} rows inserted", total_inserted);
        let _ = self
            .events
            .send(WorkerEvent::ProducerDone { total_inserted })
            .await;

        Ok(total_inserted)
    }

    /// Insert one page, backing off on write-lock contention. Busy timeouts
    /// are never fatal; any other store error is.
    async fn enqueue_with_backoff(&self, page: Vec<SourceRow>) -> anyhow::Result<usize> {
        loop {
            match self.queue.enqueue_batch(page.clone()).await {
                Ok(count) => return Ok(count),
                Err(e) if e.is_busy() => {
                    tracing::debug!("enqueue hit busy timeout, backing off");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
