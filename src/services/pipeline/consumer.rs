//! Consumer worker: claims items and fans each one out through three
//! concurrent delay calls.

use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};

use super::types::{WorkerEvent, DRAIN_EMPTY_POLLS, POLL_INTERVAL};
use crate::models::WorkItem;
use crate::remote::{random_delay_seconds, RemoteClient};
use crate::repository::{QueueError, WorkQueue};

pub struct Consumer {
    worker_id: usize,
    queue: WorkQueue,
    remote: RemoteClient,
    producer_done: watch::Receiver<bool>,
    drain: watch::Receiver<bool>,
    events: mpsc::Sender<WorkerEvent>,
    mock_cpu_load: bool,
}

impl Consumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: usize,
        queue: WorkQueue,
        remote: RemoteClient,
        producer_done: watch::Receiver<bool>,
        drain: watch::Receiver<bool>,
        events: mpsc::Sender<WorkerEvent>,
        mock_cpu_load: bool,
    ) -> Self {
        Self {
            worker_id,
            queue,
            remote,
            producer_done,
            drain,
            events,
            mock_cpu_load,
        }
    }

    /// Poll loop. Exits when draining, or when the queue stays empty for
    /// three consecutive polls after the producer-done relay. An immediate
    /// empty poll after producer-done is not enough: the producer's last
    /// commit may still be propagating through the WAL, so >= 400 ms of
    /// quiet-queue observation is required before declaring the queue
    /// drained.
    ///
    /// A store error other than busy contention is fatal to the worker.
    pub async fn run(self) -> Result<(), QueueError> {
        let mut empty_polls = 0u32;

        loop {
            // Drain is only checked between iterations; a claimed item is
            // always finalized before exit, otherwise the orphan reset would
            // resurrect it and its calls would be repeated.
            if *self.drain.borrow() {
                tracing::debug!("consumer {} draining", self.worker_id);
                break;
            }

            match self.queue.claim_one().await {
                Ok(Some(item)) => {
                    empty_polls = 0;
                    self.process(item).await?;
                }
                Ok(None) => {
                    empty_polls += 1;
                    if (*self.producer_done.borrow() && empty_polls >= DRAIN_EMPTY_POLLS)
                        || *self.drain.borrow()
                    {
                        break;
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) if e.is_busy() => {
                    tracing::debug!("consumer {} hit busy timeout, backing off", self.worker_id);
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }

        // Close the handle before reporting done.
        let Self {
            worker_id,
            queue,
            events,
            ..
        } = self;
        drop(queue);

        tracing::info!("consumer {} done", worker_id);
        let _ = events.send(WorkerEvent::ConsumerDone { worker_id }).await;
        Ok(())
    }

    /// One claimed item: three concurrent delay calls, then finalize. A
    /// request failure marks the row failed and the loop continues; only a
    /// store error propagates.
    async fn process(&self, item: WorkItem) -> Result<(), QueueError> {
        let delays = [
            random_delay_seconds(),
            random_delay_seconds(),
            random_delay_seconds(),
        ];

        let (r1, r2, r3) = tokio::join!(
            self.remote.call_delay(&delays[0]),
            self.remote.call_delay(&delays[1]),
            self.remote.call_delay(&delays[2]),
        );

        match (r1, r2, r3) {
            (Ok(a), Ok(b), Ok(c)) => {
                let results = [a, b, c];
                loop {
                    match self.queue.mark_done(item.id, results.clone()).await {
                        Ok(()) => break,
                        Err(e) if e.is_busy() => tokio::time::sleep(POLL_INTERVAL).await,
                        Err(e) => return Err(e),
                    }
                }
                if self.mock_cpu_load {
                    cpu_burn();
                }
            }
            (r1, r2, r3) => {
                for result in [&r1, &r2, &r3] {
                    if let Err(e) = result {
                        tracing::warn!(
                            "consumer {} request failed for item {}: {}",
                            self.worker_id,
                            item.id,
                            e
                        );
                    }
                }
                loop {
                    match self.queue.mark_failed(item.id).await {
                        Ok(()) => break,
                        Err(e) if e.is_busy() => tokio::time::sleep(POLL_INTERVAL).await,
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        let _ = self
            .events
            .send(WorkerEvent::ItemProcessed {
                worker_id: self.worker_id,
                source_id: item.source_id,
            })
            .await;
        Ok(())
    }
}

const CPU_BURN_ROUNDS: u32 = 200_000;

/// Deterministic CPU burn used to exercise multi-core scheduling when
/// `MOCK_CPU_LOAD` is set.
fn cpu_burn() {
    std::hint::black_box(burn(CPU_BURN_ROUNDS));
}

fn burn(rounds: u32) -> [u8; 32] {
    let mut digest = [0u8; 32];
    for _ in 0..rounds {
        let mut hasher = Sha256::new();
        hasher.update(digest);
        digest = hasher.finalize().into();
    }
    digest
}
