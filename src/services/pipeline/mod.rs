//! Pipeline orchestration: lifecycle of one run.
//!
//! The orchestrator owns the event loop. Workers never talk to each other
//! directly; the producer-done signal travels producer -> orchestrator ->
//! consumers, and the deadline drain is an orchestrator broadcast.

mod consumer;
mod producer;
mod types;

pub use consumer::Consumer;
pub use producer::Producer;
pub use types::{PipelineConfig, PipelineSummary, WorkerEvent, DRAIN_EMPTY_POLLS, POLL_INTERVAL};

use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::config::Settings;
use crate::remote::RemoteClient;
use crate::repository::{self, WorkQueue};
use crate::upstream::RowSource;
use types::{DRAIN_GRACE, PROGRESS_INTERVAL};

pub struct PipelineService {
    settings: Settings,
    config: PipelineConfig,
}

impl PipelineService {
    pub fn new(settings: Settings, config: PipelineConfig) -> Self {
        Self { settings, config }
    }

    /// Run the pipeline to completion and return the final summary.
    ///
    /// The returned summary carries the process exit code: 0 for normal or
    /// deadline-drained completion, 1 for a fatal producer error or abnormal
    /// consumer termination.
    pub async fn run<S: RowSource + 'static>(self, source: S) -> anyhow::Result<PipelineSummary> {
        let started = Instant::now();
        let path = self.settings.queue_db_path.clone();

        // Bootstrap: each run starts from a clean file.
        repository::remove_queue_files(&path)
            .with_context(|| format!("failed to remove stale queue file {}", path.display()))?;
        {
            let bootstrap = WorkQueue::open(&path)?;
            bootstrap.init_schema().await?;
        }

        let (event_tx, mut event_rx) = mpsc::channel::<WorkerEvent>(256);
        let (producer_done_tx, producer_done_rx) = watch::channel(false);
        let (drain_tx, drain_rx) = watch::channel(false);

        let producer = Producer::new(
            source,
            WorkQueue::open(&path)?,
            self.config.batch_size,
            self.config.row_limit,
            event_tx.clone(),
        );
        let producer_events = event_tx.clone();
        let producer_handle = tokio::spawn(async move {
            if let Err(e) = producer.run().await {
                tracing::error!("producer failed: {:#}", e);
                let _ = producer_events
                    .send(WorkerEvent::ProducerFailed {
                        error: e.to_string(),
                    })
                    .await;
            }
        });

        let mut consumer_handles = Vec::with_capacity(self.config.consumers);
        for worker_id in 0..self.config.consumers {
            let consumer = Consumer::new(
                worker_id,
                WorkQueue::open(&path)?,
                RemoteClient::new(&self.settings.httpbin_url),
                producer_done_rx.clone(),
                drain_rx.clone(),
                event_tx.clone(),
                self.settings.mock_cpu_load,
            );
            let consumer_events = event_tx.clone();
            consumer_handles.push(tokio::spawn(async move {
                if let Err(e) = consumer.run().await {
                    tracing::error!("consumer {} failed: {}", worker_id, e);
                    let _ = consumer_events
                        .send(WorkerEvent::ConsumerFailed {
                            worker_id,
                            error: e.to_string(),
                        })
                        .await;
                }
            }));
        }

        let monitor = WorkQueue::open_readonly(&path)?;
        let mut progress = tokio::time::interval(PROGRESS_INTERVAL);
        progress.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval resolves immediately; consume it so
        // sampling starts one interval in.
        progress.tick().await;

        let mut deadline_armed = self.config.max_duration > 0;
        let deadline = tokio::time::sleep(Duration::from_secs(self.config.max_duration.max(1)));
        tokio::pin!(deadline);
        let mut safety_armed = false;
        let safety = tokio::time::sleep(DRAIN_GRACE);
        tokio::pin!(safety);

        let mut rows_produced = 0u64;
        let mut items_processed = 0u64;
        let mut producer_total: Option<u64> = None;
        let mut consumers_done = 0usize;
        let mut exit_code = 0i32;

        loop {
            tokio::select! {
                _ = &mut deadline, if deadline_armed => {
                    deadline_armed = false;
                    tracing::info!(
                        "deadline of {}s reached, draining consumers",
                        self.config.max_duration
                    );
                    let _ = drain_tx.send(true);
                    safety.as_mut().reset(tokio::time::Instant::now() + DRAIN_GRACE);
                    safety_armed = true;
                }
                _ = &mut safety, if safety_armed => {
                    safety_armed = false;
                    tracing::warn!(
                        "consumers did not drain within {}s, forcing shutdown",
                        DRAIN_GRACE.as_secs()
                    );
                    break;
                }
                _ = progress.tick() => {
                    match monitor.status_counts().await {
                        Ok(counts) => {
                            let count = |s| counts.get(&s).copied().unwrap_or(0);
                            tracing::info!(
                                "queue status: pending={} processing={} done={} failed={}",
                                count(crate::models::WorkStatus::Pending),
                                count(crate::models::WorkStatus::Processing),
                                count(crate::models::WorkStatus::Done),
                                count(crate::models::WorkStatus::Failed),
                            );
                        }
                        Err(e) => tracing::warn!("progress sample failed: {}", e),
                    }
                }
                Some(event) = event_rx.recv() => match event {
                    WorkerEvent::BatchInserted { count } => {
                        rows_produced += count as u64;
                    }
                    WorkerEvent::ProducerDone { total_inserted } => {
                        producer_total = Some(total_inserted);
                        let _ = producer_done_tx.send(true);
                    }
                    WorkerEvent::ProducerFailed { error } => {
                        tracing::error!("shutting down after producer failure: {}", error);
                        exit_code = 1;
                        break;
                    }
                    WorkerEvent::ItemProcessed { worker_id, source_id } => {
                        items_processed += 1;
                        tracing::debug!(
                            "consumer {} processed source row {}",
                            worker_id,
                            source_id
                        );
                    }
                    WorkerEvent::ConsumerDone { .. } => {
                        consumers_done += 1;
                        if consumers_done == self.config.consumers {
                            break;
                        }
                    }
                    WorkerEvent::ConsumerFailed { worker_id, error } => {
                        tracing::error!(
                            "shutting down after consumer {} failure: {}",
                            worker_id,
                            error
                        );
                        exit_code = 1;
                        break;
                    }
                },
            }
        }

        // Shutdown. Hard termination of stragglers is safe: any row left in
        // processing is resurrected by the orphan reset below.
        producer_handle.abort();
        for handle in &consumer_handles {
            handle.abort();
        }
        let _ = producer_handle.await;
        for handle in consumer_handles {
            let _ = handle.await;
        }
        drop(monitor);

        // Account for events that were still queued when the loop broke.
        while let Ok(event) = event_rx.try_recv() {
            match event {
                WorkerEvent::BatchInserted { count } => rows_produced += count as u64,
                WorkerEvent::ItemProcessed { .. } => items_processed += 1,
                _ => {}
            }
        }

        let cleanup = WorkQueue::open(&path)?;
        let orphans_reset = cleanup.reset_orphans().await?;
        if orphans_reset > 0 {
            tracing::info!("reset {} orphaned rows back to pending", orphans_reset);
        }
        let counts = cleanup.status_counts().await?;

        let summary = PipelineSummary {
            rows_produced,
            items_processed,
            orphans_reset,
            counts,
            elapsed: started.elapsed(),
            exit_code,
        };

        if producer_total.is_some() && !summary.is_conserved() {
            tracing::warn!(
                "row conservation mismatch: produced {} but final counts sum to {}",
                summary.rows_produced,
                summary.counts.values().sum::<u64>()
            );
        }

        tracing::info!(
            "pipeline finished in {:.1}s: {} produced, {} processed, exit code {}",
            summary.elapsed.as_secs_f64(),
            summary.rows_produced,
            summary.items_processed,
            summary.exit_code
        );

        Ok(summary)
    }
}
