//! CLI entry point: argument parsing, validation, and the run summary.

use anyhow::{bail, Context};
use clap::Parser;
use console::style;

use crate::config::Settings;
use crate::models::WorkStatus;
use crate::services::pipeline::{PipelineConfig, PipelineService, PipelineSummary};
use crate::upstream::PgRowSource;

#[derive(Parser)]
#[command(name = "drainpipe")]
#[command(about = "Bounded producer-consumer pipeline draining rows through an embedded work queue")]
#[command(version)]
pub struct Cli {
    /// Number of consumer workers
    #[arg(short, long, default_value = "4")]
    consumers: usize,

    /// Producer page size (rows fetched and enqueued per batch)
    #[arg(short, long, default_value = "100")]
    batch_size: u32,

    /// Max rows to enqueue (0 = unbounded)
    #[arg(short, long, default_value = "0")]
    limit: u64,

    /// Pipeline wall-clock deadline in seconds (0 = unbounded)
    #[arg(short = 't', long, default_value = "0")]
    max_duration: u64,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<PipelineConfig> {
        if self.consumers < 1 {
            bail!("--consumers must be at least 1");
        }
        if self.batch_size < 1 {
            bail!("--batch-size must be at least 1");
        }
        Ok(PipelineConfig {
            consumers: self.consumers,
            batch_size: self.batch_size,
            row_limit: self.limit,
            max_duration: self.max_duration,
        })
    }
}

/// Parse arguments, run the pipeline, print the summary. Returns the process
/// exit code.
pub async fn run() -> anyhow::Result<i32> {
    let config = Cli::parse().into_config()?;
    let settings = Settings::default().with_env_overrides();

    let source = PgRowSource::connect(&settings.upstream)
        .await
        .context("failed to connect to upstream PostgreSQL")?;

    let queue_path = settings.queue_db_path.clone();
    let service = PipelineService::new(settings, config);
    let summary = service.run(source).await?;

    print_summary(&summary, &queue_path);
    Ok(summary.exit_code)
}

fn print_summary(summary: &PipelineSummary, queue_path: &std::path::Path) {
    let marker = if summary.exit_code == 0 {
        style("✓").green()
    } else {
        style("✗").red()
    };
    println!();
    println!(
        "{} {}",
        marker,
        style(format!(
            "Pipeline finished in {:.1}s",
            summary.elapsed.as_secs_f64()
        ))
        .bold()
    );
    println!("  rows produced:   {}", summary.rows_produced);
    println!("  items processed: {}", summary.items_processed);
    for status in WorkStatus::all() {
        println!("  {:<16} {}", format!("{}:", status.as_str()), summary.count(status));
    }
    if summary.orphans_reset > 0 {
        println!(
            "  {} {} orphaned rows reset to pending",
            style("!").yellow(),
            summary.orphans_reset
        );
    }
    println!("  queue file:      {}", queue_path.display());
}
