//! Ingest command implementation.
//!
//! Drives one shard through open, write and close, standing in for the host
//! framework: it supplies the task identity, the staged directories and a
//! logging reporter.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use shard_writer::{
    LoggingReporter, ShardContext, ShardWriter, ShardWriterSettings, TaskAttemptId,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::cli::Cli;

/// One input line.
#[derive(Debug, Deserialize)]
pub struct IngestRecord {
    /// Record key
    pub key: String,
    /// Document body; must be a JSON object
    pub value: Value,
}

/// What an ingest run did.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub records: u64,
    pub counters: Vec<(String, String, u64)>,
}

/// Parse one NDJSON line. Blank lines yield `None`.
pub fn parse_record(line: &str) -> Result<Option<IngestRecord>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let record = serde_json::from_str(line).context("Invalid ingest record")?;
    Ok(Some(record))
}

/// Apply CLI overrides on top of loaded settings.
pub fn apply_overrides(mut settings: ShardWriterSettings, cli: &Cli) -> ShardWriterSettings {
    if let Some(name) = &cli.bundle_name {
        settings.bundle_name = name.clone();
    }
    if let Some(size) = cli.batch_size {
        settings.batch_size = size;
    }
    if let Some(threads) = cli.writer_threads {
        settings.writer_threads = threads;
    }
    if let Some(level) = &cli.log_level {
        settings.log_level = level.clone();
    }
    settings
}

/// Install the global tracing subscriber.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Write every record from `reader`, returning how many were written.
pub async fn write_records<R>(writer: &ShardWriter, reader: R) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut written = 0u64;
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        line_no += 1;
        let Some(record) =
            parse_record(&line).with_context(|| format!("Line {}", line_no))?
        else {
            continue;
        };
        writer
            .write(&record.key, record.value)
            .await
            .with_context(|| format!("Failed to write record {} (line {})", record.key, line_no))?;
        written += 1;
    }

    Ok(written)
}

/// Run one ingest from parsed CLI arguments.
///
/// Installs the global tracing subscriber, so call at most once per process.
pub async fn run_ingest(cli: Cli) -> Result<IngestSummary> {
    let settings = ShardWriterSettings::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let settings = apply_overrides(settings, &cli);
    settings.validate().context("Invalid configuration")?;
    init_logging(&settings.log_level)?;

    let task = TaskAttemptId::new(cli.job.clone(), cli.partition, cli.attempt);
    let reporter = Arc::new(LoggingReporter::new());
    ingest(settings, task, &cli, reporter).await
}

/// Ingest with already resolved settings.
pub async fn ingest(
    settings: ShardWriterSettings,
    task: TaskAttemptId,
    cli: &Cli,
    reporter: Arc<LoggingReporter>,
) -> Result<IngestSummary> {
    info!(task = %task, bundles = cli.bundles.len(), "Starting ingest");

    let ctx = ShardContext {
        task: task.clone(),
        output_root: cli.output.clone(),
        staged_dirs: cli.bundles.clone(),
        reporter: reporter.clone(),
    };
    let writer = ShardWriter::open(settings, ctx).await?;

    let written = match &cli.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            write_records(&writer, BufReader::new(file)).await
        }
        None => write_records(&writer, BufReader::new(tokio::io::stdin())).await,
    };

    let records = match written {
        Ok(records) => records,
        Err(e) => {
            // Release the engine before reporting the write failure
            if let Err(close_err) = writer.close(None).await {
                warn!(task = %task, error = %close_err, "Close after failed write also failed");
            }
            return Err(e);
        }
    };

    writer.close(None).await?;
    if let Some(dir) = writer.output_dir() {
        info!(task = %task, records, shard = ?dir, "Ingest complete");
    }

    Ok(IngestSummary {
        records,
        counters: reporter.counters(),
    })
}

/// Print the counter summary to stdout.
pub fn print_summary(summary: &IngestSummary) {
    println!("Records: {}", summary.records);
    for (group, name, value) in &summary.counters {
        println!("  {}.{} = {}", group, name, value);
    }
}
