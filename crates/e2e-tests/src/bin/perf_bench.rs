use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use e2e_tests::{shard_doc_count, write_records, TestHarness};
use shard_writer::{ShardWriter, ShardWriterSettings};

const SMALL_RECORD_COUNT: usize = 2_000;
const MEDIUM_RECORD_COUNT: usize = 20_000;
const DEFAULT_ITERATIONS: usize = 3;

#[derive(Parser, Debug)]
#[command(name = "perf_bench", about = "Shard writer throughput benchmark")]
struct Args {
    #[arg(long, value_enum, default_value = "small")]
    tier: DatasetTier,
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: usize,
    #[arg(long, default_value_t = 20)]
    batch_size: usize,
    /// Comma-separated worker counts to compare
    #[arg(long, value_delimiter = ',', default_value = "1,2,4")]
    writer_threads: Vec<usize>,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum DatasetTier {
    Small,
    Medium,
}

impl DatasetTier {
    fn record_count(&self) -> usize {
        match self {
            DatasetTier::Small => SMALL_RECORD_COUNT,
            DatasetTier::Medium => MEDIUM_RECORD_COUNT,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StepMetrics {
    p50_ms: f64,
    p90_ms: f64,
    p99_ms: f64,
    samples: usize,
    p50_docs_per_sec: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct BenchmarkOutput {
    tier: DatasetTier,
    iterations: usize,
    records: usize,
    batch_size: usize,
    steps: BTreeMap<String, StepMetrics>,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();
    let records = args.tier.record_count();
    let mut steps = BTreeMap::new();

    for &threads in &args.writer_threads {
        let mut write_samples = Vec::with_capacity(args.iterations);
        let mut close_samples = Vec::with_capacity(args.iterations);

        for iteration in 0..args.iterations {
            let (write_ms, close_ms) =
                run_iteration(records, args.batch_size, threads, iteration).await?;
            write_samples.push(write_ms);
            close_samples.push(close_ms);
        }

        steps.insert(
            format!("write/threads={}", threads),
            build_metrics(&write_samples, records),
        );
        steps.insert(
            format!("close/threads={}", threads),
            build_metrics(&close_samples, records),
        );
    }

    let output = BenchmarkOutput {
        tier: args.tier,
        iterations: args.iterations,
        records,
        batch_size: args.batch_size,
        steps,
    };

    let json = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
    println!("{}", render_table(&output));
    println!("\n{}", json);

    if let Some(path) = args.out {
        std::fs::write(&path, json).map_err(|e| format!("write {}: {}", path.display(), e))?;
        println!("Results written: {}", path.display());
    }
    Ok(())
}

async fn run_iteration(
    records: usize,
    batch_size: usize,
    writer_threads: usize,
    iteration: usize,
) -> Result<(f64, f64), String> {
    let harness = TestHarness::new();
    let settings = ShardWriterSettings {
        batch_size,
        writer_threads,
        writer_memory_mb: 64,
        ..harness.settings()
    };
    let writer = ShardWriter::open(settings, harness.context(iteration as u32, 0))
        .await
        .map_err(|e| e.to_string())?;

    let start = Instant::now();
    write_records(&writer, records)
        .await
        .map_err(|e| e.to_string())?;
    let write_ms = start.elapsed().as_secs_f64() * 1000.0;

    let start = Instant::now();
    writer.close(None).await.map_err(|e| e.to_string())?;
    let close_ms = start.elapsed().as_secs_f64() * 1000.0;

    let shard_dir = writer
        .output_dir()
        .ok_or_else(|| "writer has no output directory".to_string())?;
    let indexed = shard_doc_count(shard_dir) as usize;
    if indexed != records {
        return Err(format!("expected {} documents, found {}", records, indexed));
    }

    Ok((write_ms, close_ms))
}

fn build_metrics(samples: &[f64], records: usize) -> StepMetrics {
    let p50 = percentile(samples, 50.0);
    StepMetrics {
        p50_ms: p50,
        p90_ms: percentile(samples, 90.0),
        p99_ms: percentile(samples, 99.0),
        samples: samples.len(),
        p50_docs_per_sec: if p50 > 0.0 {
            records as f64 / (p50 / 1000.0)
        } else {
            0.0
        },
    }
}

fn percentile(values: &[f64], percentile: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

fn render_table(output: &BenchmarkOutput) -> String {
    let mut lines = vec![
        format!(
            "tier={:?} records={} batch_size={} iterations={}",
            output.tier, output.records, output.batch_size, output.iterations
        ),
        format!(
            "{:<20} {:>10} {:>10} {:>10} {:>12}",
            "step", "p50_ms", "p90_ms", "p99_ms", "docs/sec"
        ),
    ];
    for (step, m) in &output.steps {
        lines.push(format!(
            "{:<20} {:>10.1} {:>10.1} {:>10.1} {:>12.0}",
            step, m.p50_ms, m.p90_ms, m.p99_ms, m.p50_docs_per_sec
        ));
    }
    lines.join("\n")
}
