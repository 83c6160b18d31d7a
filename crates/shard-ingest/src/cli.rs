//! CLI argument parsing for shard-ingest.
//!
//! CLI flags override every other config source.

use std::path::PathBuf;

use clap::Parser;

/// Shard Ingest
///
/// Writes NDJSON records into one index shard, the way a bulk-indexing task
/// would.
#[derive(Parser, Debug)]
#[command(name = "shard-ingest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Staged directory; repeat for every directory the cache provided
    #[arg(short, long = "bundle", required = true)]
    pub bundles: Vec<PathBuf>,

    /// Job output root; the shard directory is created below it
    #[arg(short, long)]
    pub output: PathBuf,

    /// Job name
    #[arg(long, default_value = "local")]
    pub job: String,

    /// Partition number of this task
    #[arg(long, default_value_t = 0)]
    pub partition: u32,

    /// Attempt number of this task
    #[arg(long, default_value_t = 0)]
    pub attempt: u32,

    /// NDJSON input file (default: stdin)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Override the configured bundle name
    #[arg(long)]
    pub bundle_name: Option<String>,

    /// Override the configured batch size
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Override the configured number of writer workers
    #[arg(long)]
    pub writer_threads: Option<usize>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,
}
