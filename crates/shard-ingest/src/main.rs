//! Shard Ingest
//!
//! Feeds NDJSON records through a shard writer, one task attempt per run.
//!
//! # Usage
//!
//! ```bash
//! shard-ingest --bundle /cache/index-bundle.zip --output /jobs/42/index \
//!     --partition 3 --input records.ndjson
//! ```
//!
//! Each input line is `{"key": "...", "value": {...}}`.
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (`--config`)
//! 3. Environment variables (SHARD_WRITER_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use shard_ingest::{print_summary, run_ingest, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let summary = run_ingest(cli).await?;
    print_summary(&summary);
    Ok(())
}
