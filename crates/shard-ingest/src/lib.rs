//! Shard Ingest library
//!
//! CLI parsing and the ingest command behind the `shard-ingest` binary.

pub mod cli;
pub mod commands;

pub use cli::Cli;
pub use commands::{
    apply_overrides, ingest, init_logging, parse_record, print_summary, run_ingest,
    write_records, IngestRecord, IngestSummary,
};
