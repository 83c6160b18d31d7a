//! # shard-index
//!
//! Embedded Tantivy index service used by shard writers.
//!
//! A shard writer never talks to Tantivy directly. It provisions an
//! [`EmbeddedIndexService`] from a configuration bundle and then submits
//! documents through the [`IndexService`] trait, one batch per call.
//!
//! ## Features
//! - Schema loaded from `conf/schema.json` inside the configuration bundle
//! - Schemaless [`Document`] values converted to Tantivy documents on submission
//! - Staged close: commit, optional merge down to a single segment, release
//! - A single logical core per shard (`core1`)

pub mod document;
pub mod error;
pub mod factory;
pub mod schema;
pub mod service;

pub use document::{to_tantivy_doc, Document};
pub use error::IndexServiceError;
pub use factory::{create_index_service, InstanceProperties, CORE_NAME, DATA_DIR_NAME};
pub use schema::{load_bundle_schema, ShardSchema, SCHEMA_FILE_NAME, UNIQUE_KEY_FIELD};
pub use service::{EmbeddedIndexService, IndexService};
