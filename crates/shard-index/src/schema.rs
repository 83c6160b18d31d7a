//! Bundle schema loading.
//!
//! The configuration bundle carries its Tantivy schema as JSON at
//! `conf/schema.json`, in the same form Tantivy writes into `meta.json`.

use std::path::Path;

use tantivy::schema::{Field, Schema};
use tracing::debug;

use crate::error::IndexServiceError;

/// Schema file name inside the bundle's `conf` directory.
pub const SCHEMA_FILE_NAME: &str = "schema.json";

/// Field that identifies a document, filled from the record key when absent.
pub const UNIQUE_KEY_FIELD: &str = "id";

/// Tantivy schema plus the handles the service needs.
#[derive(Debug, Clone)]
pub struct ShardSchema {
    schema: Schema,
    /// Unique key field, if the schema declares one
    pub unique_key: Option<Field>,
}

impl ShardSchema {
    /// Wrap an existing Tantivy schema.
    pub fn new(schema: Schema) -> Self {
        let unique_key = schema.get_field(UNIQUE_KEY_FIELD).ok();
        Self { schema, unique_key }
    }

    /// Parse a schema from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, IndexServiceError> {
        let schema: Schema = serde_json::from_str(json)
            .map_err(|e| IndexServiceError::InvalidSchema(e.to_string()))?;
        if schema.num_fields() == 0 {
            return Err(IndexServiceError::InvalidSchema(
                "schema declares no fields".into(),
            ));
        }
        Ok(Self::new(schema))
    }

    /// Get the underlying Tantivy schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Name of the unique key field, if present in the schema.
    pub fn unique_key_name(&self) -> Option<&str> {
        self.unique_key.map(|_| UNIQUE_KEY_FIELD)
    }

    /// Check that an existing index was built with the same fields.
    pub fn ensure_matches(&self, existing: &Schema) -> Result<(), IndexServiceError> {
        if existing != &self.schema {
            let expected: Vec<_> = self.schema.fields().map(|(_, e)| e.name()).collect();
            let found: Vec<_> = existing.fields().map(|(_, e)| e.name()).collect();
            return Err(IndexServiceError::SchemaMismatch(format!(
                "bundle declares {:?}, index has {:?}",
                expected, found
            )));
        }
        Ok(())
    }
}

/// Load the schema from `<config_dir>/conf/schema.json`.
pub fn load_bundle_schema(config_dir: &Path) -> Result<ShardSchema, IndexServiceError> {
    let path = config_dir.join("conf").join(SCHEMA_FILE_NAME);
    if !path.is_file() {
        return Err(IndexServiceError::MissingConfiguration(format!(
            "schema file not found at {}",
            path.display()
        )));
    }

    let json = std::fs::read_to_string(&path)?;
    let schema = ShardSchema::from_json(&json)?;
    debug!(path = ?path, fields = schema.schema().num_fields(), "Loaded bundle schema");
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tantivy::schema::{STORED, STRING, TEXT};
    use tempfile::TempDir;

    fn sample_schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field("id", STRING | STORED);
        builder.add_text_field("body", TEXT);
        builder.build()
    }

    #[test]
    fn test_from_json_roundtrip() {
        let json = serde_json::to_string(&sample_schema()).unwrap();
        let schema = ShardSchema::from_json(&json).unwrap();
        assert!(schema.schema().get_field("body").is_ok());
        assert_eq!(schema.unique_key_name(), Some("id"));
    }

    #[test]
    fn test_schema_without_unique_key() {
        let mut builder = Schema::builder();
        builder.add_text_field("body", TEXT);
        let json = serde_json::to_string(&builder.build()).unwrap();

        let schema = ShardSchema::from_json(&json).unwrap();
        assert!(schema.unique_key.is_none());
        assert_eq!(schema.unique_key_name(), None);
    }

    #[test]
    fn test_invalid_json() {
        let result = ShardSchema::from_json("{not json");
        assert!(matches!(result, Err(IndexServiceError::InvalidSchema(_))));
    }

    #[test]
    fn test_empty_schema_rejected() {
        let result = ShardSchema::from_json("[]");
        assert!(matches!(result, Err(IndexServiceError::InvalidSchema(_))));
    }

    #[test]
    fn test_load_missing_schema_file() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("conf")).unwrap();

        let result = load_bundle_schema(temp_dir.path());
        assert!(matches!(
            result,
            Err(IndexServiceError::MissingConfiguration(_))
        ));
    }

    #[test]
    fn test_load_bundle_schema() {
        let temp_dir = TempDir::new().unwrap();
        let conf = temp_dir.path().join("conf");
        std::fs::create_dir_all(&conf).unwrap();
        std::fs::write(
            conf.join(SCHEMA_FILE_NAME),
            serde_json::to_string_pretty(&sample_schema()).unwrap(),
        )
        .unwrap();

        let schema = load_bundle_schema(temp_dir.path()).unwrap();
        assert_eq!(schema.schema().num_fields(), 2);
    }

    #[test]
    fn test_ensure_matches() {
        let schema = ShardSchema::new(sample_schema());
        assert!(schema.ensure_matches(&sample_schema()).is_ok());

        let mut builder = Schema::builder();
        builder.add_text_field("other", TEXT);
        let result = schema.ensure_matches(&builder.build());
        assert!(matches!(result, Err(IndexServiceError::SchemaMismatch(_))));
    }
}
