//! Schemaless documents and their conversion to Tantivy documents.
//!
//! Records arrive as JSON objects. They stay schemaless until a worker hands
//! a batch to the index service, which converts them against the bundle
//! schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tantivy::TantivyDocument;

use crate::error::IndexServiceError;
use crate::schema::ShardSchema;

/// A single document: field name to JSON value.
///
/// Field insertion order is not significant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret a JSON value as a document.
    ///
    /// Only JSON objects are documents.
    pub fn from_value(value: Value) -> Result<Self, IndexServiceError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(IndexServiceError::InvalidDocument(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a field, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn contains_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// Convert a document to a Tantivy document using the shard schema.
///
/// Fields the schema does not declare are ignored. A value whose type does not
/// fit its field is an error.
pub fn to_tantivy_doc(
    schema: &ShardSchema,
    doc: &Document,
) -> Result<TantivyDocument, IndexServiceError> {
    let json = serde_json::to_string(&doc.fields)?;
    TantivyDocument::parse_json(schema.schema(), &json)
        .map_err(|e| IndexServiceError::DocumentParse(e.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
