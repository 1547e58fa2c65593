//! Query-side data types shared by providers and the query service.

use serde::{Deserialize, Serialize};

/// Schema information handed to the generator alongside a question.
///
/// `version` participates in the translation fingerprint, so bumping it after
/// a schema change orphans every cached translation of the old schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContext {
    pub version: String,
    /// DDL or prose description of the tables the SQL may reference.
    pub description: String,
}

impl SchemaContext {
    pub fn new(version: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            description: description.into(),
        }
    }
}

/// Tabular result of executing SQL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
