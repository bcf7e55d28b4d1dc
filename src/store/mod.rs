//! Document store abstraction: evaluates `query::plan` selections against tables of JSON documents.

pub mod memory;
pub mod postgres;

use crate::error::StoreError;
use crate::query::plan::{RowQuery, Selection, StreamQuery, TableRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;

/// A stored row.
pub type Document = serde_json::Map<String, Value>;

/// Reserved key carrying store-side bookkeeping. Never returned to clients.
pub const INTERNAL_FIELD: &str = "_internal";

fn default_primary_key() -> String {
    "id".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    /// Indexes each element of an array column.
    #[serde(default)]
    pub multi: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        TableSchema {
            name: name.into(),
            primary_key: default_primary_key(),
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        self.indexes.push(IndexDef {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            multi: false,
        });
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Single-column indexes over `column`.
    pub fn single_column_indexes<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a IndexDef> + 'a {
        self.indexes
            .iter()
            .filter(move |i| i.columns.len() == 1 && i.columns[0] == column)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertResult {
    pub inserted: u64,
    pub generated_keys: Vec<Value>,
    pub errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_error: Option<String>,
}

/// Acknowledgement for update and delete.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    pub inserted: u64,
    pub deleted: u64,
    pub replaced: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub errors: u64,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the table and its secondary indexes when missing.
    async fn ensure_table(&self, table: &TableRef, schema: &TableSchema) -> Result<(), StoreError>;

    /// Evaluate a single-row query. `None` when nothing matches.
    async fn fetch_row(&self, query: &RowQuery) -> Result<Option<Value>, StoreError>;

    async fn fetch_stream(&self, query: &StreamQuery) -> Result<Vec<Value>, StoreError>;

    async fn count(&self, query: &StreamQuery) -> Result<u64, StoreError>;

    /// Insert documents; missing primary keys are generated and reported in order.
    async fn insert(&self, table: &TableRef, docs: Vec<Document>) -> Result<InsertResult, StoreError>;

    /// Shallow-merge `patch` into the row with the given primary key.
    async fn update(&self, table: &TableRef, key: &Value, patch: Document) -> Result<WriteResult, StoreError>;

    async fn delete(&self, selection: &Selection) -> Result<WriteResult, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Primary key as text, the form both backends key rows by.
pub(crate) fn key_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
