//! Target database access
//!
//! Generated SQL runs through the [`SqlExecutor`] seam. [`SqliteDatabase`]
//! is the bundled implementation: a pool of read-only SQLite connections that
//! also serves the live schema catalog and table descriptions for indexing.

mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Raw message from the database engine, fed back to the generator as is
    #[error("{0}")]
    Query(String),

    #[error("Statement is not read-only")]
    NotReadOnly,

    #[error("Query timed out after {0}s")]
    Timeout(u64),

    #[error("Database unavailable: {0}")]
    Unavailable(String),

    #[error("Query task failed: {0}")]
    TaskFailed(String),
}

impl From<rusqlite::Error> for ExecutionError {
    fn from(e: rusqlite::Error) -> Self {
        ExecutionError::Query(e.to_string())
    }
}

impl From<r2d2::Error> for ExecutionError {
    fn from(e: r2d2::Error) -> Self {
        ExecutionError::Unavailable(e.to_string())
    }
}

/// Result set with column names and values as returned
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// More rows existed beyond the configured cap
    pub truncated: bool,
}

impl QueryRows {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Runs one SQL statement against the target database
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryRows, ExecutionError>;
}

/// One column as introspected for indexing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    /// Most frequent distinct values, text columns only
    pub sample_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<ColumnDescription>,
}
