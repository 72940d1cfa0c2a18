//! Datasource Seams
//!
//! The engine never talks to a database directly: schema discovery goes
//! through `SchemaIntrospector` and SQL through `SqlEngine`. `explain` is the
//! validation dry run; its `Err` carries the engine's own message so the
//! retry prompt can quote it.

use crate::error::Result;
use crate::metadata::TableMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    async fn get_tables(&self, datasource_id: &str) -> Result<Vec<TableMetadata>>;
}

#[async_trait]
pub trait SqlEngine: Send + Sync {
    /// Dry-run the statement without executing it.
    async fn explain(&self, sql: &str) -> Result<()>;
    async fn execute(&self, sql: &str) -> Result<QueryResult>;
}

/// Execution output as row maps; column order is preserved separately since
/// JSON maps do not keep it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub row_count: usize,
    /// Wall-clock seconds spent executing.
    pub execution_time: f64,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<serde_json::Map<String, serde_json::Value>>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            execution_time: 0.0,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}
