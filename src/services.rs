//! Interfaces to the host application.
//!
//! The core consumes these capabilities and never implements them: table
//! schema lookup, IR execution, and the current selection span. Tests provide
//! mock implementations.

use crate::columns::SourceColumn;
use crate::ir::StructuredQuery;
use crate::node::TableState;
use serde_json::Value;
use thiserror::Error;

/// A catalog table as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<SourceColumn>,
    /// Module that must be included before the table is queryable.
    pub include_module: Option<String>,
}

impl From<&TableSchema> for TableState {
    fn from(schema: &TableSchema) -> Self {
        TableState {
            table_name: schema.name.clone(),
            module: schema.include_module.clone(),
            columns: schema.columns.clone(),
        }
    }
}

/// A half-open `[start, end)` span of trace time, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    pub start: i64,
    pub end: i64,
}

impl TimeSpan {
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }
}

/// One executed result set.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("query execution failed: {0}")]
    Execution(String),

    #[error("the engine cannot represent this query: {0}")]
    Unrepresentable(String),
}

/// Table-schema lookup for Table nodes and join-key discovery.
pub trait CatalogService {
    fn table(&self, name: &str) -> Option<TableSchema>;
    fn list_tables(&self) -> Vec<TableSchema>;
}

/// The analytical engine executing compiled queries. Execution may be slow;
/// the session layer in [`crate::explorer`] keeps requests single-flight.
pub trait EngineService {
    fn execute(&mut self, query: &StructuredQuery) -> Result<QueryResult, EngineError>;
    fn raw_text_representation(&self, query: &StructuredQuery) -> Result<String, EngineError>;
}

/// The host's current time selection, consumed by TimeRange nodes.
pub trait SelectionService {
    fn current_time_span(&self) -> Option<TimeSpan>;
    fn trace_bounds(&self) -> TimeSpan;
}
