//! # Traceflow - Node-Graph Query Building and Compilation Engine
//!
//! **Traceflow** is the query-building core of a trace-analysis application:
//! a dataflow graph of query nodes (table scans, filters, joins, aggregations,
//! interval algebra, ...) whose output schemas propagate automatically as the
//! graph is edited, and which compiles into a serializable structured-query
//! IR for an analytical engine to execute.
//!
//! ## Core Workflow
//!
//! 1.  **Build the graph**: add nodes to a [`graph::QueryGraph`] and connect
//!     them; every edit synchronously recomputes the affected downstream
//!     schemas and validation states.
//! 2.  **Inspect**: each node exposes its computed output schema
//!     (`final_cols`) and its current validation issue, if any.
//! 3.  **Compile**: [`compiler::structured_query`] lowers any valid node into
//!     a [`ir::StructuredQuery`] tree; invalid nodes fail closed.
//! 4.  **Render or execute**: [`ir::sqlgen::SqlRenderer`] turns the IR into
//!     SQL text, and [`explorer::AnalysisSession`] coalesces execute requests
//!     against the host's engine, single-flight per session.
//!
//! ## Quick Start
//!
//! ```rust
//! use traceflow::prelude::*;
//! use traceflow::columns::{SemanticType, SourceColumn};
//! use traceflow::node::TableState;
//!
//! let mut graph = QueryGraph::new();
//! let table = graph.add_node(NodeState::Table(TableState {
//!     table_name: "slice".to_string(),
//!     module: None,
//!     columns: vec![
//!         SourceColumn::new("name", SemanticType::String),
//!         SourceColumn::new("dur", SemanticType::Duration),
//!     ],
//! }));
//! let sort = graph.add_node(NodeState::Sort(Default::default()));
//! graph.connect_primary(&table, &sort).unwrap();
//!
//! // The sort node inherits the table's schema.
//! let names: Vec<&str> = graph
//!     .node(&sort)
//!     .unwrap()
//!     .final_cols
//!     .iter()
//!     .map(|c| c.display_name())
//!     .collect();
//! assert_eq!(names, vec!["name", "dur"]);
//! ```

pub mod columns;
pub mod compiler;
pub mod error;
pub mod explorer;
pub mod graph;
pub mod ir;
pub mod node;
pub mod prelude;
pub mod registry;
pub mod services;
