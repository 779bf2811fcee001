//! Prelude module for convenient imports
//!
//! Re-exports the most commonly used types from the traceflow crate. Import
//! this module to get access to the core functionality without having to
//! import each type individually.
//!
//! # Example
//!
//! ```rust
//! use traceflow::prelude::*;
//!
//! let mut graph = QueryGraph::new();
//! let node = graph.add_node(NodeState::SimpleSlices(Default::default()));
//! assert!(graph.node(&node).unwrap().is_valid());
//! let ir = structured_query(&graph, &node).unwrap();
//! assert_eq!(ir.id, node.as_str());
//! ```

// The graph and its nodes
pub use crate::graph::QueryGraph;
pub use crate::graph::persist::{from_json, to_json};
pub use crate::node::{NodeId, NodeKind, NodeState, QueryNode};

// Columns
pub use crate::columns::{ColumnDescriptor, SemanticType, SourceColumn};

// Compilation and rendering
pub use crate::compiler::structured_query;
pub use crate::ir::{IrOp, StructuredQuery};
pub use crate::ir::sqlgen::SqlRenderer;

// Session orchestration
pub use crate::explorer::AnalysisSession;

// Error types
pub use crate::error::{GraphError, NodeIssue};

// Host interfaces
pub use crate::services::{CatalogService, EngineService, SelectionService};
