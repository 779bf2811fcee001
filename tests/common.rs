//! Common test utilities for building query graphs.
use traceflow::columns::{SemanticType, SourceColumn};
use traceflow::node::TableState;
use traceflow::prelude::*;

/// A Table node over the given `(name, type)` columns.
#[allow(dead_code)]
pub fn table_node(table: &str, cols: &[(&str, SemanticType)]) -> NodeState {
    NodeState::Table(TableState {
        table_name: table.to_string(),
        module: None,
        columns: cols
            .iter()
            .map(|(name, ty)| SourceColumn::new(*name, *ty))
            .collect(),
    })
}

/// A Table node where every column is an Int.
#[allow(dead_code)]
pub fn int_table(table: &str, cols: &[&str]) -> NodeState {
    table_node(
        table,
        &cols
            .iter()
            .map(|c| (*c, SemanticType::Int))
            .collect::<Vec<_>>(),
    )
}

/// A Table node with the `id, ts, dur` interval schema plus extras.
#[allow(dead_code)]
pub fn interval_table(table: &str, extra: &[(&str, SemanticType)]) -> NodeState {
    let mut cols = vec![
        ("id", SemanticType::Id),
        ("ts", SemanticType::Timestamp),
        ("dur", SemanticType::Duration),
    ];
    cols.extend_from_slice(extra);
    table_node(table, &cols)
}

/// The display names of a node's computed output schema.
#[allow(dead_code)]
pub fn col_names(graph: &QueryGraph, id: &NodeId) -> Vec<String> {
    graph
        .node(id)
        .unwrap()
        .final_cols
        .iter()
        .map(|c| c.display_name().to_string())
        .collect()
}

/// The display names a downstream consumer would see.
#[allow(dead_code)]
pub fn visible_names(graph: &QueryGraph, id: &NodeId) -> Vec<String> {
    graph
        .node(id)
        .unwrap()
        .visible_cols()
        .iter()
        .map(|c| c.display_name().to_string())
        .collect()
}
