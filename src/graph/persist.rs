//! Graph serialization: the JSON document format and the three-phase load.
//!
//! A document is `{nodes, rootNodeIds, selectedNodeId?, nodeLayouts?}` with
//! each node recorded as `{nodeId, type, state, nextNodes, inputNodeIds}`.
//! Node state is stored without its kind discriminant (the `type` field
//! carries it); `inputNodeIds` maps the kind's named ports to id lists.
//! Loading instantiates all nodes first, wires edges second, then runs one
//! propagation pass so every schema is consistent before first use.

use super::{QueryGraph, propagation};
use crate::error::GraphError;
use crate::node::{NodeId, PrimaryPort};
use crate::registry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const PRIMARY_PORT: &str = "primary";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDoc {
    pub nodes: Vec<NodeDoc>,
    pub root_node_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_layouts: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDoc {
    pub node_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub state: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_node_ids: BTreeMap<String, Vec<String>>,
}

/// Captures the whole graph as a document.
pub fn serialize(graph: &QueryGraph) -> Result<GraphDoc, GraphError> {
    let mut nodes = Vec::with_capacity(graph.len());
    for node in graph.iter() {
        let kind = node.kind();
        let mut input_node_ids = BTreeMap::new();
        if let Some(primary) = &node.primary_input {
            input_node_ids.insert(PRIMARY_PORT.to_string(), vec![primary.to_string()]);
        }
        if !node.secondary_inputs.is_empty() {
            input_node_ids.insert(
                kind.secondary_port_name().to_string(),
                node.secondary_inputs.iter().map(NodeId::to_string).collect(),
            );
        }
        nodes.push(NodeDoc {
            node_id: node.id.to_string(),
            kind: kind.tag().to_string(),
            state: registry::encode_state(&node.state)?,
            next_nodes: node.next_nodes.iter().map(NodeId::to_string).collect(),
            input_node_ids,
        });
    }
    Ok(GraphDoc {
        nodes,
        root_node_ids: graph.root_nodes().iter().map(NodeId::to_string).collect(),
        selected_node_id: graph.selected().map(NodeId::to_string),
        node_layouts: graph.layouts().cloned(),
    })
}

/// Rebuilds a graph from a document. Any reference to an id with no matching
/// node fails the whole load with [`GraphError::DanglingReference`]; wiring
/// that forms a cycle across nodes fails with
/// [`GraphError::MalformedDocument`]. A node referencing itself loads, but
/// carries [`NodeIssue::SelfReference`](crate::error::NodeIssue) and refuses
/// to compile.
pub fn deserialize(doc: GraphDoc) -> Result<QueryGraph, GraphError> {
    let mut graph = QueryGraph::new();

    // Phase 1: instantiate every node under its persisted id.
    for node_doc in &doc.nodes {
        let id = NodeId::new(node_doc.node_id.clone());
        if graph.node(&id).is_ok() {
            return Err(GraphError::MalformedDocument(format!(
                "duplicate node id '{}'",
                id
            )));
        }
        let state = registry::decode_state(&node_doc.kind, node_doc.state.clone())?;
        graph.insert_with_id(id, state);
    }
    graph.bump_id_allocator();

    // Phase 2: check forward references resolve. next_nodes themselves are
    // derived from the port wiring below.
    for node_doc in &doc.nodes {
        for next in &node_doc.next_nodes {
            require_exists(&graph, next)?;
        }
    }

    // Phase 3: wire ports, then propagate once over everything.
    for node_doc in &doc.nodes {
        let id = NodeId::new(node_doc.node_id.clone());
        let kind = graph.node(&id)?.kind();
        for (port, inputs) in &node_doc.input_node_ids {
            for input in inputs {
                require_exists(&graph, input)?;
            }
            if port == PRIMARY_PORT {
                if kind.primary_port() == PrimaryPort::None || inputs.len() > 1 {
                    return Err(GraphError::MalformedDocument(format!(
                        "node '{}' cannot take {} primary inputs",
                        id,
                        inputs.len()
                    )));
                }
                let node = graph.node_mut(&id)?;
                node.primary_input = inputs.first().map(|i| NodeId::new(i.clone()));
            } else if port == kind.secondary_port_name() {
                let node = graph.node_mut(&id)?;
                node.secondary_inputs = inputs.iter().map(|i| NodeId::new(i.clone())).collect();
            } else {
                return Err(GraphError::MalformedDocument(format!(
                    "unknown port '{}' on node '{}'",
                    port, id
                )));
            }
        }
    }
    rebuild_next_nodes(&mut graph)?;
    // A cyclic document would leave part of the graph unrefreshed; the
    // propagation pass visits every node exactly when the wiring is acyclic.
    let refreshed = propagation::propagate_all(&mut graph)?;
    if refreshed.len() != graph.len() {
        return Err(GraphError::MalformedDocument(
            "document wiring contains a cycle".to_string(),
        ));
    }

    if let Some(selected) = &doc.selected_node_id {
        let id = NodeId::new(selected.clone());
        if graph.node(&id).is_ok() {
            graph.select(&id)?;
        }
    }
    graph.set_layouts(doc.node_layouts);
    Ok(graph)
}

/// Serializes to a JSON string.
pub fn to_json(graph: &QueryGraph) -> Result<String, GraphError> {
    let doc = serialize(graph)?;
    serde_json::to_string_pretty(&doc).map_err(|e| GraphError::MalformedDocument(e.to_string()))
}

/// Loads a graph from a JSON string.
pub fn from_json(json: &str) -> Result<QueryGraph, GraphError> {
    let doc: GraphDoc =
        serde_json::from_str(json).map_err(|e| GraphError::MalformedDocument(e.to_string()))?;
    deserialize(doc)
}

fn require_exists(graph: &QueryGraph, id: &str) -> Result<(), GraphError> {
    if graph.node(&NodeId::new(id)).is_err() {
        return Err(GraphError::DanglingReference {
            missing_node_id: id.to_string(),
        });
    }
    Ok(())
}

fn rebuild_next_nodes(graph: &mut QueryGraph) -> Result<(), GraphError> {
    let edges: Vec<(NodeId, NodeId)> = graph
        .iter()
        .flat_map(|node| {
            node.input_ids()
                .map(|input| (input.clone(), node.id.clone()))
                .collect::<Vec<_>>()
        })
        .collect();
    for (from, to) in edges {
        graph.node_mut(&from)?.next_nodes.push(to);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{SemanticType, SourceColumn};
    use crate::node::{NodeState, TableState};

    fn table(name: &str) -> NodeState {
        NodeState::Table(TableState {
            table_name: name.to_string(),
            module: None,
            columns: vec![SourceColumn::new("id", SemanticType::Id)],
        })
    }

    #[test]
    fn round_trip_preserves_topology_and_state() {
        let mut g = QueryGraph::new();
        let t = g.add_node(table("slice"));
        let f = g.add_node(NodeState::Filter(Default::default()));
        g.connect_primary(&t, &f).unwrap();
        g.select(&f).unwrap();

        let loaded = deserialize(serialize(&g).unwrap()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.node(&f).unwrap().primary_input, Some(t.clone()));
        assert_eq!(loaded.node(&t).unwrap().state, g.node(&t).unwrap().state);
        assert_eq!(loaded.selected(), Some(&f));
        assert_eq!(
            loaded.node(&f).unwrap().final_cols,
            g.node(&f).unwrap().final_cols
        );
    }

    #[test]
    fn dangling_input_reference_fails_the_load() {
        let mut g = QueryGraph::new();
        let t = g.add_node(table("slice"));
        let f = g.add_node(NodeState::Filter(Default::default()));
        g.connect_primary(&t, &f).unwrap();

        let mut doc = serialize(&g).unwrap();
        doc.nodes.retain(|n| n.node_id != t.to_string());
        assert!(matches!(
            deserialize(doc),
            Err(GraphError::DanglingReference { .. })
        ));
    }

    #[test]
    fn loaded_graph_allocates_fresh_ids_past_persisted_ones() {
        let mut g = QueryGraph::new();
        g.add_node(table("a"));
        g.add_node(table("b"));

        let mut loaded = deserialize(serialize(&g).unwrap()).unwrap();
        let fresh = loaded.add_node(table("c"));
        assert_eq!(loaded.len(), 3);
        assert!(loaded.iter().filter(|n| n.id == fresh).count() == 1);
    }

    #[test]
    fn unknown_kind_tag_fails_the_load() {
        let json = r#"{"nodes":[{"nodeId":"n0","type":"metrics","state":{}}],"rootNodeIds":["n0"]}"#;
        assert!(matches!(
            from_json(json),
            Err(GraphError::UnknownNodeKind { .. })
        ));
    }
}
