//! Schema propagation: recomputing output schemas across the graph.
//!
//! Any structural or configuration edit recomputes the edited node and its
//! entire downstream closure in topological order, so every node is visited
//! exactly once per batch even across fan-in.

use super::QueryGraph;
use crate::error::GraphError;
use crate::node::NodeId;
use ahash::AHashMap;
use std::collections::VecDeque;

/// Recomputes `start` and everything downstream of it. Returns the visited
/// ids in the order they were refreshed.
pub(crate) fn propagate_from(
    graph: &mut QueryGraph,
    start: &NodeId,
) -> Result<Vec<NodeId>, GraphError> {
    graph.node(start)?;
    let mut set: Vec<NodeId> = Vec::new();
    let mut queue: VecDeque<NodeId> = VecDeque::from([start.clone()]);
    while let Some(current) = queue.pop_front() {
        if set.contains(&current) {
            continue;
        }
        for next in &graph.node(&current)?.next_nodes {
            queue.push_back(next.clone());
        }
        set.push(current);
    }
    propagate_set(graph, &set)
}

/// Recomputes every node in the graph. Used after deserialization, when no
/// schema can be assumed current.
pub fn propagate_all(graph: &mut QueryGraph) -> Result<Vec<NodeId>, GraphError> {
    let all: Vec<NodeId> = graph.iter().map(|n| n.id.clone()).collect();
    propagate_set(graph, &all)
}

/// Kahn's algorithm over the induced subgraph. Edges from outside the set
/// carry already-current schemas and contribute no in-degree. Self-loops
/// (only reachable through loaded documents) contribute none either, so the
/// node still refreshes and reports its own issue; a genuine multi-node
/// cycle leaves its nodes unvisited, which callers can detect by comparing
/// the returned batch against the set.
fn propagate_set(graph: &mut QueryGraph, set: &[NodeId]) -> Result<Vec<NodeId>, GraphError> {
    let mut in_degree: AHashMap<&NodeId, usize> = AHashMap::new();
    for id in set {
        let node = graph.node(id)?;
        let degree = node
            .input_ids()
            .filter(|input| *input != id && set.contains(input))
            .count();
        in_degree.insert(id, degree);
    }

    let mut ready: VecDeque<NodeId> = set
        .iter()
        .filter(|id| in_degree[*id] == 0)
        .cloned()
        .collect();
    let mut visited = Vec::with_capacity(set.len());
    while let Some(id) = ready.pop_front() {
        graph.refresh_node(&id)?;
        for next in graph.node(&id)?.next_nodes.clone() {
            if next == id {
                continue;
            }
            if let Some(degree) = in_degree.get_mut(&next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(next);
                }
            }
        }
        visited.push(id);
    }
    Ok(visited)
}
