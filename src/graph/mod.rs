//! The query graph: an arena of [`QueryNode`]s plus the edge-editing rules.
//!
//! All structural edits go through this type so the invariants hold at every
//! step: edges reference live nodes, connections respect each kind's port
//! multiplicities, the graph stays acyclic, and every edit leaves the affected
//! downstream schemas recomputed.

use crate::columns::ColumnDescriptor;
use crate::error::{GraphError, NodeIssue};
use crate::node::{InputSchemas, NodeId, NodeState, PrimaryPort, QueryNode};
use ahash::AHashMap;

pub mod persist;
pub mod propagation;

#[derive(Debug, Default)]
pub struct QueryGraph {
    nodes: AHashMap<NodeId, QueryNode>,
    /// Node ids in insertion order; drives stable iteration and root listing.
    order: Vec<NodeId>,
    selected: Option<NodeId>,
    /// Opaque per-node layout data owned by the host UI; carried through
    /// serialization untouched.
    layouts: Option<serde_json::Value>,
    next_id: u64,
}

impl QueryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &NodeId) -> Result<&QueryNode, GraphError> {
        self.nodes.get(id).ok_or_else(|| GraphError::NodeNotFound {
            node_id: id.to_string(),
        })
    }

    pub(crate) fn node_mut(&mut self, id: &NodeId) -> Result<&mut QueryNode, GraphError> {
        self.nodes.get_mut(id).ok_or_else(|| GraphError::NodeNotFound {
            node_id: id.to_string(),
        })
    }

    /// All nodes, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &QueryNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Source nodes: those with no input connections.
    pub fn root_nodes(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|n| n.primary_input.is_none() && n.secondary_inputs.is_empty())
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn selected(&self) -> Option<&NodeId> {
        self.selected.as_ref()
    }

    pub fn select(&mut self, id: &NodeId) -> Result<(), GraphError> {
        self.node(id)?;
        self.selected = Some(id.clone());
        Ok(())
    }

    pub fn deselect(&mut self) {
        self.selected = None;
    }

    pub fn layouts(&self) -> Option<&serde_json::Value> {
        self.layouts.as_ref()
    }

    pub fn set_layouts(&mut self, layouts: Option<serde_json::Value>) {
        self.layouts = layouts;
    }

    /// Moves the id allocator past every numeric id currently in the arena,
    /// so ids minted after a load never collide with persisted ones.
    pub(crate) fn bump_id_allocator(&mut self) {
        for id in &self.order {
            if let Some(n) = id.as_str().strip_prefix('n').and_then(|s| s.parse::<u64>().ok()) {
                self.next_id = self.next_id.max(n + 1);
            }
        }
    }

    fn allocate_id(&mut self) -> NodeId {
        loop {
            let candidate = NodeId::new(format!("n{}", self.next_id));
            self.next_id += 1;
            if !self.nodes.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Adds a node with a fresh id and returns the id. The node's schema and
    /// validation state are computed immediately.
    pub fn add_node(&mut self, state: NodeState) -> NodeId {
        let id = self.allocate_id();
        self.insert_with_id(id.clone(), state);
        // A just-inserted node always exists.
        let _ = self.refresh_node(&id);
        id
    }

    /// Inserts a node under a caller-chosen id, without refreshing it. Used
    /// by deserialization, which runs one propagation pass at the end.
    pub(crate) fn insert_with_id(&mut self, id: NodeId, state: NodeState) {
        let node = QueryNode::new(id.clone(), state);
        self.nodes.insert(id.clone(), node);
        self.order.push(id);
    }

    /// Clones a node's configuration and input connections under a fresh id.
    /// Downstream connections are not cloned.
    pub fn duplicate_node(&mut self, id: &NodeId) -> Result<NodeId, GraphError> {
        let source = self.node(id)?;
        let state = source.state.clone();
        let primary = source.primary_input.clone();
        let secondary = source.secondary_inputs.clone();

        let new_id = self.allocate_id();
        self.insert_with_id(new_id.clone(), state);
        {
            let node = self.node_mut(&new_id)?;
            node.primary_input = primary.clone();
            node.secondary_inputs = secondary.clone();
        }
        for input in primary.iter().chain(secondary.iter()) {
            self.node_mut(input)?.next_nodes.push(new_id.clone());
        }
        propagation::propagate_from(self, &new_id)?;
        Ok(new_id)
    }

    /// Removes a node and every edge touching it, then recomputes former
    /// consumers. Returns the ids whose schemas were refreshed.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<Vec<NodeId>, GraphError> {
        let removed = self
            .nodes
            .remove(id)
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: id.to_string(),
            })?;
        self.order.retain(|n| n != id);
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
        }
        for input in removed.input_ids() {
            if let Some(node) = self.nodes.get_mut(input) {
                node.next_nodes.retain(|n| n != id);
            }
        }

        let mut refreshed = Vec::new();
        for consumer in &removed.next_nodes {
            let Some(node) = self.nodes.get_mut(consumer) else {
                continue;
            };
            if node.primary_input.as_ref() == Some(id) {
                node.primary_input = None;
            }
            node.secondary_inputs.retain(|n| n != id);
            refreshed.extend(propagation::propagate_from(self, consumer)?);
        }
        Ok(refreshed)
    }

    /// Replaces a node's configuration and recomputes it and everything
    /// downstream. Returns the refreshed ids in propagation order.
    pub fn set_state(
        &mut self,
        id: &NodeId,
        state: NodeState,
    ) -> Result<Vec<NodeId>, GraphError> {
        let node = self.node_mut(id)?;
        node.state = state;
        propagation::propagate_from(self, id)
    }

    /// Applies an in-place edit to a node's configuration, then recomputes it
    /// and everything downstream.
    pub fn update_state<F>(&mut self, id: &NodeId, edit: F) -> Result<Vec<NodeId>, GraphError>
    where
        F: FnOnce(&mut NodeState),
    {
        let node = self.node_mut(id)?;
        edit(&mut node.state);
        propagation::propagate_from(self, id)
    }

    /// Connects `from`'s output to `to`'s primary input, replacing any
    /// existing primary connection.
    pub fn connect_primary(
        &mut self,
        from: &NodeId,
        to: &NodeId,
    ) -> Result<Vec<NodeId>, GraphError> {
        self.check_edge(from, to)?;
        if self.node(to)?.kind().primary_port() == PrimaryPort::None {
            return Err(GraphError::PortUnsupported {
                node_id: to.to_string(),
                port: "primary",
            });
        }
        if let Some(previous) = self.node(to)?.primary_input.clone() {
            self.node_mut(&previous)?.next_nodes.retain(|n| n != to);
        }
        self.node_mut(to)?.primary_input = Some(from.clone());
        self.node_mut(from)?.next_nodes.push(to.clone());
        propagation::propagate_from(self, to)
    }

    /// Appends `from` to `to`'s secondary input list.
    pub fn connect_secondary(
        &mut self,
        from: &NodeId,
        to: &NodeId,
    ) -> Result<Vec<NodeId>, GraphError> {
        self.check_edge(from, to)?;
        let kind = self.node(to)?.kind();
        let (_, max) = kind.secondary_multiplicity();
        let connected = self.node(to)?.secondary_inputs.len();
        match max {
            Some(0) => {
                return Err(GraphError::PortUnsupported {
                    node_id: to.to_string(),
                    port: kind.secondary_port_name(),
                });
            }
            Some(max) if connected >= max => {
                return Err(GraphError::PortFull {
                    node_id: to.to_string(),
                    max,
                });
            }
            _ => {}
        }
        self.node_mut(to)?.secondary_inputs.push(from.clone());
        self.node_mut(from)?.next_nodes.push(to.clone());
        propagation::propagate_from(self, to)
    }

    pub fn disconnect_primary(&mut self, to: &NodeId) -> Result<Vec<NodeId>, GraphError> {
        let Some(from) = self.node(to)?.primary_input.clone() else {
            return Ok(Vec::new());
        };
        self.node_mut(&from)?.next_nodes.retain(|n| n != to);
        self.node_mut(to)?.primary_input = None;
        propagation::propagate_from(self, to)
    }

    pub fn disconnect_secondary(
        &mut self,
        from: &NodeId,
        to: &NodeId,
    ) -> Result<Vec<NodeId>, GraphError> {
        let node = self.node_mut(to)?;
        let before = node.secondary_inputs.len();
        node.secondary_inputs.retain(|n| n != from);
        if node.secondary_inputs.len() == before {
            return Ok(Vec::new());
        }
        self.node_mut(from)?.next_nodes.retain(|n| n != to);
        propagation::propagate_from(self, to)
    }

    /// Both endpoints must exist and the edge must not close a cycle.
    fn check_edge(&self, from: &NodeId, to: &NodeId) -> Result<(), GraphError> {
        self.node(from)?;
        self.node(to)?;
        if from == to || self.is_ancestor(to, from) {
            return Err(GraphError::CycleDetected {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    /// Whether `candidate` is reachable walking upstream from `of`.
    pub fn is_ancestor(&self, candidate: &NodeId, of: &NodeId) -> bool {
        let mut stack: Vec<&NodeId> = match self.nodes.get(of) {
            Some(node) => node.input_ids().collect(),
            None => return false,
        };
        let mut seen: Vec<&NodeId> = Vec::new();
        while let Some(current) = stack.pop() {
            if current == candidate {
                return true;
            }
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            if let Some(node) = self.nodes.get(current) {
                stack.extend(node.input_ids());
            }
        }
        false
    }

    /// Recomputes one node's output schema and validation state from its
    /// inputs' already-propagated schemas.
    pub(crate) fn refresh_node(&mut self, id: &NodeId) -> Result<(), GraphError> {
        let node = self.node(id)?;
        let primary: Option<Vec<ColumnDescriptor>> = match &node.primary_input {
            Some(input) => Some(self.node(input)?.visible_cols()),
            None => None,
        };
        let mut secondary: Vec<Vec<ColumnDescriptor>> = Vec::new();
        for input in &node.secondary_inputs {
            secondary.push(self.node(input)?.visible_cols());
        }
        let structural_issue = self.structural_issue(node);

        let inputs = InputSchemas {
            primary: primary.as_deref(),
            secondary: secondary.iter().map(Vec::as_slice).collect(),
        };
        let node = self.node_mut(id)?;
        node.final_cols = node.state.recompute(&inputs);
        node.issue = match structural_issue {
            Some(issue) => Some(issue),
            None => node.state.validate(&inputs).err(),
        };
        Ok(())
    }

    /// Connection-level problems, checked before kind-specific validation:
    /// self-references, unmet port multiplicities and invalid upstream nodes.
    fn structural_issue(&self, node: &QueryNode) -> Option<NodeIssue> {
        // Live edits reject self-loops up front; a loaded document can still
        // carry one, and it surfaces as a node-level issue.
        if node.input_ids().any(|input| *input == node.id) {
            return Some(NodeIssue::SelfReference {
                node_id: node.id.to_string(),
            });
        }
        let kind = node.kind();
        if kind.primary_port() == PrimaryPort::Required && node.primary_input.is_none() {
            return Some(NodeIssue::NoInput);
        }
        let (min, _) = kind.secondary_multiplicity();
        let connected = node.secondary_inputs.len();
        if connected < min {
            return Some(NodeIssue::TooFewSources {
                required: min,
                connected,
            });
        }
        for input in node.input_ids() {
            if let Some(upstream) = self.nodes.get(input) {
                if let Some(issue) = &upstream.issue {
                    return Some(NodeIssue::UpstreamInvalid {
                        cause: issue.to_string(),
                    });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TableState;
    use crate::columns::{SemanticType, SourceColumn};

    fn table(name: &str) -> NodeState {
        NodeState::Table(TableState {
            table_name: name.to_string(),
            module: None,
            columns: vec![SourceColumn::new("id", SemanticType::Id)],
        })
    }

    #[test]
    fn connecting_back_upstream_is_a_cycle() {
        let mut g = QueryGraph::new();
        let a = g.add_node(table("slice"));
        let b = g.add_node(NodeState::Filter(Default::default()));
        let c = g.add_node(NodeState::Filter(Default::default()));
        g.connect_primary(&a, &b).unwrap();
        g.connect_primary(&b, &c).unwrap();

        assert!(matches!(
            g.connect_primary(&c, &b),
            Err(GraphError::CycleDetected { .. })
        ));
        assert!(matches!(
            g.connect_primary(&b, &b),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn secondary_port_multiplicity_is_enforced() {
        let mut g = QueryGraph::new();
        let a = g.add_node(table("a"));
        let b = g.add_node(table("b"));
        let c = g.add_node(table("c"));
        let join = g.add_node(NodeState::Join(Default::default()));

        g.connect_secondary(&a, &join).unwrap();
        g.connect_secondary(&b, &join).unwrap();
        assert!(matches!(
            g.connect_secondary(&c, &join),
            Err(GraphError::PortFull { max: 2, .. })
        ));
    }

    #[test]
    fn source_kinds_reject_input_connections() {
        let mut g = QueryGraph::new();
        let a = g.add_node(table("a"));
        let b = g.add_node(table("b"));
        assert!(matches!(
            g.connect_primary(&a, &b),
            Err(GraphError::PortUnsupported { .. })
        ));
    }

    #[test]
    fn removing_a_node_invalidates_its_consumer() {
        let mut g = QueryGraph::new();
        let a = g.add_node(table("slice"));
        let f = g.add_node(NodeState::Filter(Default::default()));
        g.connect_primary(&a, &f).unwrap();
        assert!(g.node(&f).unwrap().is_valid());

        g.remove_node(&a).unwrap();
        assert_eq!(g.node(&f).unwrap().issue, Some(NodeIssue::NoInput));
        assert!(g.node(&f).unwrap().final_cols.is_empty());
    }

    #[test]
    fn duplicate_clones_state_and_inputs_under_a_fresh_id() {
        let mut g = QueryGraph::new();
        let a = g.add_node(table("slice"));
        let f = g.add_node(NodeState::Filter(Default::default()));
        g.connect_primary(&a, &f).unwrap();

        let copy = g.duplicate_node(&f).unwrap();
        assert_ne!(copy, f);
        let node = g.node(&copy).unwrap();
        assert_eq!(node.primary_input, Some(a.clone()));
        assert!(node.is_valid());
        assert!(g.node(&a).unwrap().next_nodes.contains(&copy));
    }
}
