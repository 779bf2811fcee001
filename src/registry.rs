//! The node-kind registry.
//!
//! A plain data table over the closed [`NodeKind`] set: tag lookup, default
//! state construction and the JSON codec for persisted node state. Documents
//! store each node's state without the discriminant (the node's `type` field
//! carries it), so the codec injects and strips the serde tag here.

use crate::error::GraphError;
use crate::node::{NodeKind, NodeState};
use serde_json::Value;

/// Every registered kind, in palette order.
pub const ALL_KINDS: [NodeKind; 15] = [
    NodeKind::Table,
    NodeKind::RawQuery,
    NodeKind::SimpleSlices,
    NodeKind::TimeRange,
    NodeKind::Filter,
    NodeKind::Sort,
    NodeKind::ModifyColumns,
    NodeKind::LimitOffset,
    NodeKind::AddColumns,
    NodeKind::Aggregation,
    NodeKind::Join,
    NodeKind::Union,
    NodeKind::IntervalIntersect,
    NodeKind::CreateSlices,
    NodeKind::FilterDuring,
];

/// Static descriptor for one kind, for palette and inspector UIs.
#[derive(Debug, Clone, Copy)]
pub struct NodeKindInfo {
    pub kind: NodeKind,
    pub display_name: &'static str,
}

pub fn kind_info(kind: NodeKind) -> NodeKindInfo {
    let display_name = match kind {
        NodeKind::Table => "Table",
        NodeKind::RawQuery => "SQL query",
        NodeKind::SimpleSlices => "Slices",
        NodeKind::TimeRange => "Time range",
        NodeKind::Filter => "Filter",
        NodeKind::Sort => "Sort",
        NodeKind::ModifyColumns => "Modify columns",
        NodeKind::LimitOffset => "Limit rows",
        NodeKind::AddColumns => "Add columns",
        NodeKind::Aggregation => "Aggregate",
        NodeKind::Join => "Join",
        NodeKind::Union => "Union",
        NodeKind::IntervalIntersect => "Interval intersect",
        NodeKind::CreateSlices => "Create slices",
        NodeKind::FilterDuring => "Filter during",
    };
    NodeKindInfo { kind, display_name }
}

/// Resolves a serialized kind tag. `None` for tags this build doesn't know.
pub fn kind_from_tag(tag: &str) -> Option<NodeKind> {
    ALL_KINDS.iter().copied().find(|k| k.tag() == tag)
}

/// A fresh, unconfigured state for the given kind.
pub fn default_state(kind: NodeKind) -> NodeState {
    match kind {
        NodeKind::Table => NodeState::Table(Default::default()),
        NodeKind::RawQuery => NodeState::RawQuery(Default::default()),
        NodeKind::SimpleSlices => NodeState::SimpleSlices(Default::default()),
        NodeKind::TimeRange => NodeState::TimeRange(Default::default()),
        NodeKind::Filter => NodeState::Filter(Default::default()),
        NodeKind::Sort => NodeState::Sort(Default::default()),
        NodeKind::ModifyColumns => NodeState::ModifyColumns(Default::default()),
        NodeKind::LimitOffset => NodeState::LimitOffset(Default::default()),
        NodeKind::AddColumns => NodeState::AddColumns(Default::default()),
        NodeKind::Aggregation => NodeState::Aggregation(Default::default()),
        NodeKind::Join => NodeState::Join(Default::default()),
        NodeKind::Union => NodeState::Union(Default::default()),
        NodeKind::IntervalIntersect => NodeState::IntervalIntersect(Default::default()),
        NodeKind::CreateSlices => NodeState::CreateSlices(Default::default()),
        NodeKind::FilterDuring => NodeState::FilterDuring(Default::default()),
    }
}

/// Decodes a persisted state payload under the given kind tag.
pub fn decode_state(tag: &str, payload: Value) -> Result<NodeState, GraphError> {
    let kind = kind_from_tag(tag).ok_or_else(|| GraphError::UnknownNodeKind {
        kind: tag.to_string(),
    })?;
    let mut object = match payload {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(GraphError::MalformedDocument(format!(
                "node state must be an object, got {}",
                other
            )));
        }
    };
    object.insert("kind".to_string(), Value::String(kind.tag().to_string()));
    serde_json::from_value(Value::Object(object))
        .map_err(|e| GraphError::MalformedDocument(e.to_string()))
}

/// Encodes a node's state as a bare payload, without the kind discriminant.
pub fn encode_state(state: &NodeState) -> Result<Value, GraphError> {
    let mut value =
        serde_json::to_value(state).map_err(|e| GraphError::MalformedDocument(e.to_string()))?;
    if let Value::Object(map) = &mut value {
        map.remove("kind");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_kind_resolves_its_own_tag() {
        for kind in ALL_KINDS {
            assert_eq!(kind_from_tag(kind.tag()), Some(kind));
            assert_eq!(default_state(kind).kind(), kind);
        }
    }

    #[test]
    fn unknown_tag_is_an_error() {
        assert!(kind_from_tag("metrics").is_none());
        assert!(matches!(
            decode_state("metrics", json!({})),
            Err(GraphError::UnknownNodeKind { .. })
        ));
    }

    #[test]
    fn state_codec_round_trips_without_discriminant() {
        let state = NodeState::Table(crate::node::TableState {
            table_name: "slice".to_string(),
            module: None,
            columns: Vec::new(),
        });
        let payload = encode_state(&state).unwrap();
        assert!(payload.get("kind").is_none());
        let back = decode_state("table", payload).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn null_payload_yields_default_state() {
        let state = decode_state("filter", Value::Null).unwrap();
        assert_eq!(state, default_state(NodeKind::Filter));
    }
}
