//! Query nodes: the polymorphic units of the dataflow graph.
//!
//! Every node has a stable identity, a kind tag, kind-specific state, a
//! distinguished primary input plus a multiplicity-constrained list of
//! secondary inputs, and a computed output schema (`final_cols`). The kind set
//! is closed; behavior is dispatched through [`NodeState`] so the registry can
//! stay a plain data table.

use crate::columns::ColumnDescriptor;
use crate::error::NodeIssue;
use serde::{Deserialize, Serialize};
use std::fmt;

mod aggregation;
mod combinators;
mod intervals;
mod modifiers;
mod sources;

pub use aggregation::{AggregationEntry, AggregationState};
pub use combinators::{JoinSide, JoinState, UnionState};
pub use intervals::{CreateSlicesState, FilterDuringState, IntervalIntersectState};
pub use modifiers::{
    AddColumnsState, FilterState, LimitOffsetState, ModifyColumnsState, SortState,
};
pub use sources::{RawQueryState, SimpleSlicesState, TableState, TimeRangeMode, TimeRangeState};

/// Opaque, globally unique node identity, stable across serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed enumeration of node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Table,
    RawQuery,
    SimpleSlices,
    TimeRange,
    Filter,
    Sort,
    ModifyColumns,
    LimitOffset,
    AddColumns,
    Aggregation,
    Join,
    Union,
    IntervalIntersect,
    CreateSlices,
    FilterDuring,
}

/// Whether a kind consumes a primary input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryPort {
    None,
    Optional,
    Required,
}

impl NodeKind {
    /// The string tag used in serialized documents.
    pub fn tag(self) -> &'static str {
        match self {
            NodeKind::Table => "table",
            NodeKind::RawQuery => "raw_query",
            NodeKind::SimpleSlices => "simple_slices",
            NodeKind::TimeRange => "time_range",
            NodeKind::Filter => "filter",
            NodeKind::Sort => "sort",
            NodeKind::ModifyColumns => "modify_columns",
            NodeKind::LimitOffset => "limit_offset",
            NodeKind::AddColumns => "add_columns",
            NodeKind::Aggregation => "aggregation",
            NodeKind::Join => "join",
            NodeKind::Union => "union",
            NodeKind::IntervalIntersect => "interval_intersect",
            NodeKind::CreateSlices => "create_slices",
            NodeKind::FilterDuring => "filter_during",
        }
    }

    pub fn primary_port(self) -> PrimaryPort {
        match self {
            NodeKind::Table | NodeKind::SimpleSlices | NodeKind::TimeRange => PrimaryPort::None,
            NodeKind::Join | NodeKind::Union | NodeKind::CreateSlices => PrimaryPort::None,
            NodeKind::RawQuery => PrimaryPort::Optional,
            NodeKind::Filter
            | NodeKind::Sort
            | NodeKind::ModifyColumns
            | NodeKind::LimitOffset
            | NodeKind::AddColumns
            | NodeKind::Aggregation
            | NodeKind::IntervalIntersect
            | NodeKind::FilterDuring => PrimaryPort::Required,
        }
    }

    /// Declared `{min, max}` multiplicity of the secondary input list.
    /// `None` for max means unbounded.
    pub fn secondary_multiplicity(self) -> (usize, Option<usize>) {
        match self {
            NodeKind::Table
            | NodeKind::SimpleSlices
            | NodeKind::TimeRange
            | NodeKind::Filter
            | NodeKind::Sort
            | NodeKind::ModifyColumns
            | NodeKind::LimitOffset
            | NodeKind::Aggregation => (0, Some(0)),
            NodeKind::AddColumns => (0, Some(1)),
            NodeKind::RawQuery => (0, None),
            NodeKind::Join | NodeKind::CreateSlices => (2, Some(2)),
            NodeKind::Union => (2, None),
            NodeKind::IntervalIntersect | NodeKind::FilterDuring => (1, None),
        }
    }

    /// The named secondary ports recorded in serialized documents. Kinds with
    /// a homogeneous input list use a single collective name.
    pub fn secondary_port_name(self) -> &'static str {
        match self {
            NodeKind::Join => "sides",
            NodeKind::Union => "sources",
            NodeKind::CreateSlices => "boundaries",
            NodeKind::IntervalIntersect | NodeKind::FilterDuring => "intervals",
            NodeKind::RawQuery => "dependencies",
            NodeKind::AddColumns => "join_source",
            _ => "inputs",
        }
    }

    pub fn is_source(self) -> bool {
        matches!(
            self,
            NodeKind::Table | NodeKind::RawQuery | NodeKind::SimpleSlices | NodeKind::TimeRange
        )
    }
}

/// Kind-specific configuration. One payload struct per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeState {
    Table(TableState),
    RawQuery(RawQueryState),
    SimpleSlices(SimpleSlicesState),
    TimeRange(TimeRangeState),
    Filter(FilterState),
    Sort(SortState),
    ModifyColumns(ModifyColumnsState),
    LimitOffset(LimitOffsetState),
    AddColumns(AddColumnsState),
    Aggregation(AggregationState),
    Join(JoinState),
    Union(UnionState),
    IntervalIntersect(IntervalIntersectState),
    CreateSlices(CreateSlicesState),
    FilterDuring(FilterDuringState),
}

/// The already-propagated schemas of a node's inputs, as visible downstream
/// (checked, non-missing columns only).
pub struct InputSchemas<'a> {
    pub primary: Option<&'a [ColumnDescriptor]>,
    pub secondary: Vec<&'a [ColumnDescriptor]>,
}

impl InputSchemas<'_> {
    pub fn empty() -> InputSchemas<'static> {
        InputSchemas {
            primary: None,
            secondary: Vec::new(),
        }
    }
}

impl NodeState {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeState::Table(_) => NodeKind::Table,
            NodeState::RawQuery(_) => NodeKind::RawQuery,
            NodeState::SimpleSlices(_) => NodeKind::SimpleSlices,
            NodeState::TimeRange(_) => NodeKind::TimeRange,
            NodeState::Filter(_) => NodeKind::Filter,
            NodeState::Sort(_) => NodeKind::Sort,
            NodeState::ModifyColumns(_) => NodeKind::ModifyColumns,
            NodeState::LimitOffset(_) => NodeKind::LimitOffset,
            NodeState::AddColumns(_) => NodeKind::AddColumns,
            NodeState::Aggregation(_) => NodeKind::Aggregation,
            NodeState::Join(_) => NodeKind::Join,
            NodeState::Union(_) => NodeKind::Union,
            NodeState::IntervalIntersect(_) => NodeKind::IntervalIntersect,
            NodeState::CreateSlices(_) => NodeKind::CreateSlices,
            NodeState::FilterDuring(_) => NodeKind::FilterDuring,
        }
    }

    /// Recomputes the node's output schema from its current configuration and
    /// its inputs' schemas. This is also where per-kind post-update hooks run:
    /// kinds with annotated column lists refresh them here, preserving user
    /// choices by display-name match.
    pub(crate) fn recompute(&mut self, inputs: &InputSchemas<'_>) -> Vec<ColumnDescriptor> {
        match self {
            NodeState::Table(s) => s.final_cols(),
            NodeState::RawQuery(s) => s.final_cols(),
            NodeState::SimpleSlices(s) => s.final_cols(),
            NodeState::TimeRange(s) => s.final_cols(),
            NodeState::Filter(_) | NodeState::Sort(_) | NodeState::LimitOffset(_) => {
                inputs.primary.map(<[_]>::to_vec).unwrap_or_default()
            }
            NodeState::ModifyColumns(s) => s.recompute(inputs.primary.unwrap_or(&[])),
            NodeState::AddColumns(s) => s.recompute(inputs),
            NodeState::Aggregation(s) => s.recompute(inputs.primary.unwrap_or(&[])),
            NodeState::Join(s) => s.recompute(inputs),
            NodeState::Union(s) => s.recompute(&inputs.secondary),
            NodeState::IntervalIntersect(s) => s.recompute(inputs),
            NodeState::CreateSlices(s) => s.final_cols(),
            NodeState::FilterDuring(s) => s.recompute(inputs),
        }
    }

    /// Kind-specific validation, assuming connection multiplicities have
    /// already been checked by the graph.
    pub(crate) fn validate(&self, inputs: &InputSchemas<'_>) -> Result<(), NodeIssue> {
        match self {
            NodeState::Table(s) => s.validate(),
            NodeState::RawQuery(s) => s.validate(),
            NodeState::SimpleSlices(_) => Ok(()),
            NodeState::TimeRange(s) => s.validate(),
            NodeState::Filter(s) => s.validate(inputs.primary.unwrap_or(&[])),
            NodeState::Sort(s) => s.validate(inputs.primary.unwrap_or(&[])),
            NodeState::ModifyColumns(s) => s.validate(),
            NodeState::LimitOffset(s) => s.validate(),
            NodeState::AddColumns(s) => s.validate(inputs),
            NodeState::Aggregation(s) => s.validate(inputs.primary.unwrap_or(&[])),
            NodeState::Join(s) => s.validate(),
            NodeState::Union(s) => s.validate(&inputs.secondary),
            NodeState::IntervalIntersect(s) => s.validate(inputs),
            NodeState::CreateSlices(s) => s.validate(&inputs.secondary),
            NodeState::FilterDuring(s) => s.validate(inputs),
        }
    }

    /// Human-readable label for the node.
    pub fn title(&self) -> String {
        match self {
            NodeState::Table(s) => format!("Table: {}", s.table_name),
            NodeState::RawQuery(_) => "Query".to_string(),
            NodeState::SimpleSlices(_) => "Slices".to_string(),
            NodeState::TimeRange(_) => "Time range".to_string(),
            NodeState::Filter(_) => "Filter".to_string(),
            NodeState::Sort(_) => "Sort".to_string(),
            NodeState::ModifyColumns(_) => "Modify columns".to_string(),
            NodeState::LimitOffset(_) => "Limit".to_string(),
            NodeState::AddColumns(_) => "Add columns".to_string(),
            NodeState::Aggregation(_) => "Aggregate".to_string(),
            NodeState::Join(_) => "Join".to_string(),
            NodeState::Union(_) => "Union".to_string(),
            NodeState::IntervalIntersect(_) => "Interval intersect".to_string(),
            NodeState::CreateSlices(_) => "Create slices".to_string(),
            NodeState::FilterDuring(_) => "Filter during".to_string(),
        }
    }
}

/// One operation in the dataflow graph.
#[derive(Debug, Clone)]
pub struct QueryNode {
    pub id: NodeId,
    pub state: NodeState,
    pub primary_input: Option<NodeId>,
    pub secondary_inputs: Vec<NodeId>,
    /// Derived back-pointers to direct downstream consumers. Recomputed by
    /// the graph whenever edges change; never an ownership edge.
    pub next_nodes: Vec<NodeId>,
    /// The computed, ordered output schema.
    pub final_cols: Vec<ColumnDescriptor>,
    /// The current validation issue, if any.
    pub issue: Option<NodeIssue>,
}

impl QueryNode {
    pub fn new(id: NodeId, state: NodeState) -> Self {
        Self {
            id,
            state,
            primary_input: None,
            secondary_inputs: Vec::new(),
            next_nodes: Vec::new(),
            final_cols: Vec::new(),
            issue: None,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.state.kind()
    }

    pub fn is_valid(&self) -> bool {
        self.issue.is_none()
    }

    pub fn title(&self) -> String {
        self.state.title()
    }

    /// Descriptive content for UI display. Must never fail.
    pub fn details(&self) -> String {
        let cols: Vec<&str> = self
            .final_cols
            .iter()
            .filter(|c| c.checked && !c.missing)
            .map(|c| c.display_name())
            .collect();
        match &self.issue {
            Some(issue) => format!("{}: {}", self.title(), issue),
            None => format!("{} ({})", self.title(), cols.join(", ")),
        }
    }

    /// The columns a downstream consumer sees: checked, non-missing entries
    /// under their display names.
    pub fn visible_cols(&self) -> Vec<ColumnDescriptor> {
        visible_view(&self.final_cols)
    }

    /// All upstream connections, primary first.
    pub fn input_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.primary_input.iter().chain(self.secondary_inputs.iter())
    }
}

/// Projects an annotated column list to what the next node downstream sees.
pub(crate) fn visible_view(cols: &[ColumnDescriptor]) -> Vec<ColumnDescriptor> {
    cols.iter()
        .filter(|c| c.checked && !c.missing)
        .map(ColumnDescriptor::as_upstream_of_next)
        .collect()
}

/// Options for [`merge_annotated`].
pub(crate) struct MergeOptions {
    /// Checked state given to upstream columns with no prior entry.
    pub default_checked: bool,
    /// Keep the old entry order for surviving columns (user reordering);
    /// otherwise follow the new upstream order.
    pub preserve_old_order: bool,
    /// Retain vanished entries that carry an explicit user annotation as
    /// synthetic missing entries instead of silently dropping them.
    pub retain_annotated: bool,
}

/// Rebuilds an annotated column list against a new upstream schema, matching
/// old entries by current display name so checked flags and aliases survive
/// upstream edits.
pub(crate) fn merge_annotated(
    old: &[ColumnDescriptor],
    upstream: &[ColumnDescriptor],
    opts: &MergeOptions,
) -> Vec<ColumnDescriptor> {
    let mut merged: Vec<ColumnDescriptor> = Vec::with_capacity(upstream.len());

    let carry = |up: &ColumnDescriptor| -> ColumnDescriptor {
        match old.iter().find(|o| o.source.name == up.source.name) {
            Some(prev) => ColumnDescriptor {
                source: up.source.clone(),
                checked: prev.checked,
                alias: prev.alias.clone(),
                missing: false,
            },
            None => {
                let mut fresh = up.clone();
                fresh.checked = opts.default_checked;
                fresh
            }
        }
    };

    if opts.preserve_old_order {
        for prev in old {
            if let Some(up) = upstream.iter().find(|u| u.source.name == prev.source.name) {
                merged.push(carry(up));
            }
        }
        for up in upstream {
            if !old.iter().any(|o| o.source.name == up.source.name) {
                merged.push(carry(up));
            }
        }
    } else {
        merged.extend(upstream.iter().map(carry));
    }

    if opts.retain_annotated {
        for prev in old {
            let gone = !upstream.iter().any(|u| u.source.name == prev.source.name);
            if gone && prev.checked && prev.alias.is_some() {
                let mut placeholder = ColumnDescriptor::missing(prev.source.name.clone());
                placeholder.alias = prev.alias.clone();
                merged.push(placeholder);
            }
        }
    }

    merged
}

/// True when a schema exposes the `id`, `ts` and `dur` columns required by the
/// interval-algebra kinds.
pub(crate) fn has_interval_columns(cols: &[ColumnDescriptor]) -> Option<&'static str> {
    for required in ["id", "ts", "dur"] {
        if !cols.iter().any(|c| c.display_name() == required) {
            return Some(required);
        }
    }
    None
}
