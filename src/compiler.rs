//! Lowering validated query nodes into the structured-query IR.
//!
//! Compilation is pure and idempotent: it never mutates the graph, recurses
//! into inputs lazily, and fails closed. An invalid node, or any invalid
//! input anywhere upstream, yields `None` instead of partial IR.

use crate::graph::QueryGraph;
use crate::ir::{
    AggregateSpec, FilterOp, FilterSpec, FilterValue, IrOp, JoinType, SelectColumn, SqlDependency,
    StructuredQuery,
};
use crate::node::{
    AddColumnsState, FilterDuringState, JoinSide, JoinState, NodeId, NodeState, QueryNode,
    RawQueryState, SimpleSlicesState, TimeRangeState, UnionState,
};

/// Compiles the IR subtree rooted at the given node, or `None` when the node
/// or any of its required inputs is not in a compilable state.
pub fn structured_query(graph: &QueryGraph, id: &NodeId) -> Option<StructuredQuery> {
    let node = graph.node(id).ok()?;
    if !node.is_valid() {
        return None;
    }
    lower(graph, node)
}

/// A derived id for a synthesized pipeline stage. Node ids never contain
/// `:`, so stage ids cannot collide with real nodes.
fn stage_id(id: &NodeId, stage: &str) -> String {
    format!("{}:{}", id, stage)
}

fn compile_input(graph: &QueryGraph, id: &NodeId) -> Option<Box<StructuredQuery>> {
    structured_query(graph, id).map(Box::new)
}

fn lower(graph: &QueryGraph, node: &QueryNode) -> Option<StructuredQuery> {
    let id = &node.id;
    let op = match &node.state {
        NodeState::Table(s) => IrOp::TableScan {
            table_name: s.table_name.clone(),
            module: s.module.clone(),
        },
        NodeState::RawQuery(s) => lower_raw_query(graph, node, s)?,
        NodeState::SimpleSlices(s) => return Some(lower_simple_slices(id, s)),
        NodeState::TimeRange(s) => lower_time_range(s),
        NodeState::Filter(s) => IrOp::Filter {
            input: compile_input(graph, node.primary_input.as_ref()?)?,
            predicates: s.predicates.clone(),
        },
        NodeState::Sort(s) => IrOp::Sort {
            input: compile_input(graph, node.primary_input.as_ref()?)?,
            specs: s.specs.clone(),
        },
        NodeState::ModifyColumns(s) => IrOp::SelectColumns {
            input: compile_input(graph, node.primary_input.as_ref()?)?,
            columns: s
                .columns
                .iter()
                .filter(|c| c.checked && !c.missing)
                .map(|c| SelectColumn {
                    expr: c.source.name.clone(),
                    alias: c.alias.clone(),
                })
                .collect(),
        },
        NodeState::LimitOffset(s) => IrOp::Limit {
            input: compile_input(graph, node.primary_input.as_ref()?)?,
            limit: s.limit,
            offset: s.offset,
        },
        NodeState::AddColumns(s) => lower_add_columns(graph, node, s)?,
        NodeState::Aggregation(s) => IrOp::GroupBy {
            input: compile_input(graph, node.primary_input.as_ref()?)?,
            group_by: s
                .group_by_columns
                .iter()
                .filter(|c| c.checked)
                .map(|c| c.display_name().to_string())
                .collect(),
            aggregates: s
                .aggregations
                .iter()
                .map(|a| AggregateSpec {
                    op: a.op,
                    column: a.column.clone(),
                    result_name: a.effective_name(),
                    percentile: a.percentile,
                })
                .collect(),
            // Pinned projection: group-bys first, then aggregate outputs.
            select_columns: node
                .final_cols
                .iter()
                .map(|c| SelectColumn::name(c.display_name()))
                .collect(),
        },
        NodeState::Join(s) => lower_join(graph, node, s)?,
        NodeState::Union(s) => lower_union(graph, node, s)?,
        NodeState::IntervalIntersect(s) => IrOp::IntervalIntersect {
            base: compile_input(graph, node.primary_input.as_ref()?)?,
            intervals: node
                .secondary_inputs
                .iter()
                .map(|input| structured_query(graph, input))
                .collect::<Option<Vec<_>>>()?,
            partition_columns: s.partition_columns.clone(),
        },
        NodeState::CreateSlices(s) => IrOp::CreateSlices {
            starts: compile_input(graph, node.secondary_inputs.first()?)?,
            ends: compile_input(graph, node.secondary_inputs.get(1)?)?,
            starts_boundary: s.starts.clone(),
            ends_boundary: s.ends.clone(),
        },
        NodeState::FilterDuring(s) => return lower_filter_during(graph, node, s),
    };
    Some(StructuredQuery::new(id.as_str(), op))
}

fn lower_raw_query(
    graph: &QueryGraph,
    node: &QueryNode,
    state: &RawQueryState,
) -> Option<IrOp> {
    let mut dependencies = Vec::new();
    // An optional primary chain compiles as a dependency addressed by the
    // input's own id.
    if let Some(input) = &node.primary_input {
        dependencies.push(SqlDependency {
            alias: input.to_string(),
            query: structured_query(graph, input)?,
        });
    }
    for (index, input) in node.secondary_inputs.iter().enumerate() {
        let alias = state
            .dependency_aliases
            .get(index)
            .cloned()
            .unwrap_or_else(|| input.to_string());
        dependencies.push(SqlDependency {
            alias,
            query: structured_query(graph, input)?,
        });
    }
    Some(IrOp::RawSql {
        sql: state.sql.clone(),
        column_names: state.executed_columns.clone(),
        dependencies,
    })
}

fn lower_simple_slices(id: &NodeId, state: &SimpleSlicesState) -> StructuredQuery {
    let globs = [
        ("slice_name", &state.slice_name_glob),
        ("thread_name", &state.thread_name_glob),
        ("process_name", &state.process_name_glob),
        ("track_name", &state.track_name_glob),
    ];
    let predicates: Vec<FilterSpec> = globs
        .into_iter()
        .filter_map(|(column, glob)| {
            glob.as_ref().map(|pattern| FilterSpec {
                column: column.to_string(),
                op: FilterOp::Glob,
                rhs: vec![FilterValue::String(pattern.clone())],
            })
        })
        .collect();

    // The stdlib view exposes the slice name as `name`; the node's schema
    // (and the glob filters) use `slice_name`, so the projection renames it.
    let scan = StructuredQuery::new(
        stage_id(id, "scan"),
        IrOp::TableScan {
            table_name: "thread_or_process_slice".to_string(),
            module: Some("slices.with_context".to_string()),
        },
    );
    let cols_id = if predicates.is_empty() {
        id.to_string()
    } else {
        stage_id(id, "cols")
    };
    let cols = StructuredQuery::new(
        cols_id,
        IrOp::SelectColumns {
            input: Box::new(scan),
            columns: vec![
                SelectColumn::name("id"),
                SelectColumn::name("ts"),
                SelectColumn::name("dur"),
                SelectColumn::aliased("name", "slice_name"),
                SelectColumn::name("thread_name"),
                SelectColumn::name("process_name"),
                SelectColumn::name("track_name"),
            ],
        },
    );
    if predicates.is_empty() {
        return cols;
    }
    StructuredQuery::new(
        id.as_str(),
        IrOp::Filter {
            input: Box::new(cols),
            predicates,
        },
    )
}

fn lower_time_range(state: &TimeRangeState) -> IrOp {
    match (state.ts, state.dur) {
        (Some(ts), Some(dur)) => IrOp::RawSql {
            sql: format!("SELECT 0 AS id, {} AS ts, {} AS dur", ts, dur),
            column_names: vec!["id".to_string(), "ts".to_string(), "dur".to_string()],
            dependencies: Vec::new(),
        },
        // A dynamic range with no resolved span falls back to the full trace.
        _ => IrOp::RawSql {
            sql: "SELECT 0 AS id, start_ts AS ts, end_ts - start_ts AS dur FROM trace_bounds"
                .to_string(),
            column_names: vec!["id".to_string(), "ts".to_string(), "dur".to_string()],
            dependencies: Vec::new(),
        },
    }
}

fn lower_add_columns(
    graph: &QueryGraph,
    node: &QueryNode,
    state: &AddColumnsState,
) -> Option<IrOp> {
    let primary = compile_input(graph, node.primary_input.as_ref()?)?;
    let Some(source_id) = node.secondary_inputs.first() else {
        // No join source connected: a plain passthrough projection.
        return Some(IrOp::SelectColumns {
            columns: node
                .final_cols
                .iter()
                .map(|c| SelectColumn::name(c.display_name()))
                .collect(),
            input: primary,
        });
    };
    let join = StructuredQuery::new(
        stage_id(&node.id, "join"),
        IrOp::Join {
            left: primary,
            right: compile_input(graph, source_id)?,
            join_type: JoinType::Left,
            condition: crate::ir::JoinCondition::Equality {
                left_column: state.left_column.clone(),
                right_column: state.right_column.clone(),
            },
        },
    );
    let mut columns: Vec<SelectColumn> = node
        .final_cols
        .iter()
        .take(node.final_cols.len() - state.extra_columns.iter().filter(|c| c.checked).count())
        .map(|c| SelectColumn::aliased(format!("lhs.{}", c.display_name()), c.display_name()))
        .collect();
    for extra in state.extra_columns.iter().filter(|c| c.checked) {
        columns.push(SelectColumn::aliased(
            format!("rhs.{}", extra.source.name),
            extra.display_name(),
        ));
    }
    Some(IrOp::SelectColumns {
        input: Box::new(join),
        columns,
    })
}

fn lower_join(graph: &QueryGraph, node: &QueryNode, state: &JoinState) -> Option<IrOp> {
    let left = compile_input(graph, node.secondary_inputs.first()?)?;
    let right = compile_input(graph, node.secondary_inputs.get(1)?)?;
    let join = StructuredQuery::new(
        stage_id(&node.id, "join"),
        IrOp::Join {
            left,
            right,
            join_type: state.join_type,
            condition: state.condition.clone()?,
        },
    );
    // Always an explicit projection of the deduplicated columns, qualified by
    // side so aliased duplicates stay unambiguous. Freeform conditions name
    // their own table aliases; equality joins use lhs/rhs.
    let (left_name, right_name) = match state.condition.as_ref()? {
        crate::ir::JoinCondition::Freeform {
            left_alias,
            right_alias,
            ..
        } => (left_alias.clone(), right_alias.clone()),
        crate::ir::JoinCondition::Equality { .. } => ("lhs".to_string(), "rhs".to_string()),
    };
    let columns = state
        .deduplicated_sided()
        .into_iter()
        .map(|(side, col)| {
            let qualifier = match side {
                JoinSide::Left => left_name.as_str(),
                JoinSide::Right => right_name.as_str(),
            };
            SelectColumn::aliased(
                format!("{}.{}", qualifier, col.source.name),
                col.display_name(),
            )
        })
        .collect();
    Some(IrOp::SelectColumns {
        input: Box::new(join),
        columns,
    })
}

fn lower_union(graph: &QueryGraph, node: &QueryNode, state: &UnionState) -> Option<IrOp> {
    let projection: Vec<SelectColumn> = state
        .columns
        .iter()
        .filter(|c| c.checked)
        .map(|c| SelectColumn {
            expr: c.source.name.clone(),
            alias: c.alias.clone(),
        })
        .collect();
    let mut inputs = Vec::with_capacity(node.secondary_inputs.len());
    for (index, input) in node.secondary_inputs.iter().enumerate() {
        // Each member is projected to the common column set so the engine
        // sees identical schemas on every branch.
        inputs.push(StructuredQuery::new(
            stage_id(&node.id, &format!("in{}", index)),
            IrOp::SelectColumns {
                input: compile_input(graph, input)?,
                columns: projection.clone(),
            },
        ));
    }
    Some(IrOp::Union {
        inputs,
        use_union_all: state.use_union_all,
    })
}

/// The five-stage interval-filter pipeline: union the interval inputs,
/// project them to `id, ts, dur`, intersect with the primary, remap the
/// suffixed base columns back to their plain names, and restore the primary's
/// column order.
fn lower_filter_during(
    graph: &QueryGraph,
    node: &QueryNode,
    state: &FilterDuringState,
) -> Option<StructuredQuery> {
    let id = &node.id;
    let interval_cols = ["id", "ts", "dur"];

    // (a) union-all the interval inputs when there is more than one.
    let mut intervals = if node.secondary_inputs.len() == 1 {
        structured_query(graph, &node.secondary_inputs[0])?
    } else {
        let members = node
            .secondary_inputs
            .iter()
            .map(|input| structured_query(graph, input))
            .collect::<Option<Vec<_>>>()?;
        StructuredQuery::new(
            stage_id(id, "intervals_union"),
            IrOp::Union {
                inputs: members,
                use_union_all: true,
            },
        )
    };
    // (b) project the intervals down to the columns the intersection needs.
    intervals = StructuredQuery::new(
        stage_id(id, "intervals_cols"),
        IrOp::SelectColumns {
            input: Box::new(intervals),
            columns: interval_cols.iter().map(|c| SelectColumn::name(*c)).collect(),
        },
    );
    if state.drop_negative_intervals {
        intervals = StructuredQuery::new(
            stage_id(id, "intervals_pos"),
            IrOp::Filter {
                input: Box::new(intervals),
                predicates: vec![non_negative_dur()],
            },
        );
    }

    let mut base = compile_input(graph, node.primary_input.as_ref()?)?;
    if state.drop_negative_primary {
        base = Box::new(StructuredQuery::new(
            stage_id(id, "base_pos"),
            IrOp::Filter {
                input: base,
                predicates: vec![non_negative_dur()],
            },
        ));
    }

    // (c) the intersection itself.
    let intersect = StructuredQuery::new(
        stage_id(id, "isect"),
        IrOp::IntervalIntersect {
            base,
            intervals: vec![intervals],
            partition_columns: state.effective_partition_columns().to_vec(),
        },
    );

    // (d) remap the base side's suffixed id back onto its plain name; the
    // overlap ts/dur replace the primary's.
    let remap_columns: Vec<SelectColumn> = node
        .final_cols
        .iter()
        .map(|c| {
            let name = c.display_name();
            if name == "id" {
                SelectColumn::aliased("id_0", "id")
            } else {
                SelectColumn::name(name)
            }
        })
        .collect();
    let remap = StructuredQuery::new(
        stage_id(id, "remap"),
        IrOp::SelectColumns {
            input: Box::new(intersect),
            columns: remap_columns,
        },
    );

    // (e) the final, order-fixing projection. final_cols already has ts/dur
    // first in clip mode.
    let ordered = IrOp::SelectColumns {
        input: Box::new(remap),
        columns: node
            .final_cols
            .iter()
            .map(|c| SelectColumn::name(c.display_name()))
            .collect(),
    };
    if state.clip_to_intervals {
        let inner = StructuredQuery::new(stage_id(id, "cols"), ordered);
        return Some(StructuredQuery::new(
            id.as_str(),
            IrOp::FilterToIntervals {
                input: Box::new(inner),
            },
        ));
    }
    Some(StructuredQuery::new(id.as_str(), ordered))
}

fn non_negative_dur() -> FilterSpec {
    FilterSpec {
        column: "dur".to_string(),
        op: FilterOp::Ge,
        rhs: vec![FilterValue::Int(0)],
    }
}
