//! Integration tests for schema propagation across the graph.
mod common;

use common::*;
use traceflow::columns::SemanticType;
use traceflow::graph::propagation::propagate_all;
use traceflow::node::{AggregationState, ModifyColumnsState};
use traceflow::prelude::*;

fn chain(graph: &mut QueryGraph, from: &NodeId, state: NodeState) -> NodeId {
    let id = graph.add_node(state);
    graph.connect_primary(from, &id).unwrap();
    id
}

#[test]
fn test_propagation_is_idempotent() {
    let mut g = QueryGraph::new();
    let src = g.add_node(int_table("t", &["a", "b", "c"]));
    let modify = chain(&mut g, &src, NodeState::ModifyColumns(Default::default()));
    let agg = chain(&mut g, &modify, NodeState::Aggregation(Default::default()));

    propagate_all(&mut g).unwrap();
    let snapshot: Vec<_> = [&src, &modify, &agg]
        .iter()
        .map(|id| g.node(id).unwrap().final_cols.clone())
        .collect();

    propagate_all(&mut g).unwrap();
    propagate_all(&mut g).unwrap();
    let after: Vec<_> = [&src, &modify, &agg]
        .iter()
        .map(|id| g.node(id).unwrap().final_cols.clone())
        .collect();
    assert_eq!(snapshot, after);
}

#[test]
fn test_rename_propagates_without_carrying_checked_state() {
    let mut g = QueryGraph::new();
    let src = g.add_node(int_table("t", &["id", "name", "value"]));
    let modify = chain(&mut g, &src, NodeState::ModifyColumns(Default::default()));
    let agg = chain(&mut g, &modify, NodeState::Aggregation(Default::default()));

    // Check the `name` group-by entry on the aggregation.
    g.update_state(&agg, |state| {
        if let NodeState::Aggregation(AggregationState {
            group_by_columns, ..
        }) = state
        {
            for col in group_by_columns.iter_mut() {
                if col.source.name == "name" {
                    col.checked = true;
                }
            }
        }
    })
    .unwrap();

    // Rename `name` to `user_name` upstream.
    g.update_state(&modify, |state| {
        if let NodeState::ModifyColumns(ModifyColumnsState { columns }) = state {
            for col in columns.iter_mut() {
                if col.source.name == "name" {
                    col.alias = Some("user_name".to_string());
                }
            }
        }
    })
    .unwrap();

    let node = g.node(&agg).unwrap();
    let group_by = match &node.state {
        NodeState::Aggregation(s) => &s.group_by_columns,
        _ => unreachable!(),
    };
    let names: Vec<&str> = group_by.iter().map(|c| c.source.name.as_str()).collect();
    assert_eq!(names, vec!["id", "user_name", "value"]);
    // Distinct names carry independent checked state: the renamed column
    // arrives unchecked.
    let renamed = group_by.iter().find(|c| c.source.name == "user_name").unwrap();
    assert!(!renamed.checked);
}

#[test]
fn test_unchecking_a_column_removes_it_across_four_hops() {
    let mut g = QueryGraph::new();
    let src = g.add_node(int_table("t", &["a", "b", "c"]));
    let first = chain(&mut g, &src, NodeState::ModifyColumns(Default::default()));
    let mut tail = first.clone();
    let mut hops = Vec::new();
    for _ in 0..4 {
        tail = chain(&mut g, &tail, NodeState::ModifyColumns(Default::default()));
        hops.push(tail.clone());
    }

    g.update_state(&first, |state| {
        if let NodeState::ModifyColumns(ModifyColumnsState { columns }) = state {
            for col in columns.iter_mut() {
                if col.source.name == "b" {
                    col.checked = false;
                }
            }
        }
    })
    .unwrap();

    for hop in &hops {
        let names = col_names(&g, hop);
        assert!(!names.contains(&"b".to_string()), "b leaked into {:?}", names);
        assert_eq!(names, vec!["a", "c"]);
    }
}

#[test]
fn test_union_final_cols_are_the_intersection_in_first_input_order() {
    let mut g = QueryGraph::new();
    let left = g.add_node(int_table("l", &["a", "b", "c"]));
    let right = g.add_node(int_table("r", &["a", "c", "d"]));
    let union = g.add_node(NodeState::Union(Default::default()));
    g.connect_secondary(&left, &union).unwrap();
    g.connect_secondary(&right, &union).unwrap();

    assert!(g.node(&union).unwrap().is_valid());
    assert_eq!(col_names(&g, &union), vec!["a", "c"]);
}

#[test]
fn test_join_dedup_emits_key_once_and_drops_shared_names() {
    let mut g = QueryGraph::new();
    let left = g.add_node(int_table("l", &["id", "name", "value"]));
    let right = g.add_node(int_table("r", &["id", "name", "extra"]));
    let join = g.add_node(NodeState::Join(Default::default()));
    g.connect_secondary(&left, &join).unwrap();
    g.connect_secondary(&right, &join).unwrap();
    g.update_state(&join, |state| {
        if let NodeState::Join(s) = state {
            s.condition = Some(traceflow::ir::JoinCondition::Equality {
                left_column: "id".to_string(),
                right_column: "id".to_string(),
            });
        }
    })
    .unwrap();

    assert!(g.node(&join).unwrap().is_valid());
    assert_eq!(col_names(&g, &join), vec!["id", "value", "extra"]);
}

#[test]
fn test_upstream_issue_propagates_with_its_cause() {
    let mut g = QueryGraph::new();
    // An unnamed table never validates.
    let bad = g.add_node(table_node("", &[("a", SemanticType::Int)]));
    let filter = chain(&mut g, &bad, NodeState::Filter(Default::default()));

    match &g.node(&filter).unwrap().issue {
        Some(NodeIssue::UpstreamInvalid { cause }) => {
            assert!(cause.contains("empty"), "unexpected cause: {}", cause)
        }
        other => panic!("expected UpstreamInvalid, got {:?}", other),
    }
}
