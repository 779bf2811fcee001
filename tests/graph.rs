//! Integration tests for graph structure editing.
mod common;

use common::*;
use traceflow::columns::SemanticType;
use traceflow::prelude::*;

#[test]
fn test_transitive_cycles_are_rejected() {
    let mut g = QueryGraph::new();
    let src = g.add_node(int_table("t", &["a"]));
    let f1 = g.add_node(NodeState::Filter(Default::default()));
    let f2 = g.add_node(NodeState::Filter(Default::default()));
    let f3 = g.add_node(NodeState::Filter(Default::default()));
    g.connect_primary(&src, &f1).unwrap();
    g.connect_primary(&f1, &f2).unwrap();
    g.connect_primary(&f2, &f3).unwrap();

    // Three hops back up the chain.
    assert!(matches!(
        g.connect_primary(&f3, &f1),
        Err(GraphError::CycleDetected { .. })
    ));
    // Direct self-loop.
    assert!(matches!(
        g.connect_primary(&f1, &f1),
        Err(GraphError::CycleDetected { .. })
    ));
    // The failed attempts left the topology untouched.
    assert_eq!(g.node(&f1).unwrap().primary_input, Some(src.clone()));
    assert!(g.node(&f1).unwrap().is_valid());
}

#[test]
fn test_roots_are_the_nodes_without_inputs() {
    let mut g = QueryGraph::new();
    let a = g.add_node(int_table("a", &["x"]));
    let b = g.add_node(int_table("b", &["x"]));
    let f = g.add_node(NodeState::Filter(Default::default()));
    g.connect_primary(&a, &f).unwrap();

    assert_eq!(g.root_nodes(), vec![a.clone(), b.clone()]);
}

#[test]
fn test_disconnecting_restores_the_no_input_issue() {
    let mut g = QueryGraph::new();
    let src = g.add_node(int_table("t", &["a"]));
    let f = g.add_node(NodeState::Filter(Default::default()));
    g.connect_primary(&src, &f).unwrap();
    assert!(g.node(&f).unwrap().is_valid());

    g.disconnect_primary(&f).unwrap();
    assert_eq!(g.node(&f).unwrap().issue, Some(NodeIssue::NoInput));
    assert!(g.node(&src).unwrap().next_nodes.is_empty());
}

#[test]
fn test_join_with_one_side_reports_too_few_sources() {
    let mut g = QueryGraph::new();
    let src = g.add_node(int_table("t", &["id"]));
    let join = g.add_node(NodeState::Join(Default::default()));
    g.connect_secondary(&src, &join).unwrap();

    assert_eq!(
        g.node(&join).unwrap().issue,
        Some(NodeIssue::TooFewSources {
            required: 2,
            connected: 1
        })
    );
}

#[test]
fn test_multi_input_kinds_report_too_few_sources_even_with_nothing_connected() {
    let mut g = QueryGraph::new();
    let union = g.add_node(NodeState::Union(Default::default()));
    let join = g.add_node(NodeState::Join(Default::default()));

    for id in [&union, &join] {
        assert_eq!(
            g.node(id).unwrap().issue,
            Some(NodeIssue::TooFewSources {
                required: 2,
                connected: 0
            })
        );
    }
}

#[test]
fn test_selection_clears_when_the_node_is_removed() {
    let mut g = QueryGraph::new();
    let a = g.add_node(int_table("a", &["x"]));
    g.select(&a).unwrap();
    assert_eq!(g.selected(), Some(&a));

    g.remove_node(&a).unwrap();
    assert_eq!(g.selected(), None);
    assert!(g.is_empty());
}

#[test]
fn test_duplicate_is_independent_of_the_original() {
    let mut g = QueryGraph::new();
    let src = g.add_node(int_table("t", &["a", "b"]));
    let modify = g.add_node(NodeState::ModifyColumns(Default::default()));
    g.connect_primary(&src, &modify).unwrap();

    let copy = g.duplicate_node(&modify).unwrap();
    // Editing the copy leaves the original untouched.
    g.update_state(&copy, |state| {
        if let NodeState::ModifyColumns(s) = state {
            s.columns[0].checked = false;
        }
    })
    .unwrap();

    assert_eq!(col_names(&g, &modify), vec!["a", "b"]);
    assert_eq!(visible_names(&g, &copy), vec!["b"]);
}

#[test]
fn test_node_details_never_fail() {
    let mut g = QueryGraph::new();
    let src = g.add_node(table_node("slice", &[("name", SemanticType::String)]));
    let orphan = g.add_node(NodeState::Filter(Default::default()));

    assert!(!g.node(&src).unwrap().details().is_empty());
    assert!(!g.node(&orphan).unwrap().details().is_empty());
    assert!(g.node(&orphan).unwrap().details().contains("no input"));
}
