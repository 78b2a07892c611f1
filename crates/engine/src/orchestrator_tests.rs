//! Engine unit tests that run without a database.
//!
//! The orchestrator's persistence calls are isolated behind thin
//! repository functions, so the decision logic — routing, state merging,
//! component behaviour under mock LLMs — is exercised here directly.
//! End-to-end scenario tests that need a live Postgres (linear success,
//! confirmation resume, spawn fan-out, retry exhaustion, recurring fires)
//! live in `tests/it/` and are gated behind the `integration` feature.

use components::mock::MockComponent;
use components::state::{merge_state, StateDelta, WorkflowState};
use components::traits::{Component, ComponentContext};
use serde_json::json;

use crate::orchestrator::route_targets;
use crate::topology::EdgeInfo;

fn direct_edge(source: &str, target: &str) -> EdgeInfo {
    EdgeInfo {
        source_node_id: source.into(),
        target_node_id: target.into(),
        edge_type: "direct".into(),
        edge_label: String::new(),
        condition_mapping: None,
        condition_value: String::new(),
        priority: 0,
    }
}

fn conditional_edge(source: &str, target: &str, condition_value: &str) -> EdgeInfo {
    EdgeInfo {
        edge_type: "conditional".into(),
        condition_value: condition_value.into(),
        ..direct_edge(source, target)
    }
}

// ============================================================
// Routing
// ============================================================

#[test]
fn direct_edges_fan_out_to_distinct_targets() {
    let e1 = direct_edge("a", "b");
    let e2 = direct_edge("a", "c");
    let e3 = direct_edge("a", "b"); // duplicate
    let outgoing = vec![&e1, &e2, &e3];
    assert_eq!(route_targets(&outgoing, ""), vec!["b", "c"]);
}

#[test]
fn conditional_route_picks_matching_branch() {
    let chat = conditional_edge("switch", "chat_node", "chat");
    let search = conditional_edge("switch", "search_node", "search");
    let outgoing = vec![&chat, &search];

    assert_eq!(route_targets(&outgoing, "chat"), vec!["chat_node"]);
    assert_eq!(route_targets(&outgoing, "search"), vec!["search_node"]);
    // No match: branch terminates.
    assert!(route_targets(&outgoing, "other").is_empty());
}

#[test]
fn conditional_end_terminates() {
    let done = conditional_edge("switch", "__end__", "done");
    let outgoing = vec![&done];
    assert!(route_targets(&outgoing, "done").is_empty());
}

#[test]
fn legacy_condition_mapping_is_honoured() {
    let mut edge = conditional_edge("switch", "ignored", "");
    edge.condition_mapping = Some(json!({"left": "x", "right": "y", "stop": "__end__"}));
    let outgoing = vec![&edge];

    assert_eq!(route_targets(&outgoing, "left"), vec!["x"]);
    assert_eq!(route_targets(&outgoing, "right"), vec!["y"]);
    assert!(route_targets(&outgoing, "stop").is_empty());
    assert!(route_targets(&outgoing, "missing").is_empty());
}

#[test]
fn direct_end_edges_terminate() {
    let end = direct_edge("a", "__end__");
    let outgoing = vec![&end];
    assert!(route_targets(&outgoing, "").is_empty());
    assert!(route_targets(&[], "").is_empty());
}

#[test]
fn conditional_edges_take_precedence_over_direct() {
    let cond = conditional_edge("a", "x", "go");
    let direct = direct_edge("a", "y");
    let outgoing = vec![&cond, &direct];
    // With conditional present, the route decides — the direct edge is not
    // a fallback.
    assert_eq!(route_targets(&outgoing, "go"), vec!["x"]);
    assert!(route_targets(&outgoing, "nope").is_empty());
}

// ============================================================
// State flow through mock components
// ============================================================

/// Drive two mock components by hand the way the orchestrator does:
/// run, merge, pick the route, run the chosen branch.
#[tokio::test]
async fn delta_merge_then_route_flow() {
    let ctx = ComponentContext::for_tests_no_llm();
    let mut state = WorkflowState::initial("exec", json!({"text": "hi"}));

    // Node A produces an output and a route.
    let mut delta_a = StateDelta::with_node_output("a", json!({"output": 5}));
    delta_a.route = Some("big".into());
    let node_a = MockComponent::returning("a", delta_a);

    let delta = node_a.run(&state, &ctx).await.unwrap();
    merge_state(&mut state, &delta);
    assert_eq!(state.node_outputs["a"]["output"], 5);
    assert_eq!(state.route, "big");

    // Routing follows the merged route.
    let big = conditional_edge("a", "b_big", "big");
    let small = conditional_edge("a", "b_small", "small");
    let outgoing = vec![&big, &small];
    let targets = route_targets(&outgoing, &state.route);
    assert_eq!(targets, vec!["b_big"]);

    // Node B reads A's output through state.
    let node_b = MockComponent::returning(
        "b_big",
        StateDelta::with_node_output("b_big", json!({"output": 10})),
    );
    let delta = node_b.run(&state, &ctx).await.unwrap();
    merge_state(&mut state, &delta);
    assert_eq!(state.node_outputs["b_big"]["output"], 10);

    // B saw the state containing A's output.
    let seen = node_b.calls.lock().unwrap();
    assert_eq!(seen[0].node_outputs["a"]["output"], 5);
}

#[tokio::test]
async fn flaky_component_succeeds_after_failures() {
    let ctx = ComponentContext::for_tests_no_llm();
    let state = WorkflowState::initial("exec", json!({}));
    let node = MockComponent::flaky("x", 2, StateDelta::with_node_output("x", json!({"ok": true})));

    // The orchestrator re-runs a retryable failure with retry_count+1; the
    // component contract is simply fail-fail-succeed.
    assert!(node.run(&state, &ctx).await.unwrap_err().is_retryable());
    assert!(node.run(&state, &ctx).await.unwrap_err().is_retryable());
    let delta = node.run(&state, &ctx).await.unwrap();
    assert_eq!(delta.node_outputs["x"]["ok"], true);
    assert_eq!(node.call_count(), 3);
}

#[tokio::test]
async fn fatal_component_error_is_not_retryable() {
    let ctx = ComponentContext::for_tests_no_llm();
    let state = WorkflowState::initial("exec", json!({}));
    let node = MockComponent::failing_fatal("boom", "unrecoverable");
    let err = node.run(&state, &ctx).await.unwrap_err();
    assert!(!err.is_retryable());
}
