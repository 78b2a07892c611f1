//! Topology builder — compiles persisted nodes/edges into the executable
//! DAG for a given trigger.
//!
//! Rules:
//! 1. Only edges labelled `""`, `loop_body`, or `loop_return` participate.
//! 2. When a trigger node is given, the graph is restricted to nodes
//!    reachable from it (following direct edges and conditional-mapping
//!    targets).
//! 3. Trigger nodes and sub-component nodes are excluded from the
//!    executable set.
//! 4. An empty executable set fails fast.

use std::collections::{HashMap, HashSet, VecDeque};

use components::registry::{is_sub_component, is_trigger};
use db::models::{WorkflowEdgeRow, WorkflowNodeRow, WorkflowRow};
use serde_json::Value;
use tracing::info;

use crate::EngineError;

/// Edge labels that shape the execution DAG.
const DAG_EDGE_LABELS: [&str; 3] = ["", "loop_body", "loop_return"];

/// One executable node in the compiled topology.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub node_id: String,
    pub component_type: String,
    pub db_id: i64,
    pub component_config_id: i64,
    pub is_entry_point: bool,
    pub interrupt_before: bool,
    pub interrupt_after: bool,
}

/// One edge between executable nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeInfo {
    pub source_node_id: String,
    pub target_node_id: String,
    pub edge_type: String,
    pub edge_label: String,
    pub condition_mapping: Option<Value>,
    pub condition_value: String,
    pub priority: i32,
}

/// The compiled, reachable execution DAG for a (workflow, trigger) pair.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub workflow_slug: String,
    pub nodes: HashMap<String, NodeInfo>,
    pub edges: Vec<EdgeInfo>,
    pub entry_node_ids: Vec<String>,
    pub edges_by_source: HashMap<String, Vec<EdgeInfo>>,
    /// Predecessor count per node, excluding `loop_return` edges.
    pub incoming_count: HashMap<String, usize>,
    /// loop node id → first body-target node ids.
    pub loop_bodies: HashMap<String, Vec<String>>,
    /// loop node id → sources of its `loop_return` edges.
    pub loop_return_nodes: HashMap<String, Vec<String>>,
    /// loop node id → BFS closure of body nodes, bounded at the loop.
    pub loop_body_all_nodes: HashMap<String, Vec<String>>,
}

impl Topology {
    /// The loop (if any) whose body contains `node_id`.
    pub fn loop_containing(&self, node_id: &str) -> Option<&str> {
        self.loop_body_all_nodes
            .iter()
            .find(|(_, body)| body.iter().any(|n| n == node_id))
            .map(|(loop_id, _)| loop_id.as_str())
    }

    /// Loops for which `node_id` is a `loop_return` source.
    pub fn loops_returned_by(&self, node_id: &str) -> Vec<&str> {
        self.loop_return_nodes
            .iter()
            .filter(|(_, sources)| sources.iter().any(|s| s == node_id))
            .map(|(loop_id, _)| loop_id.as_str())
            .collect()
    }
}

/// Build a [`Topology`] from persisted rows. `trigger_node_id` (a node
/// database id) restricts the graph to what that trigger reaches.
pub fn build_topology(
    workflow: &WorkflowRow,
    all_nodes: &[WorkflowNodeRow],
    all_edges: &[WorkflowEdgeRow],
    trigger_node_id: Option<i64>,
) -> Result<Topology, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Keep only DAG-shaping edge labels, in (priority, id) order.
    // -----------------------------------------------------------------------
    let mut dag_edges: Vec<&WorkflowEdgeRow> = all_edges
        .iter()
        .filter(|e| DAG_EDGE_LABELS.contains(&e.edge_label.as_str()))
        .collect();
    dag_edges.sort_by_key(|e| (e.priority, e.id));

    // -----------------------------------------------------------------------
    // 2. Restrict to the trigger's reachable set, if a trigger fired.
    // -----------------------------------------------------------------------
    let mut nodes: Vec<&WorkflowNodeRow> = all_nodes.iter().collect();
    if let Some(trigger_db_id) = trigger_node_id {
        if let Some(trigger_node) = all_nodes.iter().find(|n| n.id == trigger_db_id) {
            let reachable = reachable_node_ids(&trigger_node.node_id, &dag_edges);
            nodes.retain(|n| reachable.contains(&n.node_id));
            dag_edges.retain(|e| {
                reachable.contains(&e.source_node_id) && reachable.contains(&e.target_node_id)
            });
        }
    }

    // -----------------------------------------------------------------------
    // 3. Partition into skip set and executable set.
    // -----------------------------------------------------------------------
    let trigger_ids: HashSet<&str> = nodes
        .iter()
        .filter(|n| is_trigger(&n.component_type))
        .map(|n| n.node_id.as_str())
        .collect();
    let skip: HashSet<&str> = nodes
        .iter()
        .filter(|n| is_trigger(&n.component_type) || is_sub_component(&n.component_type))
        .map(|n| n.node_id.as_str())
        .collect();
    let exec_nodes: Vec<&&WorkflowNodeRow> = nodes
        .iter()
        .filter(|n| !skip.contains(n.node_id.as_str()))
        .collect();

    if exec_nodes.is_empty() {
        return Err(EngineError::Validation(format!(
            "workflow '{}' has no executable nodes",
            workflow.slug
        )));
    }

    let mut node_infos: HashMap<String, NodeInfo> = HashMap::new();
    for n in &exec_nodes {
        node_infos.insert(
            n.node_id.clone(),
            NodeInfo {
                node_id: n.node_id.clone(),
                component_type: n.component_type.clone(),
                db_id: n.id,
                component_config_id: n.component_config_id,
                is_entry_point: n.is_entry_point,
                interrupt_before: n.interrupt_before,
                interrupt_after: n.interrupt_after,
            },
        );
    }

    // -----------------------------------------------------------------------
    // 4. Edges between executable nodes; incoming counts excluding
    //    loop_return.
    // -----------------------------------------------------------------------
    let mut edges: Vec<EdgeInfo> = Vec::new();
    let mut edges_by_source: HashMap<String, Vec<EdgeInfo>> = HashMap::new();
    let mut incoming_count: HashMap<String, usize> =
        node_infos.keys().map(|k| (k.clone(), 0)).collect();

    for e in dag_edges.iter().filter(|e| {
        !skip.contains(e.source_node_id.as_str()) && !skip.contains(e.target_node_id.as_str())
    }) {
        let info = EdgeInfo {
            source_node_id: e.source_node_id.clone(),
            target_node_id: e.target_node_id.clone(),
            edge_type: e.edge_type.clone(),
            edge_label: e.edge_label.clone(),
            condition_mapping: e.condition_mapping.clone(),
            condition_value: e.condition_value.clone(),
            priority: e.priority,
        };
        edges.push(info.clone());
        edges_by_source
            .entry(e.source_node_id.clone())
            .or_default()
            .push(info);
        if e.edge_label != "loop_return" {
            if let Some(count) = incoming_count.get_mut(&e.target_node_id) {
                *count += 1;
            }
        }
    }

    // -----------------------------------------------------------------------
    // 5. Entry selection: explicit flags win; else every trigger target;
    //    else the lowest-id executable node.
    // -----------------------------------------------------------------------
    let mut entry_node_ids: Vec<String> = exec_nodes
        .iter()
        .filter(|n| n.is_entry_point)
        .map(|n| n.node_id.clone())
        .collect();
    if entry_node_ids.is_empty() {
        let trigger_targets: HashSet<&str> = dag_edges
            .iter()
            .filter(|e| {
                trigger_ids.contains(e.source_node_id.as_str())
                    && !skip.contains(e.target_node_id.as_str())
            })
            .map(|e| e.target_node_id.as_str())
            .collect();
        entry_node_ids = exec_nodes
            .iter()
            .filter(|n| trigger_targets.contains(n.node_id.as_str()))
            .map(|n| n.node_id.clone())
            .collect();
    }
    if entry_node_ids.is_empty() {
        entry_node_ids = vec![exec_nodes[0].node_id.clone()];
    }

    // -----------------------------------------------------------------------
    // 6. Loop structures.
    // -----------------------------------------------------------------------
    let mut loop_bodies: HashMap<String, Vec<String>> = HashMap::new();
    let mut loop_return_nodes: HashMap<String, Vec<String>> = HashMap::new();
    for (node_id, info) in &node_infos {
        if info.component_type != "loop" {
            continue;
        }
        let body_targets: Vec<String> = edges_by_source
            .get(node_id)
            .map(|outgoing| {
                outgoing
                    .iter()
                    .filter(|e| e.edge_label == "loop_body")
                    .map(|e| e.target_node_id.clone())
                    .collect()
            })
            .unwrap_or_default();
        if !body_targets.is_empty() {
            loop_bodies.insert(node_id.clone(), body_targets);
        }

        let return_sources: Vec<String> = edges
            .iter()
            .filter(|e| e.target_node_id == *node_id && e.edge_label == "loop_return")
            .map(|e| e.source_node_id.clone())
            .collect();
        if !return_sources.is_empty() {
            loop_return_nodes.insert(node_id.clone(), return_sources);
        }
    }

    // BFS closure over direct edges, bounded at the loop node itself.
    let mut loop_body_all_nodes: HashMap<String, Vec<String>> = HashMap::new();
    for (loop_id, body_targets) in &loop_bodies {
        let mut all_body: HashSet<String> = body_targets.iter().cloned().collect();
        let mut queue: VecDeque<String> = body_targets.iter().cloned().collect();
        while let Some(current) = queue.pop_front() {
            for e in edges_by_source.get(&current).into_iter().flatten() {
                if e.edge_label.is_empty()
                    && e.target_node_id != *loop_id
                    && !all_body.contains(&e.target_node_id)
                {
                    all_body.insert(e.target_node_id.clone());
                    queue.push_back(e.target_node_id.clone());
                }
            }
        }
        loop_body_all_nodes.insert(loop_id.clone(), all_body.into_iter().collect());
    }

    let topology = Topology {
        workflow_slug: workflow.slug.clone(),
        nodes: node_infos,
        edges,
        entry_node_ids,
        edges_by_source,
        incoming_count,
        loop_bodies,
        loop_return_nodes,
        loop_body_all_nodes,
    };

    info!(
        workflow = %workflow.slug,
        nodes = topology.nodes.len(),
        edges = topology.edges.len(),
        entries = ?topology.entry_node_ids,
        loops = ?topology.loop_bodies.keys().collect::<Vec<_>>(),
        "built topology"
    );
    Ok(topology)
}

/// BFS from `start_node_id` following direct edges and conditional-mapping
/// targets.
fn reachable_node_ids(start_node_id: &str, all_edges: &[&WorkflowEdgeRow]) -> HashSet<String> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for e in all_edges {
        if !e.target_node_id.is_empty() {
            adjacency
                .entry(e.source_node_id.as_str())
                .or_default()
                .push(e.target_node_id.as_str());
        }
        if e.edge_type == "conditional" {
            if let Some(mapping) = e.condition_mapping.as_ref().and_then(Value::as_object) {
                for target in mapping.values().filter_map(Value::as_str) {
                    if !target.is_empty() && target != "__end__" {
                        adjacency
                            .entry(e.source_node_id.as_str())
                            .or_default()
                            .push(target);
                    }
                }
            }
        }
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([start_node_id]);
    while let Some(node_id) = queue.pop_front() {
        if !visited.insert(node_id.to_string()) {
            continue;
        }
        for neighbour in adjacency.get(node_id).into_iter().flatten() {
            if !visited.contains(*neighbour) {
                queue.push_back(neighbour);
            }
        }
    }
    visited
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{edge_row, labelled_edge_row, node_row, workflow_row};

    #[test]
    fn linear_graph_has_single_entry_and_counts() {
        let workflow = workflow_row(1, "linear");
        let nodes = vec![
            node_row(1, 1, "a", "code", true),
            node_row(2, 1, "b", "code", false),
            node_row(3, 1, "c", "code", false),
        ];
        let edges = vec![edge_row(1, 1, "a", "b"), edge_row(2, 1, "b", "c")];

        let topo = build_topology(&workflow, &nodes, &edges, None).unwrap();
        assert_eq!(topo.entry_node_ids, vec!["a"]);
        assert_eq!(topo.nodes.len(), 3);
        assert_eq!(topo.incoming_count["a"], 0);
        assert_eq!(topo.incoming_count["b"], 1);
        assert_eq!(topo.incoming_count["c"], 1);
        // Invariant: sum(incoming) == |edges excluding loop_return|
        let total: usize = topo.incoming_count.values().sum();
        assert_eq!(total, topo.edges.len());
    }

    #[test]
    fn triggers_and_sub_components_are_excluded() {
        let workflow = workflow_row(1, "with-trigger");
        let nodes = vec![
            node_row(1, 1, "trig", "trigger_telegram", false),
            node_row(2, 1, "model", "ai_model", false),
            node_row(3, 1, "agent", "agent", false),
        ];
        let edges = vec![
            edge_row(1, 1, "trig", "agent"),
            labelled_edge_row(2, 1, "agent", "model", "llm"),
        ];

        let topo = build_topology(&workflow, &nodes, &edges, None).unwrap();
        assert_eq!(topo.nodes.len(), 1);
        assert!(topo.nodes.contains_key("agent"));
        // Trigger target becomes the entry.
        assert_eq!(topo.entry_node_ids, vec!["agent"]);
        // The llm-labelled edge never enters the DAG.
        assert!(topo.edges.is_empty());
    }

    #[test]
    fn only_trigger_nodes_is_a_validation_error() {
        let workflow = workflow_row(1, "empty");
        let nodes = vec![node_row(1, 1, "trig", "trigger_webhook", false)];
        let err = build_topology(&workflow, &nodes, &[], None).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn trigger_scoping_restricts_reachability() {
        let workflow = workflow_row(1, "two-trees");
        let nodes = vec![
            node_row(1, 1, "t1", "trigger_webhook", false),
            node_row(2, 1, "a", "code", false),
            node_row(3, 1, "t2", "trigger_manual", false),
            node_row(4, 1, "b", "code", false),
        ];
        let edges = vec![edge_row(1, 1, "t1", "a"), edge_row(2, 1, "t2", "b")];

        // Fire trigger t1 (db id 1): only `a` is reachable.
        let topo = build_topology(&workflow, &nodes, &edges, Some(1)).unwrap();
        assert_eq!(topo.nodes.len(), 1);
        assert!(topo.nodes.contains_key("a"));
        assert_eq!(topo.entry_node_ids, vec!["a"]);
    }

    #[test]
    fn conditional_mapping_targets_count_as_reachable() {
        let workflow = workflow_row(1, "cond");
        let nodes = vec![
            node_row(1, 1, "trig", "trigger_manual", false),
            node_row(2, 1, "switch", "switch", false),
            node_row(3, 1, "x", "code", false),
            node_row(4, 1, "y", "code", false),
        ];
        let mut cond = edge_row(1, 1, "switch", "x");
        cond.edge_type = "conditional".into();
        cond.condition_mapping = Some(serde_json::json!({"left": "x", "right": "y"}));
        let edges = vec![edge_row(2, 1, "trig", "switch"), cond];

        let topo = build_topology(&workflow, &nodes, &edges, Some(1)).unwrap();
        assert!(topo.nodes.contains_key("y"), "mapping target must be kept");
    }

    #[test]
    fn multiple_entry_points_from_flags() {
        let workflow = workflow_row(1, "fan");
        let nodes = vec![
            node_row(1, 1, "a", "code", true),
            node_row(2, 1, "b", "code", true),
            node_row(3, 1, "join", "merge", false),
        ];
        let edges = vec![edge_row(1, 1, "a", "join"), edge_row(2, 1, "b", "join")];

        let topo = build_topology(&workflow, &nodes, &edges, None).unwrap();
        let mut entries = topo.entry_node_ids.clone();
        entries.sort();
        assert_eq!(entries, vec!["a", "b"]);
        assert_eq!(topo.incoming_count["join"], 2);
        // Every entry has zero incoming edges.
        for entry in &topo.entry_node_ids {
            assert_eq!(topo.incoming_count[entry], 0);
        }
    }

    #[test]
    fn loop_structures_are_extracted() {
        let workflow = workflow_row(1, "loopy");
        let nodes = vec![
            node_row(1, 1, "src", "code", true),
            node_row(2, 1, "lp", "loop", false),
            node_row(3, 1, "body1", "code", false),
            node_row(4, 1, "body2", "code", false),
            node_row(5, 1, "after", "code", false),
        ];
        let edges = vec![
            edge_row(1, 1, "src", "lp"),
            labelled_edge_row(2, 1, "lp", "body1", "loop_body"),
            edge_row(3, 1, "body1", "body2"),
            labelled_edge_row(4, 1, "body2", "lp", "loop_return"),
            edge_row(5, 1, "lp", "after"),
        ];

        let topo = build_topology(&workflow, &nodes, &edges, None).unwrap();
        assert_eq!(topo.loop_bodies["lp"], vec!["body1"]);
        assert_eq!(topo.loop_return_nodes["lp"], vec!["body2"]);
        let mut body: Vec<&str> = topo.loop_body_all_nodes["lp"]
            .iter()
            .map(String::as_str)
            .collect();
        body.sort();
        assert_eq!(body, vec!["body1", "body2"]);
        // loop_return does not contribute to incoming_count.
        assert_eq!(topo.incoming_count["lp"], 1);
        assert_eq!(topo.loop_containing("body2"), Some("lp"));
        assert_eq!(topo.loops_returned_by("body2"), vec!["lp"]);
        // Body closure stops at the loop: `after` is outside.
        assert!(!topo.loop_body_all_nodes["lp"].contains(&"after".to_string()));
    }
}
