//! Dependency graphs.
//!
//! Two concerns live here:
//! - [`validate_dag`]: save-time validation (unique ids, known edge
//!   endpoints, acyclic), returning a topological order.
//! - [`DependencyGraph`]: the per-execution readiness tracker the coordinator
//!   mutates as completions arrive. It does no cycle detection of its own; a
//!   cycle simply never becomes ready and is reported as a stall.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use queue::{CompletionStatus, Payload};

use crate::models::{WorkflowDefinition, WorkflowEdge};
use crate::EngineError;

/// Validate the workflow's DAG and return nodes in topological execution order.
///
/// # Errors
/// - [`EngineError::DuplicateNodeId`] if two nodes share an ID.
/// - [`EngineError::UnknownNodeReference`] if an edge references a missing node.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic.
pub fn validate_dag(definition: &WorkflowDefinition) -> Result<Vec<String>, EngineError> {
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &definition.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
    }

    for edge in &definition.edges {
        if !seen_ids.contains(edge.source.as_str()) {
            return Err(EngineError::UnknownNodeReference {
                node_id: edge.source.clone(),
                side: "source",
            });
        }
        if !seen_ids.contains(edge.target.as_str()) {
            return Err(EngineError::UnknownNodeReference {
                node_id: edge.target.clone(),
                side: "target",
            });
        }
    }

    // Kahn's algorithm, seeded in declaration order so the result is stable.
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = definition
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), 0))
        .collect();

    for edge in &definition.edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
        *in_degree.entry(edge.target.as_str()).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = definition
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(definition.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());

        if let Some(neighbours) = adjacency.get(node_id) {
            for &neighbour in neighbours {
                let deg = in_degree.entry(neighbour).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    if sorted.len() != definition.nodes.len() {
        return Err(EngineError::CycleDetected);
    }

    Ok(sorted)
}

/// Whether `edge` carries data out of a node that finished with `status`
/// and `output`.
///
/// A failed node only feeds its `"error"` edges. A completed node feeds
/// default-handle edges unconditionally, and named-handle edges when
/// `output[handle]` (or, failing that, `output["output"]`) is present.
pub fn edge_carries(edge: &WorkflowEdge, status: CompletionStatus, output: &Payload) -> bool {
    let handle = edge.named_source_handle();
    match status {
        CompletionStatus::Failed => handle == Some("error"),
        CompletionStatus::Completed => match handle {
            None => true,
            Some("error") => false,
            Some(h) => present(output.get(h)) || present(output.get("output")),
        },
    }
}

/// The value an edge carries: `output[handle]` (falling back to
/// `output["output"]`) for named handles, the whole output otherwise.
pub fn carried_value(edge: &WorkflowEdge, output: &Payload) -> Value {
    match edge.named_source_handle() {
        Some(h) => output
            .get(h)
            .filter(|v| !v.is_null())
            .or_else(|| output.get("output").filter(|v| !v.is_null()))
            .cloned()
            .unwrap_or(Value::Null),
        None => Value::Object(output.clone()),
    }
}

fn present(v: Option<&Value>) -> bool {
    v.is_some_and(|v| !v.is_null())
}

/// Per-execution readiness state.
///
/// A node is ready exactly when its in-degree reaches zero, at least one
/// incoming edge carried data, and it is not yet resolved. A node whose
/// in-degree reaches zero with no carrying edge is skipped, and the skip
/// propagates downstream so joins behind a branch still fire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyGraph {
    /// Node ids in declaration order.
    pub nodes: Vec<String>,
    pub in_degree: BTreeMap<String, usize>,
    pub incoming_edges: BTreeMap<String, Vec<String>>,
    pub outgoing_edges: BTreeMap<String, Vec<String>>,
    pub completed_nodes: BTreeSet<String>,
    pub failed_nodes: BTreeSet<String>,
    pub activated_nodes: BTreeSet<String>,
    pub skipped_nodes: BTreeSet<String>,
    pub dispatched_nodes: BTreeSet<String>,
    pub waiting_nodes: BTreeSet<String>,
}

impl DependencyGraph {
    pub fn build(definition: &WorkflowDefinition) -> Self {
        let mut graph = Self::default();
        for node in &definition.nodes {
            graph.nodes.push(node.id.clone());
            graph.in_degree.insert(node.id.clone(), 0);
            graph.incoming_edges.insert(node.id.clone(), Vec::new());
            graph.outgoing_edges.insert(node.id.clone(), Vec::new());
        }
        for edge in &definition.edges {
            graph
                .outgoing_edges
                .entry(edge.source.clone())
                .or_default()
                .push(edge.target.clone());
            graph
                .incoming_edges
                .entry(edge.target.clone())
                .or_default()
                .push(edge.source.clone());
            *graph.in_degree.entry(edge.target.clone()).or_insert(0) += 1;
        }
        graph
    }

    /// Nodes with no incoming edges, in declaration order.
    pub fn initial_ready(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| self.in_degree.get(*n) == Some(&0))
            .cloned()
            .collect()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.in_degree.contains_key(node_id)
    }

    /// Completed, failed or skipped.
    pub fn is_resolved(&self, node_id: &str) -> bool {
        self.completed_nodes.contains(node_id)
            || self.failed_nodes.contains(node_id)
            || self.skipped_nodes.contains(node_id)
    }

    /// Nodes that are neither resolved nor waiting.
    pub fn unresolved(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| !self.is_resolved(n) && !self.waiting_nodes.contains(*n))
            .cloned()
            .collect()
    }

    pub fn mark_dispatched(&mut self, nodes: &[String]) {
        self.dispatched_nodes.extend(nodes.iter().cloned());
    }

    /// Park a node that asked to wait for external input.
    pub fn mark_waiting(&mut self, node_id: &str) {
        self.dispatched_nodes.remove(node_id);
        self.waiting_nodes.insert(node_id.to_owned());
    }

    /// Record a finished node and release its outgoing edges.
    ///
    /// Returns the nodes that became ready, already marked dispatched.
    /// Applying a completion to a node that is already resolved is a no-op.
    pub fn apply_completion(
        &mut self,
        definition: &WorkflowDefinition,
        node_id: &str,
        status: CompletionStatus,
        output: &Payload,
    ) -> Vec<String> {
        if self.is_resolved(node_id) || !self.contains(node_id) {
            return Vec::new();
        }
        self.dispatched_nodes.remove(node_id);
        self.waiting_nodes.remove(node_id);
        match status {
            CompletionStatus::Completed => self.completed_nodes.insert(node_id.to_owned()),
            CompletionStatus::Failed => self.failed_nodes.insert(node_id.to_owned()),
        };

        let mut ready = Vec::new();
        let mut skipped = Vec::new();
        self.release(definition, node_id, |e| edge_carries(e, status, output), &mut ready, &mut skipped);
        while let Some(dead) = skipped.pop() {
            self.release(definition, &dead, |_| false, &mut ready, &mut skipped);
        }

        self.mark_dispatched(&ready);
        ready
    }

    fn release(
        &mut self,
        definition: &WorkflowDefinition,
        source: &str,
        carries: impl Fn(&WorkflowEdge) -> bool,
        ready: &mut Vec<String>,
        skipped: &mut Vec<String>,
    ) {
        for edge in definition.outgoing(source) {
            let target = edge.target.as_str();
            if carries(edge) {
                self.activated_nodes.insert(target.to_owned());
            }
            let Some(degree) = self.in_degree.get_mut(target) else {
                continue;
            };
            *degree = degree.saturating_sub(1);
            if *degree > 0
                || self.is_resolved(target)
                || self.dispatched_nodes.contains(target)
                || self.waiting_nodes.contains(target)
                || ready.iter().any(|r| r == target)
            {
                continue;
            }
            if self.activated_nodes.contains(target) {
                ready.push(target.to_owned());
            } else {
                self.skipped_nodes.insert(target.to_owned());
                skipped.push(target.to_owned());
            }
        }
    }

    /// Every ancestor of `node_id`, each listed after its own ancestors
    /// (depth-first post-order over incoming edges).
    pub fn ancestors_in_order(&self, node_id: &str) -> Vec<String> {
        let mut visited: HashSet<String> = HashSet::from([node_id.to_owned()]);
        let mut order = Vec::new();
        self.visit_ancestors(node_id, &mut visited, &mut order);
        order
    }

    fn visit_ancestors(&self, node_id: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        let Some(sources) = self.incoming_edges.get(node_id) else {
            return;
        };
        for source in sources {
            if visited.insert(source.clone()) {
                self.visit_ancestors(source, visited, order);
                order.push(source.clone());
            }
        }
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkflowNode;
    use queue::messages::into_payload;
    use serde_json::json;

    fn make_node(id: &str) -> WorkflowNode {
        WorkflowNode::new(id, "mock", Value::Null)
    }

    fn make_definition(ids: &[&str], edges: Vec<WorkflowEdge>) -> WorkflowDefinition {
        WorkflowDefinition::new(ids.iter().map(|id| make_node(id)).collect(), edges)
    }

    fn edge(from: &str, to: &str) -> WorkflowEdge {
        WorkflowEdge::new(from, to)
    }

    fn done(graph: &mut DependencyGraph, def: &WorkflowDefinition, node: &str, output: Value) -> Vec<String> {
        graph.apply_completion(def, node, CompletionStatus::Completed, &into_payload(output))
    }

    #[test]
    fn valid_linear_dag_returns_sorted_order() {
        // A → B → C
        let def = make_definition(&["a", "b", "c"], vec![edge("a", "b"), edge("b", "c")]);
        let sorted = validate_dag(&def).expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }

    #[test]
    fn valid_diamond_dag() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let def = make_definition(
            &["a", "b", "c", "d"],
            vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
        );

        let sorted = validate_dag(&def).expect("should be valid");
        assert_eq!(sorted.first().unwrap(), "a");
        assert_eq!(sorted.last().unwrap(), "d");
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let def = make_definition(&["a", "a"], vec![]);
        assert!(matches!(
            validate_dag(&def),
            Err(EngineError::DuplicateNodeId(id)) if id == "a"
        ));
    }

    #[test]
    fn edge_referencing_missing_node_is_rejected() {
        let def = make_definition(&["a"], vec![edge("a", "ghost")]);
        assert!(matches!(
            validate_dag(&def),
            Err(EngineError::UnknownNodeReference { node_id, side: "target" }) if node_id == "ghost"
        ));
    }

    #[test]
    fn cycle_is_detected() {
        // A → B → C → A
        let def = make_definition(&["a", "b", "c"], vec![edge("a", "b"), edge("b", "c"), edge("c", "a")]);
        assert!(matches!(validate_dag(&def), Err(EngineError::CycleDetected)));
    }

    #[test]
    fn single_node_no_edges_is_valid() {
        let def = make_definition(&["solo"], vec![]);
        assert_eq!(validate_dag(&def).unwrap(), vec!["solo"]);
    }

    #[test]
    fn in_degrees_match_the_edge_list() {
        let def = make_definition(
            &["s", "a", "b", "j"],
            vec![edge("s", "a"), edge("s", "b"), edge("a", "j"), edge("b", "j")],
        );
        let graph = DependencyGraph::build(&def);

        assert_eq!(graph.in_degree["s"], 0);
        assert_eq!(graph.in_degree["a"], 1);
        assert_eq!(graph.in_degree["j"], 2);
        assert_eq!(graph.incoming_edges["j"], vec!["a", "b"]);
        assert_eq!(graph.outgoing_edges["s"], vec!["a", "b"]);
        assert_eq!(graph.initial_ready(), vec!["s"]);
    }

    #[test]
    fn join_waits_for_every_predecessor() {
        let def = make_definition(
            &["s", "a", "b", "j"],
            vec![edge("s", "a"), edge("s", "b"), edge("a", "j"), edge("b", "j")],
        );
        let mut graph = DependencyGraph::build(&def);
        graph.mark_dispatched(&graph.initial_ready());

        assert_eq!(done(&mut graph, &def, "s", json!({})), vec!["a", "b"]);
        assert!(done(&mut graph, &def, "a", json!({})).is_empty());
        assert_eq!(done(&mut graph, &def, "b", json!({})), vec!["j"]);
        assert!(graph.dispatched_nodes.contains("j"));
    }

    #[test]
    fn only_the_taken_branch_is_dispatched_and_dead_paths_are_skipped() {
        // c --true--> yes --> j
        // c --false-> no  --> j
        let def = make_definition(
            &["c", "yes", "no", "j"],
            vec![
                edge("c", "yes").with_source_handle("true"),
                edge("c", "no").with_source_handle("false"),
                edge("yes", "j"),
                edge("no", "j"),
            ],
        );
        let mut graph = DependencyGraph::build(&def);

        let ready = done(&mut graph, &def, "c", json!({ "true": { "v": 1 }, "condition_result": true }));
        assert_eq!(ready, vec!["yes"]);
        assert!(graph.skipped_nodes.contains("no"));
        assert_eq!(graph.in_degree["j"], 1);

        assert_eq!(done(&mut graph, &def, "yes", json!({})), vec!["j"]);
        assert!(graph.unresolved().iter().all(|n| n == "j"));
    }

    #[test]
    fn skipping_propagates_through_chains() {
        let def = make_definition(
            &["c", "x", "y"],
            vec![edge("c", "x").with_source_handle("false"), edge("x", "y")],
        );
        let mut graph = DependencyGraph::build(&def);
        let ready = done(&mut graph, &def, "c", json!({ "true": {} }));
        assert!(ready.is_empty());
        assert!(graph.skipped_nodes.contains("x"));
        assert!(graph.skipped_nodes.contains("y"));
        assert!(graph.unresolved().is_empty());
    }

    #[test]
    fn failures_follow_error_edges_only() {
        let def = make_definition(
            &["a", "ok", "err"],
            vec![edge("a", "ok"), edge("a", "err").with_source_handle("error")],
        );
        let mut graph = DependencyGraph::build(&def);
        let ready = graph.apply_completion(
            &def,
            "a",
            CompletionStatus::Failed,
            &into_payload(json!({ "error": "boom" })),
        );
        assert_eq!(ready, vec!["err"]);
        assert!(graph.skipped_nodes.contains("ok"));
        assert!(graph.failed_nodes.contains("a"));
    }

    #[test]
    fn resolved_nodes_are_never_made_ready_again() {
        let def = make_definition(&["a", "b"], vec![edge("a", "b")]);
        let mut graph = DependencyGraph::build(&def);
        assert_eq!(done(&mut graph, &def, "a", json!({})), vec!["b"]);
        let before = graph.clone();
        assert!(done(&mut graph, &def, "a", json!({})).is_empty());
        assert_eq!(graph, before);
    }

    #[test]
    fn cycles_never_become_ready() {
        let def = make_definition(&["s", "a", "b"], vec![edge("s", "a"), edge("a", "b"), edge("b", "a")]);
        let mut graph = DependencyGraph::build(&def);
        assert!(done(&mut graph, &def, "s", json!({})).is_empty());
        assert_eq!(graph.unresolved(), vec!["a", "b"]);
    }

    #[test]
    fn handle_resolution_falls_back_to_output() {
        let e = edge("a", "b").with_source_handle("result");
        assert!(edge_carries(&e, CompletionStatus::Completed, &into_payload(json!({ "result": 1 }))));
        assert!(edge_carries(&e, CompletionStatus::Completed, &into_payload(json!({ "output": {} }))));
        assert!(!edge_carries(&e, CompletionStatus::Completed, &into_payload(json!({ "result": null }))));
        assert!(!edge_carries(&e, CompletionStatus::Failed, &into_payload(json!({ "result": 1 }))));
        assert_eq!(carried_value(&e, &into_payload(json!({ "output": { "k": 2 } }))), json!({ "k": 2 }));
    }

    #[test]
    fn ancestors_are_listed_before_their_descendants() {
        let def = make_definition(
            &["s", "a", "b", "j"],
            vec![edge("s", "a"), edge("s", "b"), edge("a", "j"), edge("b", "j")],
        );
        let graph = DependencyGraph::build(&def);
        assert_eq!(graph.ancestors_in_order("j"), vec!["s", "a", "b"]);
        assert!(graph.ancestors_in_order("s").is_empty());
    }
}
