//! Core domain models for the workflow engine.
//!
//! A workflow's graph is stored as an opaque JSON document in the
//! `workflow_data` column of the `workflows` table. [`WorkflowDefinition`] is
//! the typed view of that document; unknown editor fields are ignored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use db::models::{WorkflowRow, WorkflowStatus};
use queue::Payload;

use crate::EngineError;

// ---------------------------------------------------------------------------
// Graph document
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    /// Type tag resolved against the handler registry.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Node configuration handed to the handler as-is.
    #[serde(default)]
    pub data: Value,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, data: Value) -> Self {
        Self { id: id.into(), node_type: node_type.into(), data }
    }
}

/// Directed edge from `source` to `target`.
///
/// `source_handle` names the output handle the edge leaves from (e.g.
/// `"true"` on a condition node); `target_handle` names the input key the
/// carried value lands in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WorkflowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
            data: None,
        }
    }

    pub fn with_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    pub fn with_target_handle(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = Some(handle.into());
        self
    }

    /// The explicit source handle, treating empty and `"output"` as the
    /// default handle.
    pub fn named_source_handle(&self) -> Option<&str> {
        self.source_handle
            .as_deref()
            .filter(|h| !h.is_empty() && *h != "output")
    }

    pub fn named_target_handle(&self) -> Option<&str> {
        self.target_handle.as_deref().filter(|h| !h.is_empty())
    }
}

/// Nodes and edges of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowDefinition {
    pub fn new(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Self {
        Self { nodes, edges }
    }

    /// Parse a `workflow_data` document.
    pub fn from_value(value: Value) -> Result<Self, EngineError> {
        serde_json::from_value(value).map_err(|e| EngineError::InvalidDefinition(e.to_string()))
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }

    /// A root has no incoming edges.
    pub fn is_root(&self, id: &str) -> bool {
        self.node(id).is_some() && self.incoming(id).next().is_none()
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A stored workflow with its parsed graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub definition: WorkflowDefinition,
    pub status: WorkflowStatus,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Workflow {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, definition: WorkflowDefinition) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: Uuid::nil(),
            name: name.into(),
            description: None,
            definition,
            status: WorkflowStatus::Draft,
            is_active: true,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = EngineError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<WorkflowStatus>()
            .map_err(EngineError::InvalidDefinition)?;
        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            description: row.description,
            definition: WorkflowDefinition::from_value(row.workflow_data)?,
            status,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

// ---------------------------------------------------------------------------
// Execution state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Initiated,
    Running,
    Paused,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initiated => "INITIATED",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Mutable per-execution state, written only by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Trigger payload plus request-scoped values such as access tokens.
    #[serde(default)]
    pub global_variables: Payload,
    /// Latest output per node id.
    #[serde(default)]
    pub node_outputs: BTreeMap<String, Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_node: Option<String>,
}

impl ExecutionContext {
    pub fn new(execution_id: Uuid, workflow_id: Uuid, global_variables: Payload) -> Self {
        Self {
            execution_id,
            workflow_id,
            status: ExecutionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            global_variables,
            node_outputs: BTreeMap::new(),
            error: None,
            failed_node: None,
        }
    }

    /// Move to `status`, stamping the end time for terminal states.
    pub fn transition(&mut self, status: ExecutionStatus) {
        self.status = status;
        if status.is_terminal() && self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
    }

    /// Terminate as FAILED with `message`, optionally blaming `node_id`.
    pub fn fail(&mut self, message: impl Into<String>, node_id: Option<&str>) {
        self.error = Some(message.into());
        self.failed_node = node_id.map(str::to_owned);
        self.transition(ExecutionStatus::Failed);
    }
}

/// Return-variable payload produced for a finished (or running) execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub variables: Payload,
    pub requested_variables: Vec<String>,
    pub returned_variable_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_variables: Option<Vec<String>>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    /// Pick `requested` names from the global variables overlaid with every
    /// node output (later nodes win). With no names requested, every
    /// variable is returned.
    pub fn collect(ctx: &ExecutionContext, requested: &[String]) -> Self {
        let mut all = ctx.global_variables.clone();
        for output in ctx.node_outputs.values() {
            all.extend(output.clone());
        }

        let (variables, missing) = if requested.is_empty() {
            (all, Vec::new())
        } else {
            let mut picked = Payload::new();
            let mut missing = Vec::new();
            for name in requested {
                match all.get(name) {
                    Some(v) => {
                        picked.insert(name.clone(), v.clone());
                    }
                    None => {
                        picked.insert(name.clone(), Value::Null);
                        missing.push(name.clone());
                    }
                }
            }
            (picked, missing)
        };

        Self {
            execution_id: ctx.execution_id,
            status: ctx.status,
            returned_variable_count: variables.len() - missing.len(),
            variables,
            requested_variables: requested.to_vec(),
            missing_variables: (!missing.is_empty()).then_some(missing),
            timestamp: Utc::now(),
        }
    }
}
