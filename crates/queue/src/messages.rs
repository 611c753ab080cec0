//! Wire contracts exchanged over the broker.
//!
//! Field names are camelCase so that workers written for other runtimes
//! (the analytical family) can share the same JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// A JSON object: node outputs, merged inputs and trigger payloads.
pub type Payload = serde_json::Map<String, Value>;

/// Output key with which a node asks the coordinator to park the execution
/// until an external trigger resumes it.
pub const AWAITING_INPUT_KEY: &str = "awaitingExternalInput";

// ---------------------------------------------------------------------------
// Node execution
// ---------------------------------------------------------------------------

/// Instruction to run one node, consumed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionMessage {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    /// Node-specific configuration, as stored in the workflow definition.
    #[serde(default)]
    pub node_data: Value,
    /// Merged upstream outputs plus global variables.
    #[serde(default)]
    pub context: Payload,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Node completion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    Completed,
    Failed,
}

/// Result of running one node, published by whichever worker ran it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCompletionMessage {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    pub status: CompletionStatus,
    #[serde(default)]
    pub output: Payload,
    pub timestamp: DateTime<Utc>,
    /// Wall-clock handler time in milliseconds.
    #[serde(default)]
    pub processing_time: u64,
}

impl NodeCompletionMessage {
    /// Successful completion of `request` with `output`.
    pub fn completed(request: &NodeExecutionMessage, output: Payload, processing_time: u64) -> Self {
        Self::build(request, CompletionStatus::Completed, output, processing_time)
    }

    /// Failed completion of `request`; the message is kept under `error`.
    pub fn failed(request: &NodeExecutionMessage, error: impl Into<String>, processing_time: u64) -> Self {
        let mut output = Payload::new();
        output.insert("error".into(), Value::String(error.into()));
        Self::build(request, CompletionStatus::Failed, output, processing_time)
    }

    fn build(
        request: &NodeExecutionMessage,
        status: CompletionStatus,
        output: Payload,
        processing_time: u64,
    ) -> Self {
        Self {
            execution_id: request.execution_id,
            workflow_id: request.workflow_id,
            node_id: request.node_id.clone(),
            node_type: request.node_type.clone(),
            status,
            output,
            timestamp: Utc::now(),
            processing_time,
        }
    }

    /// The error text carried by a failed completion, if any.
    pub fn error_message(&self) -> Option<String> {
        match self.output.get("error") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow events
// ---------------------------------------------------------------------------

/// Control events on the workflow-events topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowEvent {
    /// Start a new execution, e.g. from another system publishing to the broker.
    #[serde(rename_all = "camelCase")]
    Run {
        workflow_id: Uuid,
        #[serde(default)]
        payload: Payload,
    },
    /// An external webhook fired for `node_id`.
    #[serde(rename_all = "camelCase")]
    WebhookTriggered {
        workflow_id: Uuid,
        node_id: String,
        #[serde(default)]
        input: Payload,
        /// Restrict resumption to one execution instead of every waiting one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_id: Option<Uuid>,
    },
}

impl WorkflowEvent {
    pub fn workflow_id(&self) -> Uuid {
        match self {
            Self::Run { workflow_id, .. } | Self::WebhookTriggered { workflow_id, .. } => *workflow_id,
        }
    }
}

/// Coerce an arbitrary JSON value into a payload object; non-objects are
/// wrapped as `{"value": v}` and `null` becomes empty.
pub fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        Value::Null => Payload::new(),
        other => match json!({ "value": other }) {
            Value::Object(map) => map,
            _ => Payload::new(),
        },
    }
}
