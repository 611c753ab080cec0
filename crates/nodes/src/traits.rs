//! The `NodeHandler` trait — the contract every node type must fulfil.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use queue::{NodeExecutionMessage, Payload};

use crate::NodeError;

/// Identity of the node invocation, for logging and for handlers that need to
/// build callback URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContext {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub node_id: String,
    pub node_type: String,
}

impl From<&NodeExecutionMessage> for NodeContext {
    fn from(msg: &NodeExecutionMessage) -> Self {
        Self {
            execution_id: msg.execution_id,
            workflow_id: msg.workflow_id,
            node_id: msg.node_id.clone(),
            node_type: msg.node_type.clone(),
        }
    }
}

/// A type-specific node executor.
///
/// Handlers must tolerate being run more than once for the same node
/// (delivery is at-least-once).
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Type tags served by this handler, matched case-insensitively.
    fn node_types(&self) -> &'static [&'static str];

    fn can_handle(&self, node_type: &str) -> bool {
        self.node_types().iter().any(|t| t.eq_ignore_ascii_case(node_type))
    }

    /// Run the node. `config` is the node's `data` object from the workflow
    /// definition; `input` is the merged upstream context. Branching handlers
    /// return their branch name as a key (e.g. `{"true": …}`).
    async fn execute(
        &self,
        config: &Value,
        input: &Payload,
        ctx: &NodeContext,
    ) -> Result<Payload, NodeError>;
}
