//! External-wait node: parks the execution until a webhook resumes it.

use async_trait::async_trait;
use serde_json::Value;

use queue::{Payload, AWAITING_INPUT_KEY};

use crate::{NodeContext, NodeError, NodeHandler};

/// Returns the awaiting-input marker. The coordinator then pauses the
/// execution; the resume payload later becomes this node's output.
pub struct WaitHandler;

#[async_trait]
impl NodeHandler for WaitHandler {
    fn node_types(&self) -> &'static [&'static str] {
        &["wait", "webhookTrigger"]
    }

    async fn execute(&self, config: &Value, _input: &Payload, ctx: &NodeContext) -> Result<Payload, NodeError> {
        let mut output = Payload::new();
        output.insert(AWAITING_INPUT_KEY.into(), Value::Bool(true));
        output.insert("waiting_since".into(), Value::String(super::timestamp()));
        output.insert(
            "resume_path".into(),
            Value::String(format!("/api/v1/triggers/{}/{}", ctx.workflow_id, ctx.node_id)),
        );
        if let Some(description) = config.get("description").filter(|v| !v.is_null()) {
            output.insert("description".into(), description.clone());
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn output_carries_marker_and_resume_path() {
        let ctx = NodeContext {
            execution_id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            node_id: "approval".into(),
            node_type: "wait".into(),
        };
        let out = WaitHandler.execute(&json!({}), &Payload::new(), &ctx).await.unwrap();
        assert_eq!(out[AWAITING_INPUT_KEY], true);
        assert_eq!(out["resume_path"], format!("/api/v1/triggers/{}/approval", ctx.workflow_id));
    }
}
