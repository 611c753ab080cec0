//! Entry node: seeds the execution with configured variables.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use queue::Payload;

use crate::{NodeContext, NodeError, NodeHandler};

/// Output is `data.context` overlaid with the trigger input, plus execution
/// metadata.
pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    fn node_types(&self) -> &'static [&'static str] {
        &["start", "trigger"]
    }

    async fn execute(&self, config: &Value, input: &Payload, ctx: &NodeContext) -> Result<Payload, NodeError> {
        let mut output = Payload::new();
        if let Some(seed) = config.get("context").and_then(Value::as_object) {
            info!(node_id = %ctx.node_id, variables = seed.len(), "Start node seeded workflow variables");
            output.extend(seed.clone());
        }
        output.extend(input.clone());
        output.insert("node_executed_at".into(), Value::String(super::timestamp()));
        output.insert("execution_id".into(), Value::String(ctx.execution_id.to_string()));
        output.insert("started_by".into(), Value::String("workflow_coordinator".into()));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue::messages::into_payload;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn trigger_input_overrides_configured_context() {
        let ctx = NodeContext {
            execution_id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            node_id: "start".into(),
            node_type: "start".into(),
        };
        let out = StartHandler
            .execute(
                &json!({ "context": { "region": "eu", "x": 1 } }),
                &into_payload(json!({ "x": 5 })),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(out["region"], "eu");
        assert_eq!(out["x"], 5);
        assert_eq!(out["execution_id"], ctx.execution_id.to_string());
    }
}
