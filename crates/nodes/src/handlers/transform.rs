//! Field mapping.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use queue::Payload;

use crate::template::resolve_path;
use crate::{NodeContext, NodeError, NodeHandler};

/// `data.mapping` is `{outKey: "source.path"}`. String values are looked up
/// in the input; any other JSON value is emitted as a literal. The output
/// holds only the mapped keys; unresolved paths are left out.
pub struct TransformHandler;

#[async_trait]
impl NodeHandler for TransformHandler {
    fn node_types(&self) -> &'static [&'static str] {
        &["transform"]
    }

    async fn execute(&self, config: &Value, input: &Payload, ctx: &NodeContext) -> Result<Payload, NodeError> {
        let mapping = match config.get("mapping") {
            None | Some(Value::Null) => return Ok(Payload::new()),
            Some(Value::Object(m)) => m,
            Some(_) => return Err(NodeError::Fatal("transform mapping must be an object".into())),
        };

        let mut output = Payload::new();
        for (out_key, source) in mapping {
            match source {
                Value::String(path) => match resolve_path(input, path) {
                    Some(v) => {
                        output.insert(out_key.clone(), v.clone());
                    }
                    None => debug!(node_id = %ctx.node_id, path = %path, "Mapping source not found"),
                },
                literal => {
                    output.insert(out_key.clone(), literal.clone());
                }
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue::messages::into_payload;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> NodeContext {
        NodeContext {
            execution_id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            node_id: "transform".into(),
            node_type: "transform".into(),
        }
    }

    #[tokio::test]
    async fn output_holds_only_mapped_keys() {
        let out = TransformHandler
            .execute(&json!({ "mapping": { "y": "x" } }), &into_payload(json!({ "x": 5, "z": 1 })), &ctx())
            .await
            .unwrap();
        assert_eq!(Value::Object(out), json!({ "y": 5 }));
    }

    #[tokio::test]
    async fn nested_paths_literals_and_missing_sources() {
        let input = into_payload(json!({ "user": { "email": "a@b.c" } }));
        let config = json!({ "mapping": { "to": "user.email", "gone": "nope", "flag": true } });
        let out = TransformHandler.execute(&config, &input, &ctx()).await.unwrap();
        assert_eq!(Value::Object(out), json!({ "to": "a@b.c", "flag": true }));
    }

    #[tokio::test]
    async fn non_object_mapping_is_fatal() {
        let err = TransformHandler
            .execute(&json!({ "mapping": "x" }), &Payload::new(), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }
}
