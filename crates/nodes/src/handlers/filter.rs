//! Conditional branching.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use queue::Payload;

use crate::condition;
use crate::template::{resolve_path, substitute_value};
use crate::{NodeContext, NodeError, NodeHandler};

/// Evaluates `data.condition = {field, operator, value}` against the input.
///
/// The output carries the input under the branch key (`"true"` or
/// `"false"`), so only edges leaving that handle are activated. A missing
/// condition takes the `true` branch; a condition without field or operator
/// takes the `false` branch.
pub struct FilterHandler;

#[async_trait]
impl NodeHandler for FilterHandler {
    fn node_types(&self) -> &'static [&'static str] {
        &["filter", "condition", "conditional"]
    }

    async fn execute(&self, config: &Value, input: &Payload, ctx: &NodeContext) -> Result<Payload, NodeError> {
        let Some(cond) = config.get("condition").and_then(Value::as_object) else {
            warn!(node_id = %ctx.node_id, "No condition configured; defaulting to true");
            return Ok(branch(input, true, None, "default", None));
        };

        let field = cond.get("field").and_then(Value::as_str);
        let operator = cond.get("operator").and_then(Value::as_str);
        let (Some(field), Some(operator)) = (field, operator) else {
            warn!(node_id = %ctx.node_id, "Condition is missing field or operator; defaulting to false");
            return Ok(branch(input, false, None, "default", None));
        };

        let actual = resolve_path(input, field);
        let expected = cond.get("value").map(|v| substitute_value(v, input));
        let result = condition::evaluate(actual, operator, expected.as_ref());

        info!(
            node_id = %ctx.node_id,
            field = %field,
            operator = %operator,
            result,
            "Evaluated condition"
        );
        Ok(branch(input, result, actual, operator, expected.as_ref()))
    }
}

fn branch(
    input: &Payload,
    result: bool,
    actual: Option<&Value>,
    operator: &str,
    expected: Option<&Value>,
) -> Payload {
    let mut output = Payload::new();
    output.insert(result.to_string(), Value::Object(input.clone()));
    output.insert("condition_result".into(), Value::Bool(result));
    output.insert(
        "evaluation_details".into(),
        json!({
            "actual_value": actual.cloned().unwrap_or(Value::Null),
            "operator": operator,
            "expected_value": expected.cloned().unwrap_or(Value::Null),
            "result": result,
        }),
    );
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue::messages::into_payload;
    use uuid::Uuid;

    fn ctx() -> NodeContext {
        NodeContext {
            execution_id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            node_id: "check".into(),
            node_type: "condition".into(),
        }
    }

    #[tokio::test]
    async fn true_branch_carries_the_input() {
        let input = into_payload(json!({ "order": { "total": 120 } }));
        let config = json!({ "condition": { "field": "order.total", "operator": ">", "value": 100 } });
        let out = FilterHandler.execute(&config, &input, &ctx()).await.unwrap();

        assert_eq!(out["true"]["order"]["total"], 120);
        assert!(out.get("false").is_none());
        assert_eq!(out["condition_result"], true);
        assert_eq!(out["evaluation_details"]["actual_value"], 120);
    }

    #[tokio::test]
    async fn expected_value_is_templated() {
        let input = into_payload(json!({ "status": "ok", "wanted": "ok" }));
        let config = json!({ "condition": { "field": "status", "operator": "equals", "value": "{{wanted}}" } });
        let out = FilterHandler.execute(&config, &input, &ctx()).await.unwrap();
        assert_eq!(out["condition_result"], true);
    }

    #[tokio::test]
    async fn malformed_conditions_use_defaults() {
        let input = into_payload(json!({ "a": 1 }));

        let missing = FilterHandler.execute(&json!({}), &input, &ctx()).await.unwrap();
        assert!(missing.contains_key("true"));

        let partial = json!({ "condition": { "field": "a" } });
        let out = FilterHandler.execute(&partial, &input, &ctx()).await.unwrap();
        assert!(out.contains_key("false"));
        assert_eq!(out["evaluation_details"]["operator"], "default");
    }
}
