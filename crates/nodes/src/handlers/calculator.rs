//! Arithmetic expressions evaluated in a sandboxed `rhai` engine.
//!
//! Only expressions are accepted (no statements, loops or function
//! definitions). Integer operands use integer arithmetic, so `7 / 2` is `3`
//! while `7.0 / 2` is `3.5`.

use async_trait::async_trait;
use rhai::{Dynamic, Engine};
use serde_json::{Number, Value};
use tracing::debug;

use queue::Payload;

use crate::template::config_str;
use crate::{NodeContext, NodeError, NodeHandler};

pub struct CalculatorHandler {
    engine: Engine,
}

impl CalculatorHandler {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(10_000);
        engine.set_max_expr_depths(64, 32);
        engine.set_max_string_size(4_096);
        engine.set_max_array_size(1_024);
        Self { engine }
    }

    /// Evaluate `expression` to a JSON number (or boolean for comparisons).
    pub fn evaluate(&self, expression: &str) -> Result<Value, NodeError> {
        let result = self
            .engine
            .eval_expression::<Dynamic>(expression)
            .map_err(|e| NodeError::Fatal(format!("cannot evaluate '{expression}': {e}")))?;
        to_json(result, expression)
    }
}

impl Default for CalculatorHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn to_json(result: Dynamic, expression: &str) -> Result<Value, NodeError> {
    if let Ok(i) = result.as_int() {
        return Ok(Value::from(i));
    }
    if let Ok(f) = result.as_float() {
        return Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| NodeError::Fatal(format!("'{expression}' is not a finite number")));
    }
    if let Ok(b) = result.as_bool() {
        return Ok(Value::Bool(b));
    }
    Err(NodeError::Fatal(format!(
        "'{expression}' evaluated to {}, expected a number",
        result.type_name()
    )))
}

#[async_trait]
impl NodeHandler for CalculatorHandler {
    fn node_types(&self) -> &'static [&'static str] {
        &["calculator"]
    }

    async fn execute(&self, config: &Value, input: &Payload, ctx: &NodeContext) -> Result<Payload, NodeError> {
        let expression = config_str(config, "expression", input)
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| NodeError::Fatal("calculator expression is required".into()))?;

        let result = self.evaluate(&expression)?;
        debug!(node_id = %ctx.node_id, expression = %expression, result = %result, "Evaluated expression");

        let mut output = input.clone();
        output.insert("expression".into(), Value::String(expression));
        output.insert("result".into(), result);
        output.insert("executed_at".into(), Value::String(super::timestamp()));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue::messages::into_payload;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn arithmetic_follows_operand_types() {
        let calc = CalculatorHandler::new();
        assert_eq!(calc.evaluate("2 + 3 * 4").unwrap(), json!(14));
        assert_eq!(calc.evaluate("7 / 2").unwrap(), json!(3));
        assert_eq!(calc.evaluate("7.0 / 2").unwrap(), json!(3.5));
        assert_eq!(calc.evaluate("(1 + 2) > 2").unwrap(), json!(true));
    }

    #[test]
    fn non_numeric_and_invalid_expressions_fail() {
        let calc = CalculatorHandler::new();
        assert!(matches!(calc.evaluate("\"abc\""), Err(NodeError::Fatal(_))));
        assert!(matches!(calc.evaluate("2 +"), Err(NodeError::Fatal(_))));
        assert!(matches!(calc.evaluate("let x = 1; x"), Err(NodeError::Fatal(_))));
    }

    #[tokio::test]
    async fn expression_is_templated_from_input() {
        let ctx = NodeContext {
            execution_id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            node_id: "calc".into(),
            node_type: "calculator".into(),
        };
        let input = into_payload(json!({ "price": 20, "qty": 3 }));
        let out = CalculatorHandler::new()
            .execute(&json!({ "expression": "{{price}} * {{qty}}" }), &input, &ctx)
            .await
            .unwrap();
        assert_eq!(out["expression"], "20 * 3");
        assert_eq!(out["result"], 60);
        assert_eq!(out["price"], 20);
    }
}
