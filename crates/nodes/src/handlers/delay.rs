//! Fixed pause on the worker.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use queue::messages::into_payload;
use queue::Payload;

use crate::{NodeContext, NodeError, NodeHandler};

const DEFAULT_DELAY_MS: u64 = 1000;

/// Sleeps `data.duration` milliseconds (number or numeric string).
pub struct DelayHandler;

fn duration_ms(config: &Value) -> Result<u64, NodeError> {
    match config.get("duration") {
        None | Some(Value::Null) => Ok(DEFAULT_DELAY_MS),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| NodeError::Fatal(format!("invalid delay duration: {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| NodeError::Fatal(format!("invalid delay duration: {s}"))),
        Some(other) => Err(NodeError::Fatal(format!("invalid delay duration: {other}"))),
    }
}

#[async_trait]
impl NodeHandler for DelayHandler {
    fn node_types(&self) -> &'static [&'static str] {
        &["delay"]
    }

    async fn execute(&self, config: &Value, _input: &Payload, _ctx: &NodeContext) -> Result<Payload, NodeError> {
        let ms = duration_ms(config)?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(into_payload(json!({
            "delay_completed": true,
            "duration_ms": ms,
            "completed_at": super::timestamp(),
        })))
    }
}
