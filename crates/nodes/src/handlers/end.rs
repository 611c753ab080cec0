//! Terminal node.

use async_trait::async_trait;
use serde_json::Value;

use queue::Payload;

use crate::{NodeContext, NodeError, NodeHandler};

/// Passes its merged input through so the final state is visible in
/// `nodeOutputs`.
pub struct EndHandler;

#[async_trait]
impl NodeHandler for EndHandler {
    fn node_types(&self) -> &'static [&'static str] {
        &["end"]
    }

    async fn execute(&self, _config: &Value, input: &Payload, _ctx: &NodeContext) -> Result<Payload, NodeError> {
        Ok(input.clone())
    }
}
