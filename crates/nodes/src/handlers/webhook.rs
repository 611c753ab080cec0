//! Outbound webhook call.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::info;

use queue::Payload;

use crate::template::{config_str, substitute_value};
use crate::{NodeContext, NodeError, NodeHandler};

/// Sends the templated `data.payload` to the templated `data.url`
/// (method defaults to `POST`). Output is the input plus call details.
pub struct WebhookCallHandler {
    client: reqwest::Client,
}

impl WebhookCallHandler {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeHandler for WebhookCallHandler {
    fn node_types(&self) -> &'static [&'static str] {
        &["webhook"]
    }

    async fn execute(&self, config: &Value, input: &Payload, ctx: &NodeContext) -> Result<Payload, NodeError> {
        let url = config_str(config, "url", input)
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| NodeError::Fatal("webhook url is required".into()))?;
        let method = config_str(config, "method", input)
            .unwrap_or_else(|| "POST".into())
            .to_uppercase();
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| NodeError::Fatal(format!("invalid HTTP method: {method}")))?;
        let payload = config
            .get("payload")
            .map(|p| substitute_value(p, input))
            .unwrap_or_else(|| Value::Object(Payload::new()));

        let mut request = self.client.request(method.clone(), &url);
        if method != Method::GET && method != Method::HEAD {
            request = request.json(&payload);
        }
        let response = request.send().await.map_err(NodeError::from_http)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(super::status_error("webhook", status, &body));
        }
        info!(node_id = %ctx.node_id, url = %url, status = status.as_u16(), "Webhook called");

        let mut output = input.clone();
        output.insert("webhook_called".into(), Value::Bool(true));
        output.insert("url".into(), Value::String(url));
        output.insert("method".into(), Value::String(method.to_string()));
        output.insert("response_status".into(), Value::from(status.as_u16()));
        output.insert("called_at".into(), Value::String(super::timestamp()));
        Ok(output)
    }
}
