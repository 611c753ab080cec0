//! Outbound email through a pluggable [`Mailer`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use queue::messages::into_payload;
use queue::Payload;

use crate::template::config_str;
use crate::{NodeContext, NodeError, NodeHandler};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Delivery backend for email nodes.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NodeError>;
}

/// Mailer used when no relay is configured: every send fails permanently.
pub struct UnconfiguredMailer;

#[async_trait]
impl Mailer for UnconfiguredMailer {
    async fn send(&self, _email: &OutgoingEmail) -> Result<(), NodeError> {
        Err(NodeError::Fatal("no mail relay configured (set FLOWLINE_MAIL_API_URL)".into()))
    }
}

/// Posts messages as JSON to an HTTP mail relay.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, api_key: Option<String>, from: impl Into<String>) -> Self {
        Self { client, endpoint: endpoint.into(), api_key, from: from.into() }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NodeError> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "from": self.from,
            "to": email.to,
            "subject": email.subject,
            "text": email.body,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(NodeError::from_http)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(super::status_error("mail relay", status, &body));
        }
        Ok(())
    }
}

/// Sends `data.to / subject / body` (templated). Missing fields fall back to
/// the same keys inside the input's `output` object.
pub struct EmailHandler {
    mailer: Arc<dyn Mailer>,
}

impl EmailHandler {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

fn field(config: &Value, input: &Payload, name: &str) -> Option<String> {
    config_str(config, name, input).or_else(|| {
        input
            .get("output")
            .and_then(|o| o.get(name))
            .and_then(Value::as_str)
            .map(str::to_owned)
    })
}

#[async_trait]
impl NodeHandler for EmailHandler {
    fn node_types(&self) -> &'static [&'static str] {
        &["email", "action"]
    }

    async fn execute(&self, config: &Value, input: &Payload, ctx: &NodeContext) -> Result<Payload, NodeError> {
        let (Some(to), Some(subject), Some(body)) = (
            field(config, input, "to"),
            field(config, input, "subject"),
            field(config, input, "body"),
        ) else {
            return Err(NodeError::Fatal("Missing fields in email node".into()));
        };

        let email = OutgoingEmail { to, subject, body };
        self.mailer.send(&email).await?;
        info!(node_id = %ctx.node_id, to = %email.to, subject = %email.subject, "Email sent");

        Ok(into_payload(json!({ "output": { "status": "sent", "to": email.to } })))
    }
}
