//! Calendar event creation over the Google Calendar REST API.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use queue::Payload;

use crate::template::config_str;
use crate::{NodeContext, NodeError, NodeHandler};

pub const GOOGLE_CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";

/// Creates an event from `data.summary / startTime / endTime` using the
/// caller's `googleAccessToken`.
pub struct CalendarHandler {
    client: reqwest::Client,
    base_url: String,
}

impl CalendarHandler {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into() }
    }
}

fn event_body(config: &Value, input: &Payload) -> Result<Value, NodeError> {
    let summary = config_str(config, "summary", input).unwrap_or_default();
    let start = config_str(config, "startTime", input)
        .ok_or_else(|| NodeError::Fatal("calendar startTime is required".into()))?;
    let end = config_str(config, "endTime", input)
        .ok_or_else(|| NodeError::Fatal("calendar endTime is required".into()))?;

    let mut event = json!({
        "summary": summary,
        "start": { "dateTime": start },
        "end": { "dateTime": end },
    });
    if let Some(description) = config_str(config, "description", input) {
        event["description"] = Value::String(description);
    }
    Ok(event)
}

#[async_trait]
impl NodeHandler for CalendarHandler {
    fn node_types(&self) -> &'static [&'static str] {
        &["googleCalendar"]
    }

    async fn execute(&self, config: &Value, input: &Payload, ctx: &NodeContext) -> Result<Payload, NodeError> {
        let token = input
            .get("googleAccessToken")
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| NodeError::Fatal("Missing Google access token".into()))?;
        let calendar = config_str(config, "calendarId", input).unwrap_or_else(|| "primary".into());
        let event = event_body(config, input)?;

        let url = format!("{}/calendars/{}/events", self.base_url.trim_end_matches('/'), calendar);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&event)
            .send()
            .await
            .map_err(NodeError::from_http)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(super::status_error("calendar API", status, &body));
        }
        let created: Value = response.json().await.map_err(NodeError::from_http)?;

        let user = input.get("user_email").and_then(Value::as_str).unwrap_or("unknown");
        info!(node_id = %ctx.node_id, user = %user, "Calendar event created");

        let mut output = Payload::new();
        output.insert("calendar_event_summary".into(), event["summary"].clone());
        output.insert("calendar_event_id".into(), created.get("id").cloned().unwrap_or(Value::Null));
        output.insert("calendar_event_link".into(), created.get("htmlLink").cloned().unwrap_or(Value::Null));
        output.insert("event_created".into(), Value::Bool(true));
        Ok(output)
    }
}
