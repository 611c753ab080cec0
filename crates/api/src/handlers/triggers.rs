use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use queue::{Payload, WorkflowEvent};

use super::executions::parse_payload;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerQuery {
    /// Resume only this execution.
    pub execution_id: Option<Uuid>,
}

/// `POST /api/v1/triggers/{workflow_id}/{node_id}`
///
/// Publishes a resumption event and always answers 200. The outcome is
/// visible only through the status of the affected executions. A body that
/// is not JSON is passed on as `{"raw": text}`.
pub async fn fire(
    Path((workflow_id, node_id)): Path<(Uuid, String)>,
    Query(query): Query<TriggerQuery>,
    State(state): State<AppState>,
    body: Bytes,
) -> Json<Value> {
    let input = parse_payload(&body).unwrap_or_else(|_| {
        let mut raw = Payload::new();
        raw.insert("raw".into(), Value::String(String::from_utf8_lossy(&body).into_owned()));
        raw
    });
    let event = WorkflowEvent::WebhookTriggered {
        workflow_id,
        node_id: node_id.clone(),
        input,
        execution_id: query.execution_id,
    };

    match state.coordinator.producer().publish_workflow_event(&event).await {
        Ok(()) => info!(workflow_id = %workflow_id, node_id = %node_id, "Trigger accepted"),
        Err(e) => error!(workflow_id = %workflow_id, node_id = %node_id, error = %e, "Failed to publish trigger"),
    }

    Json(json!({
        "message": "Trigger received",
        "workflowId": workflow_id,
        "nodeId": node_id,
    }))
}
