use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use engine::coordinator::take_return_variables;
use engine::{EngineError, ExecutionContext, ExecutionResult};
use queue::messages::into_payload;
use queue::Payload;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Request headers copied into the trigger payload.
const FORWARDED_HEADERS: &[(&str, &str)] = &[
    ("x-google-access-token", "googleAccessToken"),
    ("x-user-email", "user_email"),
];

/// Parse an optional JSON body into a payload.
pub(crate) fn parse_payload(body: &Bytes) -> ApiResult<Payload> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Payload::new());
    }
    serde_json::from_slice::<Value>(body)
        .map(into_payload)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

/// `POST /api/v1/workflows/{id}/run`
pub async fn run(
    Path(workflow_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let mut payload = parse_payload(&body)?;
    let return_variables = take_return_variables(&mut payload);
    for (header, key) in FORWARDED_HEADERS {
        if let Some(value) = headers.get(*header).and_then(|v| v.to_str().ok()) {
            payload.insert((*key).to_owned(), Value::String(value.to_owned()));
        }
    }

    match state
        .coordinator
        .start_execution(workflow_id, payload, &return_variables)
        .await
    {
        Ok(execution_id) => {
            info!(workflow_id = %workflow_id, execution_id = %execution_id, "Workflow triggered");
            let body = json!({
                "message": "Workflow execution started",
                "workflowId": workflow_id,
                "executionId": execution_id,
                "status": "INITIATED",
            });
            Ok((StatusCode::OK, Json(body)).into_response())
        }
        Err(EngineError::StartFailed { execution_id, message }) => {
            warn!(workflow_id = %workflow_id, error = %message, "Workflow failed to start");
            let mut body = json!({
                "error": message,
                "workflowId": workflow_id,
                "status": "FAILED",
            });
            if let Some(id) = execution_id {
                body["executionId"] = json!(id);
            }
            Ok((StatusCode::BAD_REQUEST, Json(body)).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

/// `GET /api/v1/executions/{id}`
pub async fn status(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<ExecutionContext>> {
    Ok(Json(state.coordinator.status(id).await?))
}

/// `GET /api/v1/executions/{id}/result`
pub async fn result(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<ExecutionResult>> {
    Ok(Json(state.coordinator.result(id).await?))
}

/// `DELETE /api/v1/executions/{id}`
pub async fn cancel(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.coordinator.cancel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
