use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use db::models::WorkflowStatus;
use engine::{validate_dag, Workflow, WorkflowDefinition, WorkflowDraft};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
    /// The graph document; editors send it as `workflowData`.
    #[serde(alias = "workflowData")]
    pub definition: WorkflowDefinition,
}

impl WorkflowRequest {
    /// Reject unnamed workflows and invalid graphs.
    fn into_draft(self) -> ApiResult<WorkflowDraft> {
        if self.name.trim().is_empty() {
            return Err(ApiError::BadRequest("workflow name is required".into()));
        }
        validate_dag(&self.definition)?;
        Ok(WorkflowDraft {
            owner_id: self.owner_id.unwrap_or_else(Uuid::nil),
            name: self.name,
            description: self.description,
            definition: self.definition,
            status: self.status.unwrap_or(WorkflowStatus::Draft),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub owner_id: Option<Uuid>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Workflow>>> {
    Ok(Json(state.workflows().list(query.owner_id).await?))
}

pub async fn get(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<Workflow>> {
    state
        .workflows()
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| engine::EngineError::WorkflowNotFound(id).into())
}

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<WorkflowRequest>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    let workflow = state.workflows().create(request.into_draft()?).await?;
    info!(workflow_id = %workflow.id, name = %workflow.name, "Workflow created");
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn update(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<WorkflowRequest>,
) -> ApiResult<Json<Workflow>> {
    let workflow = state.workflows().update(id, request.into_draft()?).await?;
    info!(workflow_id = %id, version = workflow.version, "Workflow updated");
    Ok(Json(workflow))
}

pub async fn delete(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<StatusCode> {
    if state.workflows().delete(id).await? {
        info!(workflow_id = %id, "Workflow deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(engine::EngineError::WorkflowNotFound(id).into())
    }
}
