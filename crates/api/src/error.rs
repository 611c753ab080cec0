//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use engine::EngineError;

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request body or parameters.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Anything the engine reports.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(e) => match e {
                EngineError::WorkflowNotFound(_) | EngineError::ExecutionNotFound(_) => StatusCode::NOT_FOUND,
                EngineError::DuplicateNodeId(_)
                | EngineError::UnknownNodeReference { .. }
                | EngineError::CycleDetected
                | EngineError::InvalidDefinition(_) => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::StartFailed { .. } => StatusCode::BAD_REQUEST,
                EngineError::Contention(_) | EngineError::NotYetWaiting { .. } => StatusCode::CONFLICT,
                EngineError::Store(_) | EngineError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
