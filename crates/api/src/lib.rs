//! `api` crate — HTTP REST API layer.
//!
//! Exposes:
//!   GET    /healthz
//!   GET    /api/v1/workflows
//!   POST   /api/v1/workflows
//!   GET    /api/v1/workflows/{id}
//!   PUT    /api/v1/workflows/{id}
//!   DELETE /api/v1/workflows/{id}
//!   POST   /api/v1/workflows/{id}/run
//!   POST   /api/v1/triggers/{workflow_id}/{node_id}
//!   GET    /api/v1/executions/{id}
//!   GET    /api/v1/executions/{id}/result
//!   DELETE /api/v1/executions/{id}

pub mod error;
pub mod handlers;
pub mod state;

use std::future::Future;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use handlers::{executions, triggers, workflows};

pub use error::{ApiError, ApiResult};
pub use state::AppState;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/workflows", get(workflows::list).post(workflows::create))
        .route(
            "/workflows/{id}",
            get(workflows::get).put(workflows::update).delete(workflows::delete),
        )
        .route("/workflows/{id}/run", post(executions::run))
        .route("/triggers/{workflow_id}/{node_id}", post(triggers::fire))
        .route("/executions/{id}", get(executions::status).delete(executions::cancel))
        .route("/executions/{id}/result", get(executions::result));

    Router::new()
        .route("/healthz", get(health_check))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API on `bind` until `shutdown` resolves.
pub async fn serve(
    bind: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_check() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use db::InMemoryKvStore;
    use engine::{ContextStore, ContextStoreConfig, Coordinator, CoordinatorConfig, InMemoryWorkflowStore};
    use queue::{InMemoryBroker, NodeExecutionMessage, Producer, Topic, WorkflowEvent};

    struct Fixture {
        router: Router,
        broker: Arc<InMemoryBroker>,
    }

    fn fixture() -> Fixture {
        let broker = Arc::new(InMemoryBroker::new());
        let store = ContextStore::new(
            Arc::new(InMemoryKvStore::new(Duration::from_secs(3600))),
            ContextStoreConfig::default(),
        );
        let coordinator = Coordinator::new(
            Arc::new(InMemoryWorkflowStore::new()),
            store,
            Producer::new(broker.clone()),
            CoordinatorConfig::default(),
        );
        Fixture { router: router(AppState::new(Arc::new(coordinator))), broker }
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = router.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, value)
    }

    fn linear_workflow() -> Value {
        json!({
            "name": "linear",
            "definition": {
                "nodes": [
                    { "id": "start", "type": "start", "data": {} },
                    { "id": "transform", "type": "transform", "data": { "mapping": { "y": "x" } } }
                ],
                "edges": [ { "source": "start", "target": "transform" } ]
            }
        })
    }

    #[tokio::test]
    async fn health_check_responds() {
        let f = fixture();
        let (status, body) = send(&f.router, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn workflow_crud_round_trip() {
        let f = fixture();

        let (status, created) = send(&f.router, "POST", "/api/v1/workflows", Some(linear_workflow())).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_owned();
        assert_eq!(created["status"], "DRAFT");

        let (status, listed) = send(&f.router, "GET", "/api/v1/workflows", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let mut renamed = linear_workflow();
        renamed["name"] = json!("renamed");
        let (status, updated) = send(&f.router, "PUT", &format!("/api/v1/workflows/{id}"), Some(renamed)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["name"], "renamed");

        let (status, _) = send(&f.router, "DELETE", &format!("/api/v1/workflows/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = send(&f.router, "GET", &format!("/api/v1/workflows/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);
    }

    #[tokio::test]
    async fn cyclic_workflows_are_rejected() {
        let f = fixture();
        let cyclic = json!({
            "name": "loop",
            "workflowData": {
                "nodes": [ { "id": "a", "type": "transform" }, { "id": "b", "type": "transform" } ],
                "edges": [ { "source": "a", "target": "b" }, { "source": "b", "target": "a" } ]
            }
        });
        let (status, body) = send(&f.router, "POST", "/api/v1/workflows", Some(cyclic)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("cycle"));
    }

    #[tokio::test]
    async fn run_dispatches_roots_and_forwards_headers() {
        let f = fixture();
        let (_, created) = send(&f.router, "POST", "/api/v1/workflows", Some(linear_workflow())).await;
        let id = created["id"].as_str().unwrap();

        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/v1/workflows/{id}/run"))
            .header("content-type", "application/json")
            .header("X-User-Email", "ada@example.com")
            .body(Body::from(json!({ "x": 5, "returnVariables": ["y"] }).to_string()))
            .unwrap();
        let response = f.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body["status"], "INITIATED");
        let execution_id = body["executionId"].as_str().unwrap().to_owned();

        let queued = f.broker.drain(Topic::LightweightNodes);
        assert_eq!(queued.len(), 1);
        let dispatched: NodeExecutionMessage = queued[0].decode().unwrap();
        assert_eq!(dispatched.node_id, "start");
        assert_eq!(dispatched.context["x"], 5);
        assert_eq!(dispatched.context["user_email"], "ada@example.com");
        assert!(dispatched.context.get("returnVariables").is_none());

        let (status, ctx) = send(&f.router, "GET", &format!("/api/v1/executions/{execution_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ctx["status"], "RUNNING");

        let (status, result) = send(&f.router, "GET", &format!("/api/v1/executions/{execution_id}/result"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["requestedVariables"], json!(["y"]));

        let (status, _) = send(&f.router, "DELETE", &format!("/api/v1/executions/{execution_id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&f.router, "GET", &format!("/api/v1/executions/{execution_id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn run_reports_synchronous_start_failures() {
        let f = fixture();
        let empty = json!({ "name": "empty", "definition": { "nodes": [], "edges": [] } });
        let (_, created) = send(&f.router, "POST", "/api/v1/workflows", Some(empty)).await;
        let id = created["id"].as_str().unwrap();

        let (status, body) = send(&f.router, "POST", &format!("/api/v1/workflows/{id}/run"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "FAILED");
        assert!(body["executionId"].is_string());

        let missing = Uuid::new_v4();
        let (status, _) = send(&f.router, "POST", &format!("/api/v1/workflows/{missing}/run"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn triggers_always_succeed_and_publish_an_event() {
        let f = fixture();
        let workflow_id = Uuid::new_v4();
        let uri = format!("/api/v1/triggers/{workflow_id}/approval");

        let (status, body) = send(&f.router, "POST", &uri, Some(json!({ "approved": true }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodeId"], "approval");

        let request = Request::builder().method("POST").uri(&uri).body(Body::from("not json")).unwrap();
        let response = f.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let events: Vec<WorkflowEvent> = f
            .broker
            .drain(Topic::WorkflowEvents)
            .iter()
            .map(|d| d.decode().unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        match &events[0] {
            WorkflowEvent::WebhookTriggered { node_id, input, execution_id, .. } => {
                assert_eq!(node_id, "approval");
                assert_eq!(input["approved"], true);
                assert!(execution_id.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
        match &events[1] {
            WorkflowEvent::WebhookTriggered { input, .. } => assert_eq!(input["raw"], "not json"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
