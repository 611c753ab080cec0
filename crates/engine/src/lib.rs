//! `engine` crate — domain models, DAG validation, the distributed
//! coordinator and the node worker.

pub mod context_store;
pub mod coordinator;
pub mod dag;
pub mod error;
pub mod models;
pub mod worker;
pub mod workflow_store;

pub use context_store::{ContextStore, ContextStoreConfig};
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use dag::{validate_dag, DependencyGraph};
pub use error::EngineError;
pub use models::{
    ExecutionContext, ExecutionResult, ExecutionStatus, Workflow, WorkflowDefinition, WorkflowEdge,
    WorkflowNode,
};
pub use worker::{ExecutorConfig, NodeWorker};
pub use workflow_store::{InMemoryWorkflowStore, PgWorkflowStore, WorkflowDraft, WorkflowStore};
