//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the workflow engine (validation, coordination, storage).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        node_id: String,
        side: &'static str,
    },

    /// Topological sort detected a cycle.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    /// The stored workflow document could not be parsed.
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    // ------ Coordination errors ------

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    /// The execution could not be started; the trigger reports it as FAILED.
    #[error("execution failed to start: {message}")]
    StartFailed {
        execution_id: Option<Uuid>,
        message: String,
    },

    /// An optimistic update kept losing races and gave up.
    #[error("too many concurrent updates on '{0}'")]
    Contention(String),

    /// A trigger arrived for a node whose wait has been indexed but not yet
    /// recorded in the graph. Retrying later succeeds.
    #[error("node '{node_id}' of execution {execution_id} is not parked yet")]
    NotYetWaiting { execution_id: Uuid, node_id: String },

    // ------ Infrastructure errors ------

    /// Persistence error from the db crate.
    #[error("store error: {0}")]
    Store(#[from] db::DbError),

    /// Broker error from the queue crate.
    #[error("transport error: {0}")]
    Transport(#[from] queue::QueueError),

    /// A stored entry could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
