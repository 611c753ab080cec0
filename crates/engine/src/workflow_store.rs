//! Read/write access to stored workflows.
//!
//! The coordinator only needs [`WorkflowStore::get`]; the HTTP surface uses
//! the rest. [`PgWorkflowStore`] delegates to the `db` repository functions,
//! [`InMemoryWorkflowStore`] backs tests and the single-process mode.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use db::models::{NewWorkflow, WorkflowStatus};
use db::repository::workflows as repo;
use db::{DbError, DbPool};

use crate::models::{Workflow, WorkflowDefinition};
use crate::EngineError;

/// Fields a caller supplies when creating or replacing a workflow.
#[derive(Debug, Clone)]
pub struct WorkflowDraft {
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub definition: WorkflowDefinition,
    pub status: WorkflowStatus,
}

impl WorkflowDraft {
    fn to_row(&self) -> Result<NewWorkflow, EngineError> {
        Ok(NewWorkflow {
            owner_id: self.owner_id,
            name: self.name.clone(),
            description: self.description.clone(),
            workflow_data: serde_json::to_value(&self.definition)?,
            status: self.status,
        })
    }
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// `None` if no workflow has this id.
    async fn get(&self, id: Uuid) -> Result<Option<Workflow>, EngineError>;

    /// Newest first, optionally restricted to one owner.
    async fn list(&self, owner_id: Option<Uuid>) -> Result<Vec<Workflow>, EngineError>;

    async fn create(&self, draft: WorkflowDraft) -> Result<Workflow, EngineError>;

    /// Replace an existing workflow, bumping its version.
    async fn update(&self, id: Uuid, draft: WorkflowDraft) -> Result<Workflow, EngineError>;

    /// Returns whether a workflow was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, EngineError>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

pub struct PgWorkflowStore {
    pool: DbPool,
}

impl PgWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn get(&self, id: Uuid) -> Result<Option<Workflow>, EngineError> {
        match repo::get_workflow(&self.pool, id).await {
            Ok(row) => Ok(Some(Workflow::try_from(row)?)),
            Err(DbError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, owner_id: Option<Uuid>) -> Result<Vec<Workflow>, EngineError> {
        repo::list_workflows(&self.pool, owner_id)
            .await?
            .into_iter()
            .map(Workflow::try_from)
            .collect()
    }

    async fn create(&self, draft: WorkflowDraft) -> Result<Workflow, EngineError> {
        let row = repo::create_workflow(&self.pool, &draft.to_row()?).await?;
        Workflow::try_from(row)
    }

    async fn update(&self, id: Uuid, draft: WorkflowDraft) -> Result<Workflow, EngineError> {
        match repo::update_workflow(&self.pool, id, &draft.to_row()?).await {
            Ok(row) => Workflow::try_from(row),
            Err(DbError::NotFound) => Err(EngineError::WorkflowNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, EngineError> {
        match repo::delete_workflow(&self.pool, id).await {
            Ok(()) => Ok(true),
            Err(DbError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: Mutex<HashMap<Uuid, Workflow>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `workflow` as-is, keeping its id.
    pub fn insert(&self, workflow: Workflow) {
        self.lock().insert(workflow.id, workflow);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Workflow>> {
        self.workflows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn get(&self, id: Uuid) -> Result<Option<Workflow>, EngineError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn list(&self, owner_id: Option<Uuid>) -> Result<Vec<Workflow>, EngineError> {
        let mut all: Vec<Workflow> = self
            .lock()
            .values()
            .filter(|w| owner_id.is_none_or(|o| w.owner_id == o))
            .cloned()
            .collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }

    async fn create(&self, draft: WorkflowDraft) -> Result<Workflow, EngineError> {
        let now = Utc::now();
        let workflow = Workflow {
            id: Uuid::new_v4(),
            owner_id: draft.owner_id,
            name: draft.name,
            description: draft.description,
            definition: draft.definition,
            status: draft.status,
            is_active: true,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        self.insert(workflow.clone());
        Ok(workflow)
    }

    async fn update(&self, id: Uuid, draft: WorkflowDraft) -> Result<Workflow, EngineError> {
        let mut workflows = self.lock();
        let existing = workflows.get_mut(&id).ok_or(EngineError::WorkflowNotFound(id))?;
        existing.name = draft.name;
        existing.description = draft.description;
        existing.definition = draft.definition;
        existing.status = draft.status;
        existing.updated_at = Utc::now();
        existing.version += 1;
        Ok(existing.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, EngineError> {
        Ok(self.lock().remove(&id).is_some())
    }
}
