//! Workflow CRUD operations.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::{NewWorkflow, WorkflowRow}};

const COLUMNS: &str = "id, owner_id, name, description, workflow_data, status, \
                       is_active, created_at, updated_at, version";

/// Insert a new workflow into the database.
///
/// `workflow_data` must be a JSON object with `nodes` and `edges`; the caller
/// validates it before it gets here.
pub async fn create_workflow(pool: &PgPool, new: &NewWorkflow) -> Result<WorkflowRow, DbError> {
    let now = Utc::now();

    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        r#"
        INSERT INTO workflows
            (id, owner_id, name, description, workflow_data, status, is_active, created_at, updated_at, version)
        VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $7, 0)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(new.owner_id)
    .bind(&new.name)
    .bind(&new.description)
    .bind(&new.workflow_data)
    .bind(new.status.to_string())
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {COLUMNS} FROM workflows WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Return workflows ordered by last update (newest first), optionally
/// restricted to one owner.
pub async fn list_workflows(pool: &PgPool, owner_id: Option<Uuid>) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {COLUMNS} FROM workflows \
         WHERE ($1::uuid IS NULL OR owner_id = $1) \
         ORDER BY updated_at DESC"
    ))
    .bind(owner_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Replace a workflow's definition and metadata, bumping its version.
pub async fn update_workflow(
    pool: &PgPool,
    id: Uuid,
    new: &NewWorkflow,
) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        r#"
        UPDATE workflows
        SET name = $2, description = $3, workflow_data = $4, status = $5,
            updated_at = $6, version = version + 1
        WHERE id = $1
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&new.name)
    .bind(&new.description)
    .bind(&new.workflow_data)
    .bind(new.status.to_string())
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Permanently delete a workflow by its primary key.
///
/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_workflow(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
