//! Execution context store.
//!
//! All per-execution state lives in a TTL-bounded [`KvStore`] under
//! these keys:
//!
//! | key                               | value                         |
//! |-----------------------------------|-------------------------------|
//! | `context:<executionId>`           | [`ExecutionContext`]          |
//! | `dependencies:<executionId>`      | [`DependencyGraph`]           |
//! | `ready:<executionId>`             | node ids awaiting dispatch    |
//! | `definition:<executionId>`        | [`WorkflowDefinition`] snapshot |
//! | `return_vars:<executionId>`       | requested return variables    |
//! | `waiting:<workflowId>:<nodeId>`   | paused execution ids          |
//!
//! Read-modify-write cycles are optimistic: the entry's revision is checked
//! on write and the closure re-run on conflict, up to a bounded number of
//! attempts.
//!
//! The ready queue is a write-ahead journal: node ids are appended before the
//! graph update that marks them dispatched lands, and removed only once their
//! request is published. A queued id the graph no longer has in flight is
//! stale and dropped by whoever drains the queue.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use db::{DbError, KvStore};
use queue::Payload;

use crate::dag::DependencyGraph;
use crate::models::{ExecutionContext, WorkflowDefinition};
use crate::EngineError;

/// Tuning knobs for the context store.
#[derive(Debug, Clone)]
pub struct ContextStoreConfig {
    /// Attempts per optimistic update before giving up with
    /// [`EngineError::Contention`].
    pub max_cas_attempts: u32,
}

impl Default for ContextStoreConfig {
    fn default() -> Self {
        Self { max_cas_attempts: 16 }
    }
}

fn context_key(id: Uuid) -> String {
    format!("context:{id}")
}

fn graph_key(id: Uuid) -> String {
    format!("dependencies:{id}")
}

fn ready_key(id: Uuid) -> String {
    format!("ready:{id}")
}

fn definition_key(id: Uuid) -> String {
    format!("definition:{id}")
}

fn return_vars_key(id: Uuid) -> String {
    format!("return_vars:{id}")
}

fn waiting_key(workflow_id: Uuid, node_id: &str) -> String {
    format!("waiting:{workflow_id}:{node_id}")
}

#[derive(Clone)]
pub struct ContextStore {
    kv: Arc<dyn KvStore>,
    config: ContextStoreConfig,
}

impl ContextStore {
    pub fn new(kv: Arc<dyn KvStore>, config: ContextStoreConfig) -> Self {
        Self { kv, config }
    }

    // -----------------------------------------------------------------------
    // Typed primitives
    // -----------------------------------------------------------------------

    async fn read<S: DeserializeOwned>(&self, key: &str) -> Result<Option<S>, EngineError> {
        match self.kv.get(key).await? {
            Some(entry) => Ok(Some(serde_json::from_slice(&entry.value)?)),
            None => Ok(None),
        }
    }

    async fn write<S: Serialize + Sync>(&self, key: &str, value: &S) -> Result<(), EngineError> {
        self.kv.put(key, serde_json::to_vec(value)?).await?;
        Ok(())
    }

    /// Optimistic read-modify-write of an existing entry. `None` if the key
    /// is absent (expired or deleted).
    async fn modify<S, T, F>(&self, key: &str, mut f: F) -> Result<Option<T>, EngineError>
    where
        S: Serialize + DeserializeOwned + Send,
        F: FnMut(&mut S) -> T + Send,
        T: Send,
    {
        for attempt in 1..=self.config.max_cas_attempts {
            let Some(entry) = self.kv.get(key).await? else {
                return Ok(None);
            };
            let mut state: S = serde_json::from_slice(&entry.value)?;
            let out = f(&mut state);
            match self.kv.update(key, serde_json::to_vec(&state)?, entry.revision).await {
                Ok(_) => return Ok(Some(out)),
                Err(DbError::RevisionConflict { .. }) => {
                    debug!(key = %key, attempt, "Revision conflict, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!(key = %key, "Giving up after repeated revision conflicts");
        Err(EngineError::Contention(key.to_owned()))
    }

    /// Like [`modify`](Self::modify), starting from `S::default()` when the
    /// key is absent.
    async fn modify_or_create<S, F>(&self, key: &str, mut f: F) -> Result<(), EngineError>
    where
        S: Serialize + DeserializeOwned + Default + Send,
        F: FnMut(&mut S) + Send,
    {
        for attempt in 1..=self.config.max_cas_attempts {
            let written = match self.kv.get(key).await? {
                Some(entry) => {
                    let mut state: S = serde_json::from_slice(&entry.value)?;
                    f(&mut state);
                    self.kv.update(key, serde_json::to_vec(&state)?, entry.revision).await
                }
                None => {
                    let mut state = S::default();
                    f(&mut state);
                    self.kv.create(key, serde_json::to_vec(&state)?).await
                }
            };
            match written {
                Ok(_) => return Ok(()),
                Err(DbError::RevisionConflict { .. }) => {
                    debug!(key = %key, attempt, "Revision conflict, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Contention(key.to_owned()))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Persist a fresh execution: definition snapshot, ready queue, graph
    /// and context, in that order.
    pub async fn initialize(
        &self,
        ctx: &ExecutionContext,
        definition: &WorkflowDefinition,
        graph: &DependencyGraph,
        ready: &[String],
    ) -> Result<(), EngineError> {
        let id = ctx.execution_id;
        self.write(&definition_key(id), definition).await?;
        self.write(&ready_key(id), &ready).await?;
        self.write(&graph_key(id), graph).await?;
        self.write(&context_key(id), ctx).await?;
        Ok(())
    }

    /// Rewrite the write-once entries of an execution so they expire with
    /// its context rather than ahead of it.
    pub async fn refresh(&self, id: Uuid) -> Result<(), EngineError> {
        for key in [definition_key(id), return_vars_key(id)] {
            if let Some(entry) = self.kv.get(&key).await? {
                self.kv.put(&key, entry.value).await?;
            }
        }
        Ok(())
    }

    /// Remove every key of the execution. Returns whether it existed.
    pub async fn delete(&self, id: Uuid) -> Result<bool, EngineError> {
        let existed = self.kv.get(&context_key(id)).await?.is_some();
        for key in [
            context_key(id),
            graph_key(id),
            ready_key(id),
            definition_key(id),
            return_vars_key(id),
        ] {
            self.kv.delete(&key).await?;
        }
        Ok(existed)
    }

    // -----------------------------------------------------------------------
    // Context
    // -----------------------------------------------------------------------

    pub async fn get(&self, id: Uuid) -> Result<Option<ExecutionContext>, EngineError> {
        self.read(&context_key(id)).await
    }

    pub async fn update_context<T, F>(&self, id: Uuid, f: F) -> Result<Option<T>, EngineError>
    where
        F: FnMut(&mut ExecutionContext) -> T + Send,
        T: Send,
    {
        self.modify(&context_key(id), f).await
    }

    /// Merge a node's output into `nodeOutputs`, replacing any previous
    /// output for that node. Returns `false` if the execution is gone.
    pub async fn record_node_output(&self, id: Uuid, node_id: &str, output: &Payload) -> Result<bool, EngineError> {
        let updated = self
            .update_context(id, |ctx| {
                ctx.node_outputs.insert(node_id.to_owned(), output.clone());
            })
            .await?;
        Ok(updated.is_some())
    }

    /// Store `output` only if the node has none yet. Returns `true` if it
    /// was written.
    pub async fn record_first_output(&self, id: Uuid, node_id: &str, output: &Payload) -> Result<bool, EngineError> {
        let written = self
            .update_context(id, |ctx| {
                if ctx.node_outputs.contains_key(node_id) {
                    return false;
                }
                ctx.node_outputs.insert(node_id.to_owned(), output.clone());
                true
            })
            .await?;
        Ok(written.unwrap_or(false))
    }

    // -----------------------------------------------------------------------
    // Graph and definition
    // -----------------------------------------------------------------------

    pub async fn graph(&self, id: Uuid) -> Result<Option<DependencyGraph>, EngineError> {
        self.read(&graph_key(id)).await
    }

    /// The per-execution critical section for graph mutation.
    pub async fn update_graph<T, F>(&self, id: Uuid, f: F) -> Result<Option<T>, EngineError>
    where
        F: FnMut(&mut DependencyGraph) -> T + Send,
        T: Send,
    {
        self.modify(&graph_key(id), f).await
    }

    /// [`update_graph`](Self::update_graph) for transitions that make nodes
    /// ready. `f` returns its result plus the ids it marked dispatched; those
    /// are appended to the ready queue before the graph write is attempted,
    /// so a crash after the graph lands never loses them.
    pub async fn update_graph_and_queue<T, F>(&self, id: Uuid, mut f: F) -> Result<Option<T>, EngineError>
    where
        F: FnMut(&mut DependencyGraph) -> (T, Vec<String>) + Send,
        T: Send,
    {
        let key = graph_key(id);
        for attempt in 1..=self.config.max_cas_attempts {
            let Some(entry) = self.kv.get(&key).await? else {
                return Ok(None);
            };
            let mut graph: DependencyGraph = serde_json::from_slice(&entry.value)?;
            let (out, ready) = f(&mut graph);
            self.append_ready_nodes(id, &ready).await?;
            match self.kv.update(&key, serde_json::to_vec(&graph)?, entry.revision).await {
                Ok(_) => return Ok(Some(out)),
                Err(DbError::RevisionConflict { .. }) => {
                    debug!(key = %key, attempt, "Revision conflict, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!(key = %key, "Giving up after repeated revision conflicts");
        Err(EngineError::Contention(key))
    }

    /// Ids of every execution that still has a graph.
    pub async fn live_executions(&self) -> Result<Vec<Uuid>, EngineError> {
        Ok(self
            .kv
            .keys("dependencies:")
            .await?
            .iter()
            .filter_map(|key| key.strip_prefix("dependencies:"))
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect())
    }

    pub async fn definition(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, EngineError> {
        self.read(&definition_key(id)).await
    }

    // -----------------------------------------------------------------------
    // Ready queue
    // -----------------------------------------------------------------------

    pub async fn list_ready_nodes(&self, id: Uuid) -> Result<Vec<String>, EngineError> {
        Ok(self.read(&ready_key(id)).await?.unwrap_or_default())
    }

    pub async fn append_ready_nodes(&self, id: Uuid, nodes: &[String]) -> Result<(), EngineError> {
        if nodes.is_empty() {
            return Ok(());
        }
        self.modify_or_create(&ready_key(id), |queue: &mut Vec<String>| {
            for node in nodes {
                if !queue.contains(node) {
                    queue.push(node.clone());
                }
            }
        })
        .await
    }

    /// Acknowledge dispatched ids.
    pub async fn remove_ready_nodes(&self, id: Uuid, nodes: &[String]) -> Result<(), EngineError> {
        if nodes.is_empty() {
            return Ok(());
        }
        self.modify(&ready_key(id), |queue: &mut Vec<String>| {
            queue.retain(|n| !nodes.contains(n));
        })
        .await?;
        Ok(())
    }

    /// Executions whose ready queue is non-empty.
    pub async fn pending_dispatches(&self) -> Result<Vec<Uuid>, EngineError> {
        let mut pending = Vec::new();
        for key in self.kv.keys("ready:").await? {
            let Some(id) = key.strip_prefix("ready:").and_then(|s| Uuid::parse_str(s).ok()) else {
                continue;
            };
            if !self.list_ready_nodes(id).await?.is_empty() {
                pending.push(id);
            }
        }
        Ok(pending)
    }

    // -----------------------------------------------------------------------
    // Return variables
    // -----------------------------------------------------------------------

    pub async fn set_return_variables(&self, id: Uuid, names: &[String]) -> Result<(), EngineError> {
        self.write(&return_vars_key(id), &names).await
    }

    pub async fn return_variables(&self, id: Uuid) -> Result<Vec<String>, EngineError> {
        Ok(self.read(&return_vars_key(id)).await?.unwrap_or_default())
    }

    // -----------------------------------------------------------------------
    // Waiting index
    // -----------------------------------------------------------------------

    pub async fn add_waiting(&self, workflow_id: Uuid, node_id: &str, id: Uuid) -> Result<(), EngineError> {
        self.modify_or_create(&waiting_key(workflow_id, node_id), |ids: &mut Vec<Uuid>| {
            if !ids.contains(&id) {
                ids.push(id);
            }
        })
        .await
    }

    pub async fn remove_waiting(&self, workflow_id: Uuid, node_id: &str, id: Uuid) -> Result<(), EngineError> {
        self.modify(&waiting_key(workflow_id, node_id), |ids: &mut Vec<Uuid>| {
            ids.retain(|x| *x != id);
        })
        .await?;
        Ok(())
    }

    pub async fn waiting_executions(&self, workflow_id: Uuid, node_id: &str) -> Result<Vec<Uuid>, EngineError> {
        Ok(self.read(&waiting_key(workflow_id, node_id)).await?.unwrap_or_default())
    }
}
