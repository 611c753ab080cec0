//! Distributed workflow coordinator.
//!
//! The coordinator owns every state transition of an execution:
//! 1. On trigger it snapshots the definition, builds the dependency graph,
//!    persists the context and dispatches the root nodes.
//! 2. On each node completion it merges the output into the context, updates
//!    the graph inside an optimistic critical section and dispatches
//!    whatever became ready. Newly ready nodes are journaled in the ready
//!    queue before the graph update lands; a redelivered completion, or
//!    [`Coordinator::recover`], drains whatever a failed attempt left there.
//! 3. After every step it settles the execution status from the graph:
//!    RUNNING while nodes are in flight, PAUSED while only external waits
//!    remain, COMPLETED once every node is resolved, FAILED otherwise.
//!
//! Nodes never run here; workers consume the dispatch topics and report
//! back on the completion topic. Any number of coordinator replicas may
//! share one context store.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use queue::{
    CompletionStatus, Delivery, NodeCompletionMessage, NodeExecutionMessage, Payload, Producer,
    Topic, WorkflowEvent, AWAITING_INPUT_KEY,
};

use crate::context_store::ContextStore;
use crate::dag::{carried_value, edge_carries, validate_dag, DependencyGraph};
use crate::models::{ExecutionContext, ExecutionResult, ExecutionStatus, WorkflowDefinition};
use crate::workflow_store::WorkflowStore;
use crate::EngineError;

/// Trigger payload key naming the variables to return from the execution.
pub const RETURN_VARIABLES_KEY: &str = "returnVariables";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Durable consumer name on the completion topic, shared by replicas.
    pub completion_consumer: String,
    /// Durable consumer name on the workflow-events topic.
    pub event_consumer: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            completion_consumer: "coordinator-completions".into(),
            event_consumer: "coordinator-events".into(),
        }
    }
}

/// Remove `returnVariables` from a trigger payload. Accepts an array of
/// names or a comma-separated string.
pub fn take_return_variables(payload: &mut Payload) -> Vec<String> {
    match payload.remove(RETURN_VARIABLES_KEY) {
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .collect(),
        Some(Value::String(list)) => list
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}

/// Input handed to `node_id` when it is dispatched.
///
/// Starts from the global variables, overlays the outputs of every completed
/// ancestor (furthest first), then the outputs carried by the node's own
/// incoming edges in edge order. Edges with a named target handle also store
/// the carried value under that key.
pub fn merged_input(
    ctx: &ExecutionContext,
    graph: &DependencyGraph,
    definition: &WorkflowDefinition,
    node_id: &str,
) -> Payload {
    let mut input = ctx.global_variables.clone();

    for ancestor in graph.ancestors_in_order(node_id) {
        if !graph.completed_nodes.contains(&ancestor) {
            continue;
        }
        if let Some(output) = ctx.node_outputs.get(&ancestor) {
            input.extend(output.clone());
        }
    }

    for edge in definition.incoming(node_id) {
        let status = if graph.completed_nodes.contains(&edge.source) {
            CompletionStatus::Completed
        } else if graph.failed_nodes.contains(&edge.source) {
            CompletionStatus::Failed
        } else {
            continue;
        };
        let Some(output) = ctx.node_outputs.get(&edge.source) else {
            continue;
        };
        if !edge_carries(edge, status, output) {
            continue;
        }
        input.extend(output.clone());

        let value = carried_value(edge, output);
        if edge.named_source_handle().is_some() {
            if let Value::Object(fields) = &value {
                input.extend(fields.clone());
            }
        }
        if let Some(key) = edge.named_target_handle() {
            input.insert(key.to_owned(), value);
        }
    }
    input
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => true,
    }
}

/// What a completion did to the graph.
enum Step {
    /// Already resolved or waiting. `failed` marks a node that failed the
    /// execution.
    Duplicate { waiting: bool, failed: bool },
    /// Not a node of this execution.
    Unknown,
    /// Parked until an external trigger resumes it.
    Paused,
    /// Failed with no error edge to follow.
    Failed,
    /// Recorded; these nodes became ready.
    Advanced(Vec<String>),
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator {
    workflows: Arc<dyn WorkflowStore>,
    store: ContextStore,
    producer: Producer,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        store: ContextStore,
        producer: Producer,
        config: CoordinatorConfig,
    ) -> Self {
        Self { workflows, store, producer, config }
    }

    pub fn workflows(&self) -> &Arc<dyn WorkflowStore> {
        &self.workflows
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    /// Start a new execution of a stored workflow with `payload` as its
    /// global variables.
    ///
    /// # Errors
    /// [`EngineError::WorkflowNotFound`] for an unknown id and
    /// [`EngineError::StartFailed`] when no root node could be dispatched.
    #[instrument(skip(self, payload, return_variables), fields(workflow_id = %workflow_id))]
    pub async fn start_execution(
        &self,
        workflow_id: Uuid,
        payload: Payload,
        return_variables: &[String],
    ) -> Result<Uuid, EngineError> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;
        self.launch(workflow_id, &workflow.definition, payload, return_variables, None)
            .await
    }

    /// Start an execution of an unsaved definition.
    pub async fn start_with_definition(
        &self,
        workflow_id: Uuid,
        definition: &WorkflowDefinition,
        payload: Payload,
        return_variables: &[String],
    ) -> Result<Uuid, EngineError> {
        self.launch(workflow_id, definition, payload, return_variables, None)
            .await
    }

    /// Create and persist an execution, then dispatch its roots. A `fired`
    /// root is completed immediately with the payload as its output instead
    /// of being dispatched.
    async fn launch(
        &self,
        workflow_id: Uuid,
        definition: &WorkflowDefinition,
        payload: Payload,
        return_variables: &[String],
        fired: Option<&str>,
    ) -> Result<Uuid, EngineError> {
        let execution_id = Uuid::new_v4();
        let mut graph = DependencyGraph::build(definition);
        let roots = graph.initial_ready();
        let mut ctx = ExecutionContext::new(execution_id, workflow_id, payload.clone());

        // Cycles are left to surface at run time as a stall.
        let rejection = match validate_dag(definition) {
            Err(e) if !matches!(e, EngineError::CycleDetected) => Some(e.to_string()),
            _ if definition.nodes.is_empty() => Some("workflow has no nodes".to_owned()),
            _ if roots.is_empty() => Some("workflow has no start node: every node has an incoming edge".to_owned()),
            _ => None,
        };
        if let Some(message) = rejection {
            warn!(execution_id = %execution_id, error = %message, "Execution failed to start");
            ctx.fail(message.clone(), None);
            self.store.initialize(&ctx, definition, &graph, &[]).await?;
            return Err(EngineError::StartFailed { execution_id: Some(execution_id), message });
        }

        graph.mark_dispatched(&roots);
        let (fired_roots, others): (Vec<String>, Vec<String>) =
            roots.iter().cloned().partition(|r| Some(r.as_str()) == fired);
        self.store.initialize(&ctx, definition, &graph, &others).await?;
        if !return_variables.is_empty() {
            self.store.set_return_variables(execution_id, return_variables).await?;
        }
        info!(execution_id = %execution_id, workflow_id = %workflow_id, roots = ?roots, "Execution started");

        let sent = self.dispatch(execution_id, definition, &others).await?;

        if let Some(root) = fired_roots.first() {
            self.complete_node(execution_id, definition, root, &payload, false).await?;
        } else if sent == 0 {
            let message = "no start node could be dispatched".to_owned();
            self.store
                .update_context(execution_id, |ctx| ctx.fail(message.clone(), None))
                .await?;
            return Err(EngineError::StartFailed { execution_id: Some(execution_id), message });
        }
        Ok(execution_id)
    }

    /// React to a control event from the workflow-events topic.
    pub async fn handle_event(&self, event: &WorkflowEvent) -> Result<(), EngineError> {
        match event {
            WorkflowEvent::Run { workflow_id, payload } => {
                let mut payload = payload.clone();
                let return_variables = take_return_variables(&mut payload);
                match self.start_execution(*workflow_id, payload, &return_variables).await {
                    Ok(id) => info!(workflow_id = %workflow_id, execution_id = %id, "Run event started execution"),
                    Err(e @ (EngineError::WorkflowNotFound(_) | EngineError::StartFailed { .. })) => {
                        warn!(workflow_id = %workflow_id, error = %e, "Run event rejected");
                    }
                    Err(e) => return Err(e),
                }
            }
            WorkflowEvent::WebhookTriggered { workflow_id, node_id, input, execution_id } => {
                self.resume(*workflow_id, node_id, input.clone(), *execution_id).await?;
            }
        }
        Ok(())
    }

    /// Deliver an external trigger for `node_id`.
    ///
    /// Targets `execution_id` if given, otherwise every execution waiting on
    /// the node. Each target continues as if the node had completed with
    /// `input` as its output. When nothing waits and the node is a root of
    /// the workflow, a new execution is started from it instead.
    ///
    /// Returns the executions that were resumed or started.
    #[instrument(skip(self, input), fields(workflow_id = %workflow_id, node_id = %node_id))]
    pub async fn resume(
        &self,
        workflow_id: Uuid,
        node_id: &str,
        input: Payload,
        execution_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, EngineError> {
        let targets = match execution_id {
            Some(id) => vec![id],
            None => self.store.waiting_executions(workflow_id, node_id).await?,
        };

        let mut resumed = Vec::new();
        for id in targets {
            if self.resume_one(workflow_id, id, node_id, &input).await? {
                resumed.push(id);
            }
        }

        if resumed.is_empty() && execution_id.is_none() {
            if let Some(workflow) = self.workflows.get(workflow_id).await? {
                if workflow.definition.is_root(node_id) {
                    info!("No execution waiting, starting one from the trigger node");
                    let id = self
                        .launch(workflow_id, &workflow.definition, input, &[], Some(node_id))
                        .await?;
                    resumed.push(id);
                }
            }
        }

        if resumed.is_empty() {
            warn!("Trigger matched no waiting execution");
        }
        Ok(resumed)
    }

    /// Resume one execution parked on `node_id`.
    ///
    /// # Errors
    /// [`EngineError::NotYetWaiting`] when the execution is indexed as
    /// waiting on `node_id` but its wait completion has not reached the
    /// graph yet. The index entry is kept so a redelivered trigger succeeds.
    async fn resume_one(
        &self,
        workflow_id: Uuid,
        execution_id: Uuid,
        node_id: &str,
        input: &Payload,
    ) -> Result<bool, EngineError> {
        let live = matches!(self.store.get(execution_id).await?, Some(ctx) if !ctx.status.is_terminal());
        let definition = self.store.definition(execution_id).await?;
        let resumed = match (live, definition) {
            (true, Some(definition)) => {
                self.complete_node(execution_id, &definition, node_id, input, true)
                    .await?
            }
            _ => false,
        };
        if live && !resumed && self.parking(workflow_id, execution_id, node_id).await? {
            warn!(execution_id = %execution_id, "Trigger arrived before the wait was recorded");
            return Err(EngineError::NotYetWaiting { execution_id, node_id: node_id.to_owned() });
        }
        self.store.remove_waiting(workflow_id, node_id, execution_id).await?;
        if resumed {
            info!(execution_id = %execution_id, "Execution resumed");
        }
        Ok(resumed)
    }

    /// Indexed as waiting on `node_id` while the graph still has the node in
    /// flight.
    async fn parking(&self, workflow_id: Uuid, execution_id: Uuid, node_id: &str) -> Result<bool, EngineError> {
        let in_flight = matches!(
            self.store.graph(execution_id).await?,
            Some(graph) if graph.dispatched_nodes.contains(node_id)
        );
        Ok(in_flight
            && self
                .store
                .waiting_executions(workflow_id, node_id)
                .await?
                .contains(&execution_id))
    }

    /// Complete `node_id` with `output` on behalf of the outside world.
    async fn complete_node(
        &self,
        execution_id: Uuid,
        definition: &WorkflowDefinition,
        node_id: &str,
        output: &Payload,
        require_waiting: bool,
    ) -> Result<bool, EngineError> {
        let eligible = |graph: &DependencyGraph| {
            graph.contains(node_id)
                && !graph.is_resolved(node_id)
                && (!require_waiting || graph.waiting_nodes.contains(node_id))
        };
        match self.store.graph(execution_id).await? {
            Some(graph) if eligible(&graph) => {}
            _ => return Ok(false),
        }

        self.store.record_node_output(execution_id, node_id, output).await?;
        let ready = self
            .store
            .update_graph_and_queue(execution_id, |graph| {
                if !eligible(graph) {
                    return (None, Vec::new());
                }
                let ready = graph.apply_completion(definition, node_id, CompletionStatus::Completed, output);
                (Some(ready.clone()), ready)
            })
            .await?
            .flatten();
        let Some(ready) = ready else {
            return Ok(false);
        };

        self.store.refresh(execution_id).await?;
        self.dispatch(execution_id, definition, &ready).await?;
        self.settle(execution_id).await?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Completions
    // -----------------------------------------------------------------------

    /// Fold one node completion into its execution.
    ///
    /// Completions for unknown or finished executions are discarded. A
    /// duplicate re-merges its output (a wait marker never replaces an
    /// existing output) and re-drives whatever an earlier delivery of it left
    /// undone.
    #[instrument(skip(self, msg), fields(execution_id = %msg.execution_id, node_id = %msg.node_id))]
    pub async fn handle_completion(&self, msg: &NodeCompletionMessage) -> Result<(), EngineError> {
        let execution_id = msg.execution_id;
        let ctx = match self.store.get(execution_id).await? {
            Some(ctx) if !ctx.status.is_terminal() => ctx,
            Some(ctx) => {
                debug!(status = %ctx.status, "Discarding completion for finished execution");
                return Ok(());
            }
            None => {
                warn!("Discarding completion for unknown execution");
                return Ok(());
            }
        };
        let Some(definition) = self.store.definition(execution_id).await? else {
            error!("Execution definition expired, failing execution");
            self.fail_execution(execution_id, "execution definition expired".to_owned(), None)
                .await?;
            return Ok(());
        };

        let node_id = msg.node_id.as_str();
        if definition.node(node_id).is_none() {
            warn!("Discarding completion for a node outside the workflow");
            return Ok(());
        }
        let awaiting = msg.status == CompletionStatus::Completed
            && msg.output.get(AWAITING_INPUT_KEY).is_some_and(is_truthy);
        let has_error_edge = definition
            .outgoing(node_id)
            .any(|e| e.named_source_handle() == Some("error"));

        // Output and waiting index land before the graph marks the node
        // resolved or parked.
        if awaiting {
            self.store.record_first_output(execution_id, node_id, &msg.output).await?;
            self.store.add_waiting(ctx.workflow_id, node_id, execution_id).await?;
        } else {
            self.store.record_node_output(execution_id, node_id, &msg.output).await?;
        }

        let step = self
            .store
            .update_graph_and_queue(execution_id, |graph| {
                if !graph.contains(node_id) {
                    return (Step::Unknown, Vec::new());
                }
                if graph.is_resolved(node_id) || graph.waiting_nodes.contains(node_id) {
                    let step = Step::Duplicate {
                        waiting: graph.waiting_nodes.contains(node_id),
                        failed: graph.failed_nodes.contains(node_id) && !has_error_edge,
                    };
                    return (step, Vec::new());
                }
                if awaiting {
                    graph.mark_waiting(node_id);
                    return (Step::Paused, Vec::new());
                }
                if msg.status == CompletionStatus::Failed && !has_error_edge {
                    graph.dispatched_nodes.remove(node_id);
                    graph.failed_nodes.insert(node_id.to_owned());
                    return (Step::Failed, Vec::new());
                }
                let ready = graph.apply_completion(&definition, node_id, msg.status, &msg.output);
                (Step::Advanced(ready.clone()), ready)
            })
            .await?;

        let step = match step {
            None => {
                warn!("Execution expired while processing completion");
                return Ok(());
            }
            Some(Step::Unknown) => {
                warn!("Discarding completion for a node outside the execution graph");
                return Ok(());
            }
            Some(step) => step,
        };
        self.store.refresh(execution_id).await?;

        match step {
            Step::Duplicate { failed: true, .. } => {
                debug!("Duplicate completion of a failed node, re-applying the failure");
                self.fail_execution(execution_id, failure_message(msg), Some(node_id))
                    .await?;
            }
            Step::Duplicate { waiting, .. } => {
                if awaiting && !waiting {
                    self.store.remove_waiting(ctx.workflow_id, node_id, execution_id).await?;
                }
                let queued = self.store.list_ready_nodes(execution_id).await?;
                let sent = self.dispatch(execution_id, &definition, &queued).await?;
                debug!(redispatched = sent, "Duplicate completion, pending work re-driven");
                self.settle(execution_id).await?;
            }
            Step::Paused => {
                info!("Node is waiting for external input");
                self.settle(execution_id).await?;
            }
            Step::Failed => {
                let message = failure_message(msg);
                error!(error = %message, "Node failed with no error path, failing execution");
                self.fail_execution(execution_id, message, Some(node_id)).await?;
            }
            Step::Advanced(ready) => {
                debug!(status = ?msg.status, ready = ?ready, "Completion applied");
                self.dispatch(execution_id, &definition, &ready).await?;
                self.settle(execution_id).await?;
            }
            Step::Unknown => {}
        }
        Ok(())
    }

    async fn fail_execution(
        &self,
        execution_id: Uuid,
        message: String,
        node_id: Option<&str>,
    ) -> Result<(), EngineError> {
        self.store
            .update_context(execution_id, |ctx| {
                if !ctx.status.is_terminal() {
                    ctx.fail(message.clone(), node_id);
                }
            })
            .await?;
        Ok(())
    }

    /// Publish one execution request per queued node and acknowledge it in
    /// the ready queue. Queued nodes the graph no longer has in flight are
    /// acknowledged unpublished; nodes whose publish fails stay queued for
    /// [`recover`](Self::recover).
    ///
    /// Returns the number of nodes published.
    async fn dispatch(
        &self,
        execution_id: Uuid,
        definition: &WorkflowDefinition,
        nodes: &[String],
    ) -> Result<usize, EngineError> {
        if nodes.is_empty() {
            return Ok(0);
        }
        let (Some(ctx), Some(graph)) = (
            self.store.get(execution_id).await?,
            self.store.graph(execution_id).await?,
        ) else {
            return Ok(0);
        };

        let mut acked = Vec::with_capacity(nodes.len());
        let mut sent = 0;
        for node_id in nodes {
            if !graph.dispatched_nodes.contains(node_id) {
                debug!(execution_id = %execution_id, node_id = %node_id, "Queued node no longer in flight, dropping it");
                acked.push(node_id.clone());
                continue;
            }
            let Some(node) = definition.node(node_id) else {
                warn!(execution_id = %execution_id, node_id = %node_id, "Ready node missing from definition");
                acked.push(node_id.clone());
                continue;
            };
            let message = NodeExecutionMessage {
                execution_id,
                workflow_id: ctx.workflow_id,
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
                node_data: node.data.clone(),
                context: merged_input(&ctx, &graph, definition, node_id),
                timestamp: Utc::now(),
            };
            match self.producer.publish_node_execution(&message).await {
                Ok(_) => {
                    acked.push(node_id.clone());
                    sent += 1;
                }
                Err(e) => error!(
                    execution_id = %execution_id,
                    node_id = %node_id,
                    error = %e,
                    "Failed to dispatch node, leaving it queued"
                ),
            }
        }

        self.store.remove_ready_nodes(execution_id, &acked).await?;
        Ok(sent)
    }

    /// Derive the execution status from the graph. Terminal states are
    /// never overwritten.
    async fn settle(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let Some(graph) = self.store.graph(execution_id).await? else {
            return Ok(());
        };
        let unresolved = graph.unresolved();
        let next = if !graph.dispatched_nodes.is_empty() {
            ExecutionStatus::Running
        } else if !graph.waiting_nodes.is_empty() {
            ExecutionStatus::Paused
        } else if unresolved.is_empty() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        let stalled = format!("execution stalled: unresolved nodes [{}]", unresolved.join(", "));

        let changed = self
            .store
            .update_context(execution_id, |ctx| {
                if ctx.status.is_terminal() || ctx.status == next {
                    return None;
                }
                match next {
                    ExecutionStatus::Failed => ctx.fail(stalled.clone(), None),
                    status => ctx.transition(status),
                }
                Some(ctx.clone())
            })
            .await?
            .flatten();
        let Some(ctx) = changed else {
            return Ok(());
        };

        match ctx.status {
            ExecutionStatus::Completed => {
                let requested = self.store.return_variables(execution_id).await?;
                let result = ExecutionResult::collect(&ctx, &requested);
                info!(
                    execution_id = %execution_id,
                    result = %serde_json::to_string(&result)?,
                    "Execution completed"
                );
            }
            ExecutionStatus::Failed => warn!(execution_id = %execution_id, error = %stalled, "Execution stalled"),
            ExecutionStatus::Paused => info!(execution_id = %execution_id, waiting = ?graph.waiting_nodes, "Execution paused"),
            status => debug!(execution_id = %execution_id, status = %status, "Execution status changed"),
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries and control
    // -----------------------------------------------------------------------

    pub async fn status(&self, execution_id: Uuid) -> Result<ExecutionContext, EngineError> {
        self.store
            .get(execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))
    }

    /// Return-variable payload for the execution, whatever its status.
    pub async fn result(&self, execution_id: Uuid) -> Result<ExecutionResult, EngineError> {
        let ctx = self.status(execution_id).await?;
        let requested = self.store.return_variables(execution_id).await?;
        Ok(ExecutionResult::collect(&ctx, &requested))
    }

    /// Drop every trace of the execution. Completions still in flight are
    /// discarded as orphans when they arrive.
    #[instrument(skip(self))]
    pub async fn cancel(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let ctx = self.status(execution_id).await?;
        if let Some(graph) = self.store.graph(execution_id).await? {
            for node_id in &graph.waiting_nodes {
                self.store.remove_waiting(ctx.workflow_id, node_id, execution_id).await?;
            }
        }
        self.store.delete(execution_id).await?;
        info!("Execution cancelled");
        Ok(())
    }

    /// Re-drive work a crash or store error left behind: publish nodes still
    /// in ready queues and restore waiting-index entries for parked nodes.
    /// Returns how many requests were published.
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let mut published = 0;
        for execution_id in self.store.pending_dispatches().await? {
            let nodes = self.store.list_ready_nodes(execution_id).await?;
            let live = matches!(self.store.get(execution_id).await?, Some(ctx) if !ctx.status.is_terminal());
            let definition = self.store.definition(execution_id).await?;
            match (live, definition) {
                (true, Some(definition)) => {
                    info!(execution_id = %execution_id, nodes = ?nodes, "Re-dispatching queued nodes");
                    published += self.dispatch(execution_id, &definition, &nodes).await?;
                }
                _ => self.store.remove_ready_nodes(execution_id, &nodes).await?,
            }
        }

        for execution_id in self.store.live_executions().await? {
            let (Some(ctx), Some(graph)) = (
                self.store.get(execution_id).await?,
                self.store.graph(execution_id).await?,
            ) else {
                continue;
            };
            if ctx.status.is_terminal() {
                continue;
            }
            for node_id in &graph.waiting_nodes {
                self.store.add_waiting(ctx.workflow_id, node_id, execution_id).await?;
            }
        }
        Ok(published)
    }

    // -----------------------------------------------------------------------
    // Consumer loops
    // -----------------------------------------------------------------------

    /// Recover, then consume completions and workflow events until either
    /// subscription ends.
    pub async fn run(&self) -> Result<(), EngineError> {
        let recovered = self.recover().await?;
        if recovered > 0 {
            info!(recovered, "Recovered pending dispatches");
        }
        tokio::try_join!(self.run_completions(), self.run_events())?;
        Ok(())
    }

    pub async fn run_completions(&self) -> Result<(), EngineError> {
        let consumer = &self.config.completion_consumer;
        let mut deliveries = self
            .producer
            .broker()
            .subscribe(Topic::NodeCompletion, consumer)
            .await?;
        info!(consumer = %consumer, "Consuming node completions");

        while let Some(delivery) = deliveries.next().await {
            let delivery = match delivery {
                Ok(d) => d,
                Err(e) => {
                    error!(error = %e, "Failed to receive completion");
                    continue;
                }
            };
            let outcome = match delivery.decode::<NodeCompletionMessage>() {
                Ok(msg) => self.handle_completion(&msg).await,
                Err(e) => {
                    warn!(error = %e, "Dropping malformed completion");
                    Ok(())
                }
            };
            finish(&delivery, outcome).await;
        }
        info!("Completion subscription closed");
        Ok(())
    }

    pub async fn run_events(&self) -> Result<(), EngineError> {
        let consumer = &self.config.event_consumer;
        let mut deliveries = self
            .producer
            .broker()
            .subscribe(Topic::WorkflowEvents, consumer)
            .await?;
        info!(consumer = %consumer, "Consuming workflow events");

        while let Some(delivery) = deliveries.next().await {
            let delivery = match delivery {
                Ok(d) => d,
                Err(e) => {
                    error!(error = %e, "Failed to receive workflow event");
                    continue;
                }
            };
            let outcome = match delivery.decode::<WorkflowEvent>() {
                Ok(event) => self.handle_event(&event).await,
                Err(e) => {
                    warn!(error = %e, "Dropping malformed workflow event");
                    Ok(())
                }
            };
            finish(&delivery, outcome).await;
        }
        info!("Workflow event subscription closed");
        Ok(())
    }
}

fn failure_message(msg: &NodeCompletionMessage) -> String {
    msg.error_message()
        .unwrap_or_else(|| format!("node '{}' failed", msg.node_id))
}

/// Ack processed messages; ask for redelivery on store or transport errors.
async fn finish(delivery: &Delivery, outcome: Result<(), EngineError>) {
    let acked = match outcome {
        Ok(()) => delivery.ack().await,
        Err(e) => {
            error!(topic = %delivery.topic, error = %e, "Processing failed, requesting redelivery");
            delivery.nak().await
        }
    };
    if let Err(e) = acked {
        warn!(topic = %delivery.topic, error = %e, "Failed to acknowledge message");
    }
}
