//! Node worker.
//!
//! A `NodeWorker` consumes one node-family topic and, for each request:
//! 1. Resolves the handler for the node type from the registry.
//! 2. Runs it with the merged input, retrying `NodeError::Retryable` with
//!    exponential back-off and enforcing the optional per-node timeout.
//! 3. Publishes a `NodeCompletionMessage`: COMPLETED with the output, or
//!    FAILED with `{"error": message}`.
//!
//! Requests run concurrently, bounded by a semaphore.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use nodes::{HandlerRegistry, NodeContext, NodeError, NodeHandler};
use queue::{Delivery, NodeCompletionMessage, NodeExecutionMessage, NodeFamily, Payload, Producer};

use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for node execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of times a retryable node failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    pub retry_base_delay: Duration,
    /// Upper bound on a single back-off delay.
    pub max_retry_delay: Duration,
    /// Wall-clock limit per attempt; overruns fail the node.
    pub node_timeout: Option<Duration>,
    /// Requests executed at once.
    pub max_concurrent: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(30),
            node_timeout: None,
            max_concurrent: 16,
        }
    }
}

/// Durable consumer name shared by every worker of a family.
pub fn consumer_name(family: NodeFamily) -> &'static str {
    match family {
        NodeFamily::Lightweight => "workers-lightweight",
        NodeFamily::Analytical => "workers-analytical",
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`,
/// capped at `max`.
fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| base.checked_mul(factor))
        .map_or(max, |delay| delay.min(max))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// NodeWorker
// ---------------------------------------------------------------------------

pub struct NodeWorker {
    registry: Arc<HandlerRegistry>,
    producer: Producer,
    config: ExecutorConfig,
}

impl NodeWorker {
    pub fn new(registry: Arc<HandlerRegistry>, producer: Producer, config: ExecutorConfig) -> Self {
        Self { registry, producer, config }
    }

    /// Consume `family`'s topic until the subscription ends.
    pub async fn run(self: Arc<Self>, family: NodeFamily) -> Result<(), EngineError> {
        let topic = family.topic();
        let mut deliveries = self
            .producer
            .broker()
            .subscribe(topic, consumer_name(family))
            .await?;
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        info!(
            topic = %topic,
            handlers = self.registry.len(),
            max_concurrent = self.config.max_concurrent,
            "Worker consuming node requests"
        );

        while let Some(delivery) = deliveries.next().await {
            let delivery = match delivery {
                Ok(d) => d,
                Err(e) => {
                    error!(topic = %topic, error = %e, "Failed to receive node request");
                    continue;
                }
            };
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let worker = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                worker.process(delivery).await;
            });
        }
        info!(topic = %topic, "Node request subscription closed");
        Ok(())
    }

    async fn process(&self, delivery: Delivery) {
        let request = match delivery.decode::<NodeExecutionMessage>() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Dropping malformed node request");
                if let Err(e) = delivery.ack().await {
                    warn!(error = %e, "Failed to acknowledge message");
                }
                return;
            }
        };
        let acked = match self.handle(&request).await {
            Ok(()) => delivery.ack().await,
            Err(e) => {
                error!(
                    execution_id = %request.execution_id,
                    node_id = %request.node_id,
                    error = %e,
                    "Failed to publish completion, requesting redelivery"
                );
                delivery.nak().await
            }
        };
        if let Err(e) = acked {
            warn!(error = %e, "Failed to acknowledge message");
        }
    }

    /// Execute `request` and publish its completion.
    pub async fn handle(&self, request: &NodeExecutionMessage) -> Result<(), EngineError> {
        let completion = self.execute(request).await;
        self.producer.publish_node_completion(&completion).await?;
        Ok(())
    }

    /// Execute `request` and build its completion. Never fails: handler
    /// errors become FAILED completions.
    #[instrument(
        skip(self, request),
        fields(execution_id = %request.execution_id, node_id = %request.node_id, node_type = %request.node_type)
    )]
    pub async fn execute(&self, request: &NodeExecutionMessage) -> NodeCompletionMessage {
        let started = Instant::now();

        let Some(handler) = self.registry.resolve(&request.node_type) else {
            warn!("No handler registered for node type, passing input through");
            let mut output = request.context.clone();
            output.insert("skipped".into(), Value::Bool(true));
            return NodeCompletionMessage::completed(request, output, elapsed_ms(started));
        };

        let ctx = NodeContext::from(request);
        match self.execute_with_retry(handler.as_ref(), request, &ctx).await {
            Ok(output) => {
                let ms = elapsed_ms(started);
                info!(processing_ms = ms, "Node completed");
                NodeCompletionMessage::completed(request, output, ms)
            }
            Err(e) => {
                let ms = elapsed_ms(started);
                error!(processing_ms = ms, error = %e, "Node failed");
                NodeCompletionMessage::failed(request, e.message(), ms)
            }
        }
    }

    async fn execute_with_retry(
        &self,
        handler: &dyn NodeHandler,
        request: &NodeExecutionMessage,
        ctx: &NodeContext,
    ) -> Result<Payload, NodeError> {
        let mut attempts = 0u32;

        loop {
            match self.execute_once(handler, request, ctx).await {
                Ok(output) => return Ok(output),

                Err(NodeError::Fatal(msg)) => return Err(NodeError::Fatal(msg)),

                Err(NodeError::Retryable(msg)) => {
                    attempts += 1;
                    if attempts > self.config.max_retries {
                        return Err(NodeError::Retryable(format!(
                            "{msg} (gave up after {} retries)",
                            self.config.max_retries
                        )));
                    }

                    let delay = backoff_delay(self.config.retry_base_delay, self.config.max_retry_delay, attempts);

                    warn!(
                        attempt = attempts,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %msg,
                        "Retryable node error, backing off"
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn execute_once(
        &self,
        handler: &dyn NodeHandler,
        request: &NodeExecutionMessage,
        ctx: &NodeContext,
    ) -> Result<Payload, NodeError> {
        let run = handler.execute(&request.node_data, &request.context, ctx);
        match self.config.node_timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.unwrap_or_else(|_| {
                Err(NodeError::Fatal(format!(
                    "node timed out after {} ms",
                    limit.as_millis()
                )))
            }),
            None => run.await,
        }
    }
}
