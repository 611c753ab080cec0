//! `MockNode` — a scripted test double for `NodeHandler`.
//!
//! Used by worker and coordinator tests where a real handler is either
//! unavailable or irrelevant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use queue::messages::into_payload;
use queue::Payload;

use crate::{NodeContext, NodeError, NodeHandler};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value (non-objects are wrapped as `{"value": v}`).
    ReturnValue(Value),
    /// Fail with a `Retryable` error on every call.
    FailRetryable(String),
    /// Fail with a `Fatal` error on every call.
    FailFatal(String),
    /// Fail with `Retryable` for the first `failures` calls, then return `value`.
    Flaky { failures: usize, value: Value },
    /// Return the input unchanged.
    Echo,
}

/// A mock handler that records every input it receives.
pub struct MockNode {
    /// Type tags this mock claims.
    pub types: &'static [&'static str],
    pub behaviour: MockBehaviour,
    /// All inputs seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<Payload>>>,
    attempts: AtomicUsize,
}

impl MockNode {
    pub fn new(types: &'static [&'static str], behaviour: MockBehaviour) -> Self {
        Self {
            types,
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Always succeeds with `value`.
    pub fn returning(types: &'static [&'static str], value: Value) -> Self {
        Self::new(types, MockBehaviour::ReturnValue(value))
    }

    /// Always fails with a `Fatal` error.
    pub fn failing_fatal(types: &'static [&'static str], msg: impl Into<String>) -> Self {
        Self::new(types, MockBehaviour::FailFatal(msg.into()))
    }

    /// Always fails with a `Retryable` error.
    pub fn failing_retryable(types: &'static [&'static str], msg: impl Into<String>) -> Self {
        Self::new(types, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Fails `failures` times, then succeeds with `value`.
    pub fn flaky(types: &'static [&'static str], failures: usize, value: Value) -> Self {
        Self::new(types, MockBehaviour::Flaky { failures, value })
    }

    /// Returns its input.
    pub fn echo(types: &'static [&'static str]) -> Self {
        Self::new(types, MockBehaviour::Echo)
    }

    fn calls(&self) -> MutexGuard<'_, Vec<Payload>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    /// Input of the most recent call.
    pub fn last_input(&self) -> Option<Payload> {
        self.calls().last().cloned()
    }
}

#[async_trait]
impl NodeHandler for MockNode {
    fn node_types(&self) -> &'static [&'static str] {
        self.types
    }

    async fn execute(
        &self,
        _config: &Value,
        input: &Payload,
        _ctx: &NodeContext,
    ) -> Result<Payload, NodeError> {
        self.calls().push(input.clone());
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(into_payload(v.clone())),
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg)     => Err(NodeError::Fatal(msg.clone())),
            MockBehaviour::Flaky { failures, value } => {
                if attempt < *failures {
                    Err(NodeError::Retryable(format!("transient failure #{}", attempt + 1)))
                } else {
                    Ok(into_payload(value.clone()))
                }
            }
            MockBehaviour::Echo => Ok(input.clone()),
        }
    }
}
