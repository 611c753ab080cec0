//! Node-level error types.

use thiserror::Error;

/// Errors returned by a handler's `execute` method.
///
/// The worker uses the variant to decide retry behaviour:
/// - `Retryable` — re-run with exponential back-off, up to the worker's limit.
/// - `Fatal`     — publish a `FAILED` completion immediately.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Transient failure (network, upstream 5xx, timeouts).
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure: bad configuration, rejected request, invalid input.
    #[error("fatal node error: {0}")]
    Fatal(String),
}

impl NodeError {
    /// The bare message, without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            NodeError::Retryable(msg) | NodeError::Fatal(msg) => msg,
        }
    }

    /// Classify a transport error from `reqwest`.
    pub fn from_http(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            NodeError::Retryable(err.to_string())
        } else {
            NodeError::Fatal(err.to_string())
        }
    }
}

/// Problems building the handler registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Two handlers claim the same type tag.
    #[error("node type '{0}' is registered by more than one handler")]
    DuplicateType(String),
}
