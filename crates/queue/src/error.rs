//! Broker error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("acknowledgement failed: {0}")]
    Ack(String),

    /// Payload could not be encoded or decoded as JSON.
    #[error("message serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
