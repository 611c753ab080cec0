//! The broker abstraction shared by the coordinator and workers.

use async_nats::jetstream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;

use crate::{QueueError, Topic};

/// Stream of deliveries from one subscription.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, QueueError>>;

/// At-least-once message broker.
///
/// Subscribers sharing a `consumer` name compete for messages (work-queue
/// semantics); a message that is not acknowledged may be redelivered.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `payload` on `topic`, partitioned by `key`.
    async fn publish(&self, topic: Topic, key: &str, payload: Vec<u8>) -> Result<(), QueueError>;

    /// Open a durable subscription on `topic` as `consumer`.
    async fn subscribe(&self, topic: Topic, consumer: &str) -> Result<DeliveryStream, QueueError>;
}

pub(crate) enum AckHandle {
    None,
    JetStream(Box<jetstream::Message>),
}

/// One received message.
pub struct Delivery {
    pub topic: Topic,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub(crate) ack: AckHandle,
}

impl Delivery {
    pub(crate) fn new(topic: Topic, key: Option<String>, payload: Vec<u8>, ack: AckHandle) -> Self {
        Self { topic, key, payload, ack }
    }

    /// Deserialize the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Mark the message as processed.
    pub async fn ack(&self) -> Result<(), QueueError> {
        match &self.ack {
            AckHandle::None => Ok(()),
            AckHandle::JetStream(msg) => msg.ack().await.map_err(|e| QueueError::Ack(e.to_string())),
        }
    }

    /// Ask for redelivery.
    pub async fn nak(&self) -> Result<(), QueueError> {
        match &self.ack {
            AckHandle::None => Ok(()),
            AckHandle::JetStream(msg) => msg
                .ack_with(jetstream::AckKind::Nak(None))
                .await
                .map_err(|e| QueueError::Ack(e.to_string())),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("key", &self.key)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
