//! NATS JetStream broker.
//!
//! All topics live in one stream; each role reads through a durable pull
//! consumer filtered to its subject. Message keys travel in a header.

use std::time::Duration;

use async_nats::jetstream::{self, consumer::pull, stream, Context};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

use crate::broker::{AckHandle, Delivery, DeliveryStream};
use crate::{Broker, QueueError, Topic};

/// Default JetStream stream name.
pub const DEFAULT_STREAM: &str = "FLOWLINE";

/// Header carrying the partition key (node id).
pub const KEY_HEADER: &str = "Flowline-Key";

#[derive(Clone)]
pub struct NatsBroker {
    js: Context,
    stream: String,
}

impl NatsBroker {
    /// Connect to `nats_url` and make sure the stream exists.
    pub async fn connect(nats_url: &str, stream: &str) -> Result<Self, QueueError> {
        let client = async_nats::connect(nats_url)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        info!(url = %nats_url, "Connected to NATS");
        let js = jetstream::new(client);
        Self::ensure_stream(&js, stream).await?;
        Ok(Self { js, stream: stream.to_string() })
    }

    /// JetStream context, shared with the key-value store.
    pub fn context(&self) -> &Context {
        &self.js
    }

    async fn ensure_stream(js: &Context, stream: &str) -> Result<(), QueueError> {
        match js.get_stream(stream).await {
            Ok(_) => {
                debug!(stream = %stream, "Using existing NATS stream");
                Ok(())
            }
            Err(_) => {
                let config = stream::Config {
                    name: stream.to_string(),
                    subjects: Topic::ALL.iter().map(|t| t.subject().to_string()).collect(),
                    max_age: Duration::from_secs(24 * 60 * 60),
                    storage: stream::StorageType::File,
                    ..Default::default()
                };
                js.create_stream(config)
                    .await
                    .map_err(|e| QueueError::Connection(e.to_string()))?;
                info!(stream = %stream, "Created NATS stream");
                Ok(())
            }
        }
    }

    async fn ensure_consumer(
        &self,
        topic: Topic,
        consumer: &str,
    ) -> Result<jetstream::consumer::Consumer<pull::Config>, QueueError> {
        let stream = self
            .js
            .get_stream(&self.stream)
            .await
            .map_err(|e| QueueError::Subscribe(e.to_string()))?;

        match stream.get_consumer(consumer).await {
            Ok(existing) => Ok(existing),
            Err(_) => {
                let config = pull::Config {
                    durable_name: Some(consumer.to_string()),
                    filter_subject: topic.subject().to_string(),
                    ack_wait: Duration::from_secs(60),
                    ..Default::default()
                };
                let created = stream
                    .create_consumer(config)
                    .await
                    .map_err(|e| QueueError::Subscribe(e.to_string()))?;
                info!(consumer = %consumer, topic = %topic, "Created NATS consumer");
                Ok(created)
            }
        }
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn publish(&self, topic: Topic, key: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(KEY_HEADER, key);

        self.js
            .publish_with_headers(topic.subject(), headers, payload.into())
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        debug!(topic = %topic, key = %key, "Published message");
        Ok(())
    }

    async fn subscribe(&self, topic: Topic, consumer: &str) -> Result<DeliveryStream, QueueError> {
        let consumer = self.ensure_consumer(topic, consumer).await?;
        let messages = consumer
            .messages()
            .await
            .map_err(|e| QueueError::Subscribe(e.to_string()))?;

        let deliveries = messages.map(move |msg| {
            let msg = msg.map_err(|e| QueueError::Subscribe(e.to_string()))?;
            let key = msg
                .headers
                .as_ref()
                .and_then(|h| h.get(KEY_HEADER))
                .map(|v| v.as_str().to_owned());
            let payload = msg.payload.to_vec();
            Ok(Delivery::new(topic, key, payload, AckHandle::JetStream(Box::new(msg))))
        });

        Ok(deliveries.boxed())
    }
}
