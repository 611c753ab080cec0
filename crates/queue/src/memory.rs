//! Process-local broker used by tests and the single-process mode.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::debug;

use crate::broker::{AckHandle, Delivery, DeliveryStream};
use crate::{Broker, QueueError, Topic};

type Envelope = (Option<String>, Vec<u8>);

struct Channel {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Envelope>>>,
}

impl Channel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Arc::new(AsyncMutex::new(rx)) }
    }
}

/// Unbounded in-memory broker. All subscribers of a topic compete for its
/// messages regardless of consumer name; acks are no-ops.
#[derive(Default)]
pub struct InMemoryBroker {
    channels: Mutex<HashMap<Topic, Channel>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_channel<T>(&self, topic: Topic, f: impl FnOnce(&Channel) -> T) -> Result<T, QueueError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| QueueError::Connection("in-memory broker lock poisoned".into()))?;
        Ok(f(channels.entry(topic).or_insert_with(Channel::new)))
    }

    /// Take every message currently queued on `topic` without waiting.
    ///
    /// Messages held by an active subscriber's pending receive are not seen.
    pub fn drain(&self, topic: Topic) -> Vec<Delivery> {
        let Ok(rx) = self.with_channel(topic, |c| c.rx.clone()) else {
            return Vec::new();
        };
        let Ok(mut rx) = rx.try_lock() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while let Ok((key, payload)) = rx.try_recv() {
            out.push(Delivery::new(topic, key, payload, AckHandle::None));
        }
        out
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, topic: Topic, key: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        debug!(topic = %topic, key = %key, bytes = payload.len(), "Publishing in-memory message");
        self.with_channel(topic, |c| c.tx.send((Some(key.to_owned()), payload)))?
            .map_err(|_| QueueError::Publish(format!("topic {topic} is closed")))
    }

    async fn subscribe(&self, topic: Topic, _consumer: &str) -> Result<DeliveryStream, QueueError> {
        let rx = self.with_channel(topic, |c| c.rx.clone())?;
        let stream = futures::stream::unfold(rx, move |rx| async move {
            let next = rx.lock().await.recv().await;
            next.map(|(key, payload)| {
                (Ok(Delivery::new(topic, key, payload, AckHandle::None)), rx)
            })
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn published_messages_are_received_in_order() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe(Topic::NodeCompletion, "coordinator").await.unwrap();

        broker.publish(Topic::NodeCompletion, "a", b"1".to_vec()).await.unwrap();
        broker.publish(Topic::NodeCompletion, "b", b"2".to_vec()).await.unwrap();

        let first = sub.next().await.unwrap().unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(first.key.as_deref(), Some("a"));
        assert_eq!(second.payload, b"2");
        first.ack().await.unwrap();
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let broker = InMemoryBroker::new();
        broker.publish(Topic::LightweightNodes, "n1", b"{}".to_vec()).await.unwrap();

        assert!(broker.drain(Topic::AnalyticalNodes).is_empty());
        let light = broker.drain(Topic::LightweightNodes);
        assert_eq!(light.len(), 1);
        assert_eq!(light[0].topic, Topic::LightweightNodes);
    }

    #[tokio::test]
    async fn empty_subscription_is_pending_not_closed() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe(Topic::WorkflowEvents, "c").await.unwrap();
        assert!(sub.next().now_or_never().is_none());
    }
}
