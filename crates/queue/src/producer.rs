//! Typed publishing on top of a [`Broker`].

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
    Broker, NodeCompletionMessage, NodeExecutionMessage, NodeFamily, QueueError, Topic,
    WorkflowEvent,
};

/// Serializes protocol messages and routes them to their topic.
#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn Broker>,
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Publish an execution request on its node family's topic and return
    /// the topic used.
    #[instrument(skip(self, message), fields(execution_id = %message.execution_id, node_id = %message.node_id))]
    pub async fn publish_node_execution(&self, message: &NodeExecutionMessage) -> Result<Topic, QueueError> {
        let topic = NodeFamily::for_node_type(&message.node_type).topic();
        let payload = serde_json::to_vec(message)?;
        self.broker.publish(topic, &message.node_id, payload).await?;
        debug!(topic = %topic, node_type = %message.node_type, "Dispatched node");
        Ok(topic)
    }

    /// Publish a completion on the shared completion topic, keyed by node id.
    pub async fn publish_node_completion(&self, message: &NodeCompletionMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(message)?;
        self.broker
            .publish(Topic::NodeCompletion, &message.node_id, payload)
            .await
    }

    pub async fn publish_workflow_event(&self, event: &WorkflowEvent) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(event)?;
        self.broker
            .publish(Topic::WorkflowEvents, &event.workflow_id().to_string(), payload)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::into_payload;
    use crate::InMemoryBroker;
    use serde_json::json;
    use uuid::Uuid;

    fn request(node_type: &str) -> NodeExecutionMessage {
        NodeExecutionMessage {
            execution_id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            node_id: format!("{node_type}-1"),
            node_type: node_type.into(),
            node_data: json!({}),
            context: into_payload(json!({})),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn execution_requests_are_routed_by_family() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = Producer::new(broker.clone());

        let light = producer.publish_node_execution(&request("delay")).await.unwrap();
        let heavy = producer.publish_node_execution(&request("classification")).await.unwrap();
        assert_eq!(light, Topic::LightweightNodes);
        assert_eq!(heavy, Topic::AnalyticalNodes);

        let queued = broker.drain(Topic::AnalyticalNodes);
        assert_eq!(queued.len(), 1);
        let decoded: NodeExecutionMessage = queued[0].decode().unwrap();
        assert_eq!(decoded.node_type, "classification");
        assert_eq!(queued[0].key.as_deref(), Some("classification-1"));
    }

    #[tokio::test]
    async fn completions_share_one_topic() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = Producer::new(broker.clone());

        for node_type in ["transform", "clustering"] {
            let done = NodeCompletionMessage::completed(&request(node_type), into_payload(json!({})), 1);
            producer.publish_node_completion(&done).await.unwrap();
        }
        assert_eq!(broker.drain(Topic::NodeCompletion).len(), 2);
    }
}
