//! `queue` crate — the dispatch protocol between coordinator and workers.
//!
//! - [`messages`]: wire contracts (node execution, node completion, workflow
//!   events), JSON with camelCase fields.
//! - [`topics`]: the pure node-type → topic routing function.
//! - [`broker`]: the [`Broker`] trait plus NATS JetStream and in-memory
//!   implementations.
//! - [`producer`]: typed publishing on top of any broker.

pub mod broker;
pub mod error;
pub mod memory;
pub mod messages;
pub mod nats;
pub mod producer;
pub mod topics;

pub use broker::{Broker, Delivery, DeliveryStream};
pub use error::QueueError;
pub use memory::InMemoryBroker;
pub use messages::{
    CompletionStatus, NodeCompletionMessage, NodeExecutionMessage, Payload, WorkflowEvent,
    AWAITING_INPUT_KEY,
};
pub use nats::NatsBroker;
pub use producer::Producer;
pub use topics::{NodeFamily, Topic};
