//! `nodes` crate — the [`NodeHandler`] contract and the built-in handlers.
//!
//! Every handler declares the node type tags it serves and turns a node's
//! configuration plus its merged upstream input into an output map. Workers
//! resolve handlers through a [`HandlerRegistry`] built once at startup.

pub mod condition;
pub mod error;
pub mod handlers;
pub mod mock;
pub mod registry;
pub mod template;
pub mod traits;

pub use error::{NodeError, RegistryError};
pub use handlers::{builtin_registry, BuiltinOptions};
pub use registry::HandlerRegistry;
pub use traits::{NodeContext, NodeHandler};
