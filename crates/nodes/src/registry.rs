//! Type-tag keyed handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::{NodeHandler, RegistryError};

/// Maps lower-cased type tags to handlers. Built once at startup; lookups are
/// a single hash probe.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under every tag it declares.
    ///
    /// # Errors
    /// [`RegistryError::DuplicateType`] if any tag is already taken; the
    /// registry is left unchanged in that case.
    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) -> Result<(), RegistryError> {
        let tags: Vec<String> = handler.node_types().iter().map(|t| t.to_lowercase()).collect();
        if let Some(taken) = tags.iter().find(|t| self.handlers.contains_key(*t)) {
            return Err(RegistryError::DuplicateType(taken.clone()));
        }
        for tag in tags {
            debug!(node_type = %tag, "Registered node handler");
            self.handlers.insert(tag, handler.clone());
        }
        Ok(())
    }

    /// Handler for `node_type`, if any.
    pub fn resolve(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(&node_type.to_lowercase()).cloned()
    }

    /// Registered tags, sorted.
    pub fn node_types(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
