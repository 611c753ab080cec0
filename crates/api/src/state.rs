//! Shared handler state.

use std::sync::Arc;

use engine::{Coordinator, WorkflowStore};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    pub fn workflows(&self) -> &Arc<dyn WorkflowStore> {
        self.coordinator.workflows()
    }
}
