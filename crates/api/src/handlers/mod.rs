pub mod executions;
pub mod triggers;
pub mod workflows;
