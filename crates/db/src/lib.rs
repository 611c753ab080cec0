//! `db` crate — pure persistence layer.
//!
//! Two stores live here:
//! - Postgres (`pool`, `repository`, `models`) for workflow definitions.
//! - A TTL-bounded key-value store (`kv`) for transient execution state,
//!   backed by NATS JetStream or an in-process map.
//!
//! No business logic lives here.

pub mod error;
pub mod kv;
pub mod pool;
pub mod repository;
pub mod models;

pub use pool::DbPool;
pub use error::DbError;
pub use kv::{InMemoryKvStore, KvEntry, KvStore, NatsKvStore};
