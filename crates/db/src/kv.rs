//! TTL-bounded key-value storage for transient execution state.
//!
//! Every write refreshes the entry's lifetime. Entries carry a monotonically
//! increasing revision so callers can implement optimistic read-modify-write
//! cycles with [`KvStore::update`].
//!
//! Two backends:
//! - [`NatsKvStore`] — a JetStream key-value bucket (`max_age` = TTL,
//!   `history = 1`). Survives process restarts and is shared across replicas.
//! - [`InMemoryKvStore`] — a process-local map, used by tests and the
//!   single-process mode.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::DbError;

/// A stored value together with the revision it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub value: Vec<u8>,
    pub revision: u64,
}

/// Minimal key-value contract the execution context store is built on.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a live entry. Expired and deleted keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, DbError>;

    /// Unconditionally write `value`, returning the new revision.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, DbError>;

    /// Write `value` only if no live entry exists under `key`.
    ///
    /// Returns [`DbError::RevisionConflict`] when the key is already taken.
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64, DbError>;

    /// Write `value` only if the entry is still at `revision`.
    ///
    /// Returns [`DbError::RevisionConflict`] when the entry changed or vanished.
    async fn update(&self, key: &str, value: Vec<u8>, revision: u64) -> Result<u64, DbError>;

    /// Remove a key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), DbError>;

    /// List live keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, DbError>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

struct StoredEntry {
    value: Vec<u8>,
    revision: u64,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, StoredEntry>,
    last_revision: u64,
}

impl Inner {
    fn live(&mut self, key: &str, now: Instant) -> Option<&StoredEntry> {
        let expired = self.entries.get(key).is_some_and(|e| e.expires_at <= now);
        if expired {
            self.entries.remove(key);
        }
        self.entries.get(key)
    }

    fn write(&mut self, key: &str, value: Vec<u8>, expires_at: Instant) -> u64 {
        self.last_revision += 1;
        let revision = self.last_revision;
        self.entries.insert(
            key.to_owned(),
            StoredEntry { value, revision, expires_at },
        );
        revision
    }
}

/// Process-local [`KvStore`] with per-entry expiry.
///
/// Expiry is measured with `tokio::time::Instant`, so tests can drive it with
/// `tokio::time::pause` / `advance`.
pub struct InMemoryKvStore {
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl InMemoryKvStore {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, inner: Mutex::new(Inner::default()) }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, DbError> {
        self.inner
            .lock()
            .map_err(|_| DbError::Kv("in-memory store lock poisoned".into()))
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, DbError> {
        let mut inner = self.lock()?;
        Ok(inner.live(key, Instant::now()).map(|e| KvEntry {
            value: e.value.clone(),
            revision: e.revision,
        }))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, DbError> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        Ok(inner.write(key, value, now + self.ttl))
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64, DbError> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        if inner.live(key, now).is_some() {
            return Err(DbError::RevisionConflict { key: key.to_owned() });
        }
        Ok(inner.write(key, value, now + self.ttl))
    }

    async fn update(&self, key: &str, value: Vec<u8>, revision: u64) -> Result<u64, DbError> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        let current = inner.live(key, now).map(|e| e.revision);
        if current != Some(revision) {
            return Err(DbError::RevisionConflict { key: key.to_owned() });
        }
        Ok(inner.write(key, value, now + self.ttl))
    }

    async fn delete(&self, key: &str) -> Result<(), DbError> {
        self.lock()?.entries.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, DbError> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        inner.entries.retain(|_, e| e.expires_at > now);
        let mut keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// NATS JetStream backend
// ---------------------------------------------------------------------------

/// [`KvStore`] backed by a JetStream key-value bucket.
///
/// JetStream keys may not contain `:`, so logical keys such as
/// `context:<id>` are stored as `context.<id>`.
#[derive(Clone)]
pub struct NatsKvStore {
    store: kv::Store,
}

impl NatsKvStore {
    /// Open `bucket`, creating it with the given entry lifetime if needed.
    pub async fn open(
        js: &jetstream::Context,
        bucket: &str,
        ttl: Duration,
    ) -> Result<Self, DbError> {
        let store = match js.get_key_value(bucket).await {
            Ok(store) => {
                info!(bucket = %bucket, "Using existing key-value bucket");
                store
            }
            Err(_) => {
                let store = js
                    .create_key_value(kv::Config {
                        bucket: bucket.to_string(),
                        description: "Workflow execution state".to_string(),
                        history: 1,
                        max_age: ttl,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| DbError::Kv(e.to_string()))?;
                info!(bucket = %bucket, ttl_secs = ttl.as_secs(), "Created key-value bucket");
                store
            }
        };
        Ok(Self { store })
    }
}

fn encode_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            ':' => '.',
            c if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '=' | '.') => c,
            _ => '_',
        })
        .collect()
}

fn decode_key(key: &str) -> String {
    key.replace('.', ":")
}

#[async_trait]
impl KvStore for NatsKvStore {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, DbError> {
        let entry = self
            .store
            .entry(encode_key(key))
            .await
            .map_err(|e| DbError::Kv(e.to_string()))?;

        Ok(entry
            .filter(|e| matches!(e.operation, kv::Operation::Put))
            .map(|e| KvEntry { value: e.value.to_vec(), revision: e.revision }))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, DbError> {
        self.store
            .put(encode_key(key), value.into())
            .await
            .map_err(|e| DbError::Kv(e.to_string()))
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64, DbError> {
        self.store
            .create(encode_key(key), value.into())
            .await
            .map_err(|e| match e.kind() {
                kv::CreateErrorKind::AlreadyExists => DbError::RevisionConflict { key: key.to_owned() },
                _ => DbError::Kv(e.to_string()),
            })
    }

    async fn update(&self, key: &str, value: Vec<u8>, revision: u64) -> Result<u64, DbError> {
        self.store
            .update(encode_key(key), value.into(), revision)
            .await
            .map_err(|e| {
                debug!(key = %key, revision, error = %e, "Key-value update rejected");
                DbError::RevisionConflict { key: key.to_owned() }
            })
    }

    async fn delete(&self, key: &str) -> Result<(), DbError> {
        self.store
            .purge(encode_key(key))
            .await
            .map_err(|e| DbError::Kv(e.to_string()))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, DbError> {
        let wire_prefix = encode_key(prefix);
        let mut keys = self
            .store
            .keys()
            .await
            .map_err(|e| DbError::Kv(e.to_string()))?;

        let mut found = Vec::new();
        while let Some(key) = keys.next().await {
            let key = key.map_err(|e| DbError::Kv(e.to_string()))?;
            if key.starts_with(&wire_prefix) {
                found.push(decode_key(&key));
            }
        }
        found.sort();
        Ok(found)
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryKvStore {
        InMemoryKvStore::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn put_then_get_returns_latest_revision() {
        let kv = store();
        let first = kv.put("context:1", b"a".to_vec()).await.unwrap();
        let second = kv.put("context:1", b"b".to_vec()).await.unwrap();
        assert!(second > first);

        let entry = kv.get("context:1").await.unwrap().expect("entry present");
        assert_eq!(entry.value, b"b");
        assert_eq!(entry.revision, second);
    }

    #[tokio::test]
    async fn update_with_stale_revision_is_rejected() {
        let kv = store();
        let rev = kv.put("dependencies:1", b"v1".to_vec()).await.unwrap();
        kv.update("dependencies:1", b"v2".to_vec(), rev).await.unwrap();

        let stale = kv.update("dependencies:1", b"v3".to_vec(), rev).await;
        assert!(matches!(stale, Err(DbError::RevisionConflict { key }) if key == "dependencies:1"));
        assert_eq!(kv.get("dependencies:1").await.unwrap().unwrap().value, b"v2");
    }

    #[tokio::test]
    async fn update_of_missing_key_is_a_conflict() {
        let kv = store();
        let result = kv.update("ready:ghost", b"[]".to_vec(), 1).await;
        assert!(matches!(result, Err(DbError::RevisionConflict { .. })));
    }

    #[tokio::test]
    async fn create_only_succeeds_for_absent_keys() {
        let kv = store();
        kv.create("waiting:wf:w", b"[]".to_vec()).await.unwrap();
        let again = kv.create("waiting:wf:w", b"[1]".to_vec()).await;
        assert!(matches!(again, Err(DbError::RevisionConflict { .. })));

        kv.delete("waiting:wf:w").await.unwrap();
        kv.create("waiting:wf:w", b"[2]".to_vec()).await.unwrap();
        assert_eq!(kv.get("waiting:wf:w").await.unwrap().unwrap().value, b"[2]");
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl_and_writes_refresh_it() {
        let kv = InMemoryKvStore::new(Duration::from_secs(10));
        kv.put("context:a", b"1".to_vec()).await.unwrap();
        kv.put("context:b", b"1".to_vec()).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        kv.put("context:b", b"2".to_vec()).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(kv.get("context:a").await.unwrap().is_none());
        assert!(kv.get("context:b").await.unwrap().is_some());
        assert_eq!(kv.keys("context:").await.unwrap(), vec!["context:b"]);
    }

    #[tokio::test]
    async fn keys_filters_by_prefix_and_delete_removes() {
        let kv = store();
        kv.put("ready:1", b"[]".to_vec()).await.unwrap();
        kv.put("ready:2", b"[]".to_vec()).await.unwrap();
        kv.put("context:1", b"{}".to_vec()).await.unwrap();

        assert_eq!(kv.keys("ready:").await.unwrap(), vec!["ready:1", "ready:2"]);

        kv.delete("ready:1").await.unwrap();
        kv.delete("ready:never-existed").await.unwrap();
        assert_eq!(kv.keys("ready:").await.unwrap(), vec!["ready:2"]);
    }

    #[test]
    fn jetstream_keys_replace_colons() {
        assert_eq!(encode_key("context:9f1c"), "context.9f1c");
        assert_eq!(encode_key("waiting:wf:node 1"), "waiting.wf.node_1");
        assert_eq!(decode_key("ready.9f1c"), "ready:9f1c");
    }
}
