//! Process settings read from the environment (and a `.env` file, loaded by
//! `main` before anything else).

use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";
pub const DEFAULT_KV_BUCKET: &str = "flowline-contexts";
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_MAIL_FROM: &str = "flowline@localhost";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Postgres connection string; required by everything that reads workflows.
    pub database_url: Option<String>,
    pub nats_url: String,
    pub stream: String,
    pub kv_bucket: String,
    /// Lifetime of every execution's context entries.
    pub context_ttl: Duration,
    pub worker_concurrency: usize,
    pub node_timeout: Option<Duration>,
    pub mail_api_url: Option<String>,
    pub mail_api_key: Option<String>,
    pub mail_from: String,
    pub bind: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str| -> Result<Option<u64>> {
            get(key)
                .map(|v| v.trim().parse::<u64>().with_context(|| format!("{key} must be a number, got '{v}'")))
                .transpose()
        };

        let defaults = engine::ExecutorConfig::default();
        Ok(Self {
            database_url: get("DATABASE_URL"),
            nats_url: get("NATS_URL").unwrap_or_else(|| DEFAULT_NATS_URL.into()),
            stream: get("FLOWLINE_STREAM").unwrap_or_else(|| queue::nats::DEFAULT_STREAM.into()),
            kv_bucket: get("FLOWLINE_KV_BUCKET").unwrap_or_else(|| DEFAULT_KV_BUCKET.into()),
            context_ttl: Duration::from_secs(number("FLOWLINE_CONTEXT_TTL_SECS")?.unwrap_or(86_400)),
            worker_concurrency: number("FLOWLINE_WORKER_CONCURRENCY")?
                .map_or(defaults.max_concurrent, |n| n.max(1) as usize),
            node_timeout: number("FLOWLINE_NODE_TIMEOUT_MS")?.map(Duration::from_millis),
            mail_api_url: get("FLOWLINE_MAIL_API_URL"),
            mail_api_key: get("FLOWLINE_MAIL_API_KEY"),
            mail_from: get("FLOWLINE_MAIL_FROM").unwrap_or_else(|| DEFAULT_MAIL_FROM.into()),
            bind: get("FLOWLINE_BIND").unwrap_or_else(|| DEFAULT_BIND.into()),
        })
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL is not set")
    }

    pub fn executor_config(&self) -> engine::ExecutorConfig {
        engine::ExecutorConfig {
            max_concurrent: self.worker_concurrency,
            node_timeout: self.node_timeout,
            ..Default::default()
        }
    }
}
