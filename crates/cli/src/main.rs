//! `flowline` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`       — HTTP API plus the coordinator.
//! - `coordinator` — the coordinator alone.
//! - `worker`      — a node worker for one family.
//! - `standalone`  — everything in one process on the in-memory broker/store.
//! - `migrate`     — run pending database migrations.
//! - `validate`    — validate a workflow JSON file.

mod config;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use db::{InMemoryKvStore, KvStore, NatsKvStore};
use engine::{
    ContextStore, ContextStoreConfig, Coordinator, CoordinatorConfig, InMemoryWorkflowStore, NodeWorker,
    PgWorkflowStore, WorkflowDefinition, WorkflowStore,
};
use nodes::handlers::HttpMailer;
use nodes::{builtin_registry, BuiltinOptions, HandlerRegistry};
use queue::{Broker, InMemoryBroker, NatsBroker, NodeFamily, Producer};

use config::Settings;

#[derive(Parser)]
#[command(name = "flowline", about = "Distributed workflow automation engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API and run the coordinator.
    Serve {
        #[arg(long, env = "FLOWLINE_BIND")]
        bind: Option<String>,
    },
    /// Run the coordinator without the HTTP API.
    Coordinator,
    /// Run a node worker.
    Worker {
        /// `lightweight` or `analytical`.
        #[arg(long, default_value = "lightweight")]
        family: NodeFamily,
    },
    /// Run API, coordinator and both worker families in one process.
    Standalone {
        #[arg(long, env = "FLOWLINE_BIND")]
        bind: Option<String>,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,engine=debug")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.bind.clone());
            let (broker, kv) = connect_nats(&settings).await?;
            let coordinator = coordinator(postgres_workflows(&settings).await?, kv, broker);
            info!("Starting API server and coordinator on {bind}");
            tokio::select! {
                res = api::serve(&bind, api::AppState::new(coordinator.clone()), shutdown_signal()) => res?,
                res = coordinator.run() => res?,
            }
        }
        Command::Coordinator => {
            let (broker, kv) = connect_nats(&settings).await?;
            let coordinator = coordinator(postgres_workflows(&settings).await?, kv, broker);
            info!("Starting coordinator");
            until_shutdown(coordinator.run()).await?;
        }
        Command::Worker { family } => {
            let (broker, _) = connect_nats(&settings).await?;
            let worker = worker(&settings, broker)?;
            info!(family = ?family, "Starting node worker");
            until_shutdown(worker.run(family)).await?;
        }
        Command::Standalone { bind } => {
            let bind = bind.unwrap_or_else(|| settings.bind.clone());
            let workflows: Arc<dyn WorkflowStore> = if settings.database_url.is_some() {
                postgres_workflows(&settings).await?
            } else {
                info!("DATABASE_URL not set, keeping workflows in memory");
                Arc::new(InMemoryWorkflowStore::new())
            };
            let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
            let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new(settings.context_ttl));
            let coordinator = coordinator(workflows, kv, broker.clone());
            let worker = worker(&settings, broker)?;

            info!("Starting standalone engine on {bind}");
            tokio::select! {
                res = api::serve(&bind, api::AppState::new(coordinator.clone()), shutdown_signal()) => res?,
                res = coordinator.run() => res?,
                res = worker.clone().run(NodeFamily::Lightweight) => res?,
                res = worker.run(NodeFamily::Analytical) => res?,
            }
        }
        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = db::pool::create_pool(&database_url, 2).await?;
            db::pool::run_migrations(&pool).await?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => {
            let definition = read_definition(&path)?;
            match engine::validate_dag(&definition) {
                Ok(order) => println!("✅ Workflow is valid. Execution order: {order:?}"),
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    info!("Shut down cleanly");
    Ok(())
}

async fn connect_nats(settings: &Settings) -> Result<(Arc<dyn Broker>, Arc<dyn KvStore>)> {
    let broker = NatsBroker::connect(&settings.nats_url, &settings.stream)
        .await
        .with_context(|| format!("connecting to NATS at {}", settings.nats_url))?;
    let kv = NatsKvStore::open(broker.context(), &settings.kv_bucket, settings.context_ttl).await?;
    Ok((Arc::new(broker), Arc::new(kv)))
}

async fn postgres_workflows(settings: &Settings) -> Result<Arc<dyn WorkflowStore>> {
    let pool = db::pool::create_pool(settings.require_database_url()?, 10).await?;
    Ok(Arc::new(PgWorkflowStore::new(pool)))
}

fn coordinator(workflows: Arc<dyn WorkflowStore>, kv: Arc<dyn KvStore>, broker: Arc<dyn Broker>) -> Arc<Coordinator> {
    Arc::new(Coordinator::new(
        workflows,
        ContextStore::new(kv, ContextStoreConfig::default()),
        Producer::new(broker),
        CoordinatorConfig::default(),
    ))
}

fn worker(settings: &Settings, broker: Arc<dyn Broker>) -> Result<Arc<NodeWorker>> {
    Ok(Arc::new(NodeWorker::new(
        Arc::new(registry(settings)?),
        Producer::new(broker),
        settings.executor_config(),
    )))
}

fn registry(settings: &Settings) -> Result<HandlerRegistry> {
    let mut opts = BuiltinOptions::default();
    if let Some(url) = &settings.mail_api_url {
        opts.mailer = Arc::new(HttpMailer::new(
            opts.http.clone(),
            url.clone(),
            settings.mail_api_key.clone(),
            settings.mail_from.clone(),
        ));
    }
    let registry = builtin_registry(opts)?;
    info!(handlers = registry.len(), "Handler registry ready");
    Ok(registry)
}

/// Accepts a bare `{nodes, edges}` document or a stored workflow wrapping
/// it under `definition` / `workflowData`.
fn read_definition(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path).with_context(|| format!("cannot read file {}", path.display()))?;
    let doc: Value = serde_json::from_str(&content).context("invalid JSON")?;
    let graph = doc
        .get("definition")
        .or_else(|| doc.get("workflowData"))
        .cloned()
        .unwrap_or(doc);
    Ok(WorkflowDefinition::from_value(graph)?)
}

async fn until_shutdown<E>(work: impl Future<Output = Result<(), E>>) -> Result<()>
where
    E: std::error::Error + Send + Sync + 'static,
{
    tokio::select! {
        res = work => res?,
        _ = shutdown_signal() => {}
    }
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!(error = %e, "Cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
