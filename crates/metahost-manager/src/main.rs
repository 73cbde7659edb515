use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use metahost_manager::config::ManagerConfig;
use metahost_manager::{Manager, ManagerDeps};
use metahost_providers::{InMemoryBus, InMemoryStore, LocalAuthorizer};
use metahost_worker::config::WorkerConfig;
use metahost_worker::features::backend::runtime::InMemoryContainerRuntime;
use metahost_worker::{Worker, WorkerDeps};

const DEFAULT_EXPOSED_PORTS: &[&str] = &["80/tcp"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("metahost_manager=info,metahost_worker=info,info")
        }))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let manager_config = ManagerConfig::from_env();
    let worker_config = WorkerConfig::from_env()?;

    info!(
        instance_type = %worker_config.instance_type,
        image = %worker_config.image,
        reject_stale_reports = manager_config.reject_stale_reports,
        "Starting metahost"
    );

    let bus = InMemoryBus::new();

    let manager = Manager::new(
        &manager_config,
        ManagerDeps {
            authorizer: Arc::new(LocalAuthorizer::new()),
            bus: Arc::new(bus.clone()),
            type_store: Arc::new(InMemoryStore::new()),
            instance_store: Arc::new(InMemoryStore::new()),
        },
    )?;
    manager.start().await?;

    let runtime = InMemoryContainerRuntime::new()
        .with_image(&worker_config.image, DEFAULT_EXPOSED_PORTS);
    let worker = Worker::new(
        worker_config,
        WorkerDeps {
            bus: Arc::new(bus.clone()),
            store: Arc::new(InMemoryStore::new()),
            runtime: Arc::new(runtime),
        },
    )?;
    let reconcile_loop = worker.start().await?;

    info!("metahost running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    reconcile_loop.abort();
    match manager.render_metrics() {
        Ok(metrics) => info!(%metrics, "Manager metrics at shutdown"),
        Err(error) => warn!(error = %error, "Cannot render manager metrics"),
    }
    info!("metahost stopped");
    Ok(())
}
