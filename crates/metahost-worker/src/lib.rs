pub mod config;
pub mod features;
pub mod shared;

use metahost_core::{Instance, MessageBus, Store};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use config::WorkerConfig;
use features::backend::runtime::ContainerRuntime;
use features::backend::{Availability, Backend, BackendContext, BackendRegistry};
use features::commands::controller::CommandController;
use features::local_instances::service::LocalInstanceManager;
use features::observability::WorkerMetrics;
use features::port_pool::PortPool;
use features::reconciliation::controller::ReconcileController;
use features::reconciliation::service::ReconcileService;
use shared::error::WorkerResult;

/// Collaborators a worker is wired with.
pub struct WorkerDeps {
    pub bus: Arc<dyn MessageBus>,
    pub store: Arc<dyn Store<Instance>>,
    pub runtime: Arc<dyn ContainerRuntime>,
}

/// A worker process serving one instance type.
pub struct Worker {
    config: WorkerConfig,
    bus: Arc<dyn MessageBus>,
    instances: Arc<LocalInstanceManager>,
    pool: Arc<PortPool>,
    backend: Arc<dyn Backend>,
    commands: Arc<CommandController>,
    reconciler: Arc<ReconcileController>,
    metrics: Arc<WorkerMetrics>,
}

impl Worker {
    pub fn new(config: WorkerConfig, deps: WorkerDeps) -> WorkerResult<Self> {
        Self::with_registry(config, deps, &BackendRegistry::default())
    }

    /// Resolve the configured backend from `registry`.
    pub fn with_registry(
        config: WorkerConfig,
        deps: WorkerDeps,
        registry: &BackendRegistry,
    ) -> WorkerResult<Self> {
        config.validate()?;

        let pool = Arc::new(PortPool::new(config.port_min, config.port_max)?);
        let instances = Arc::new(LocalInstanceManager::new(deps.store, deps.bus.clone()));
        let backend = registry.build(
            &config.backend,
            BackendContext {
                config: config.clone(),
                instances: instances.clone(),
                pool: pool.clone(),
                runtime: deps.runtime,
            },
        )?;
        let metrics = Arc::new(WorkerMetrics::new()?);

        let commands = Arc::new(CommandController::new(
            config.instance_type.clone(),
            backend.clone(),
            metrics.clone(),
        ));
        let service = Arc::new(ReconcileService::new(
            config.clone(),
            backend.clone(),
            pool.clone(),
            deps.bus.clone(),
            metrics.clone(),
        ));
        let reconciler = Arc::new(ReconcileController::new(service, config.reconcile_interval));

        Ok(Self {
            config,
            bus: deps.bus,
            instances,
            pool,
            backend,
            commands,
            reconciler,
            metrics,
        })
    }

    /// Initialize the backend, subscribe to the type channel, announce the
    /// type and start the periodic reconcile.
    pub async fn start(&self) -> WorkerResult<JoinHandle<()>> {
        self.backend.initialize().await?;
        self.metrics.set_free_ports(self.pool.free_count());
        self.metrics.set_availability(self.backend.availability());

        self.bus
            .subscribe(&self.config.instance_type, self.commands.clone())
            .await?;
        self.reconciler.announce_type().await?;

        info!(
            instance_type = %self.config.instance_type,
            backend = %self.config.backend,
            interval_secs = self.config.reconcile_interval.as_secs(),
            "Worker started"
        );
        Ok(self.reconciler.clone().spawn_periodic_reconcile())
    }

    /// Run a reconcile pass now. When a periodic pass is already running the
    /// last known availability is returned instead.
    pub async fn reconcile(&self) -> WorkerResult<Availability> {
        match self.reconciler.tick().await {
            Some(result) => result,
            None => Ok(self.backend.availability()),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn instances(&self) -> Arc<LocalInstanceManager> {
        Arc::clone(&self.instances)
    }

    pub fn pool(&self) -> Arc<PortPool> {
        Arc::clone(&self.pool)
    }

    pub fn render_metrics(&self) -> WorkerResult<String> {
        self.metrics.render_metrics()
    }
}
