pub mod config;
pub mod features;
pub mod shared;

use metahost_core::{Authorizer, Instance, InstanceType, MessageBus, Store, INFO_CHANNEL};
use std::sync::Arc;
use tracing::info;

use config::ManagerConfig;
use features::directory_sync::controller::DirectorySyncController;
use features::directory_sync::service::DirectorySyncService;
use features::instance_management::repo::InstanceDirectory;
use features::instance_management::service::InstanceFacade;
use features::observability::service::ObservabilityService;
use features::type_registry::service::TypeRegistry;
use shared::error::ManagerResult;

/// Collaborators the manager is wired with.
pub struct ManagerDeps {
    pub authorizer: Arc<dyn Authorizer>,
    pub bus: Arc<dyn MessageBus>,
    pub type_store: Arc<dyn Store<InstanceType>>,
    pub instance_store: Arc<dyn Store<Instance>>,
}

/// Manager process: the facade plus the synchronizer feeding its directory.
pub struct Manager {
    facade: Arc<InstanceFacade>,
    directory: InstanceDirectory,
    synchronizer: Arc<DirectorySyncController>,
    bus: Arc<dyn MessageBus>,
    observability: Arc<ObservabilityService>,
}

impl Manager {
    pub fn new(config: &ManagerConfig, deps: ManagerDeps) -> ManagerResult<Self> {
        let observability = Arc::new(ObservabilityService::create()?);
        let registry = Arc::new(TypeRegistry::new(deps.type_store));
        let directory = InstanceDirectory::new(deps.instance_store);

        let facade = Arc::new(InstanceFacade::new(
            deps.authorizer,
            registry.clone(),
            directory.clone(),
            deps.bus.clone(),
            observability.clone(),
        ));

        let sync_service = Arc::new(
            DirectorySyncService::new(registry, directory.clone(), observability.clone())
                .with_stale_report_guard(config.reject_stale_reports),
        );
        let synchronizer = Arc::new(DirectorySyncController::new(
            sync_service,
            observability.clone(),
        ));

        Ok(Self {
            facade,
            directory,
            synchronizer,
            bus: deps.bus,
            observability,
        })
    }

    /// Subscribe the synchronizer to the info channel.
    pub async fn start(&self) -> ManagerResult<()> {
        self.bus
            .subscribe(INFO_CHANNEL, self.synchronizer.clone())
            .await?;
        info!(channel = INFO_CHANNEL, "Directory synchronizer subscribed");
        Ok(())
    }

    pub fn facade(&self) -> Arc<InstanceFacade> {
        Arc::clone(&self.facade)
    }

    /// Read access to the directory, unfiltered by ownership.
    pub fn directory(&self) -> &InstanceDirectory {
        &self.directory
    }

    pub fn render_metrics(&self) -> ManagerResult<String> {
        self.observability.render_metrics()
    }
}
