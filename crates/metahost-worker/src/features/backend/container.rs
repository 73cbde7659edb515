//! Backend that runs every instance as a container publishing the image's
//! exposed ports on host ports taken from the worker's pool.

use async_trait::async_trait;
use metahost_core::{Connection, Instance, InstanceStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info, warn};

use super::runtime::{ContainerRuntime, ContainerSpec, ContainerState, RuntimeError};
use super::{Availability, Backend, BackendContext};
use crate::config::WorkerConfig;
use crate::features::local_instances::service::LocalInstanceManager;
use crate::features::port_pool::PortPool;
use crate::shared::error::WorkerResult;

const PORT_PLACEHOLDER: &str = "INJECT_PORT";

pub struct ContainerBackend {
    config: WorkerConfig,
    instances: Arc<LocalInstanceManager>,
    pool: Arc<PortPool>,
    runtime: Arc<dyn ContainerRuntime>,
    image_ports: OnceCell<Vec<String>>,
    available: AtomicBool,
    // commands and reconcile passes never interleave on the local records
    operations: Mutex<()>,
}

impl ContainerBackend {
    pub fn new(context: BackendContext) -> Self {
        Self {
            config: context.config,
            instances: context.instances,
            pool: context.pool,
            runtime: context.runtime,
            image_ports: OnceCell::new(),
            available: AtomicBool::new(true),
            operations: Mutex::new(()),
        }
    }

    /// Host ports each instance needs: one per exposed container port.
    pub fn required_ports(&self) -> usize {
        self.image_ports.get().map(Vec::len).unwrap_or(0)
    }

    async fn image_ports(&self) -> Result<&Vec<String>, RuntimeError> {
        self.image_ports
            .get_or_try_init(|| async {
                let ports = self.runtime.exposed_ports(&self.config.image).await?;
                info!(image = %self.config.image, ?ports, "Image ports resolved");
                Ok::<_, RuntimeError>(ports)
            })
            .await
    }

    fn apply_networking(&self, instance: &mut Instance, state: &ContainerState) {
        let mut connection = state.ports.clone();
        if let Some(host_ip) = &self.config.host_ip {
            for binding in connection.values_mut().flatten() {
                binding.host_ip = host_ip.clone();
            }
        }
        instance.urls = Some(build_urls(&self.config.url_scheme, &connection));
        instance.connection = Some(connection);
    }

    async fn fail(&self, instance: &mut Instance) -> WorkerResult<()> {
        self.instances
            .update_instance_status(instance, InstanceStatus::Failed, true)
            .await?;
        Ok(())
    }

    /// Remove the container behind a running instance and give its ports
    /// back. A container that is already gone counts as removed.
    async fn teardown(&self, instance: &Instance) -> WorkerResult<()> {
        let Some(container_id) = instance.container_id.as_deref() else {
            self.pool.release(&instance.host_ports());
            return Ok(());
        };

        let ports = match self.runtime.inspect(container_id).await {
            Ok(state) => state.host_ports(),
            Err(RuntimeError::NotFound(_)) => {
                info!(
                    instance_id = %instance.id,
                    %container_id,
                    "Container does not exist, not stopping it"
                );
                self.pool.release(&instance.host_ports());
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };

        match self.runtime.remove(container_id).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => {}
            Err(error) => return Err(error.into()),
        }
        self.pool.release(&ports);
        Ok(())
    }

    async fn resync_ports(&self) {
        match self.runtime.list().await {
            Ok(containers) => self.pool.update_used_ports(
                containers
                    .iter()
                    .filter(|container| container.running)
                    .flat_map(ContainerState::host_ports),
            ),
            Err(error) => warn!(error = %error, "Cannot list containers, port pool not resynced"),
        }
    }

    fn refresh_availability(&self) -> Availability {
        let required = self.required_ports();
        let available = required > 0 && self.pool.enough_left(required);
        self.available.store(available, Ordering::SeqCst);
        self.availability()
    }
}

#[async_trait]
impl Backend for ContainerBackend {
    async fn initialize(&self) -> WorkerResult<()> {
        let _guard = self.operations.lock().await;
        self.image_ports().await?;
        self.resync_ports().await;
        let availability = self.refresh_availability();
        info!(
            image = %self.config.image,
            required_ports = self.required_ports(),
            free_ports = self.pool.free_count(),
            available = availability.is_available(),
            "Container backend initialized"
        );
        Ok(())
    }

    async fn create_instance(&self, mut instance: Instance) -> WorkerResult<()> {
        let _guard = self.operations.lock().await;

        if self.instances.get_instance(&instance.id).await?.is_some() {
            info!(instance_id = %instance.id, "Instance already known, ignoring create");
            return Ok(());
        }
        info!(instance_id = %instance.id, "Creating instance");

        let image_ports = match self.image_ports().await {
            Ok(ports) => ports.clone(),
            Err(error) => {
                error!(instance_id = %instance.id, error = %error, "Cannot resolve image ports");
                return self.fail(&mut instance).await;
            }
        };

        if image_ports.is_empty() {
            warn!(instance_id = %instance.id, image = %self.config.image, "Image exposes no ports");
            return self.fail(&mut instance).await;
        }

        let ports = match self.pool.acquire(image_ports.len()) {
            Ok(ports) => ports,
            Err(error) => {
                warn!(instance_id = %instance.id, error = %error, "Not enough ports for instance");
                return self.fail(&mut instance).await;
            }
        };

        let environment = inject_ports(&self.config.environment, &ports);
        let spec = ContainerSpec {
            name: instance.id.clone(),
            image: self.config.image.clone(),
            environment: environment.clone(),
            port_bindings: image_ports.into_iter().zip(ports.iter().copied()).collect(),
        };

        let container_id = match self.runtime.create_and_start(spec).await {
            Ok(container_id) => container_id,
            Err(error) => {
                error!(instance_id = %instance.id, error = %error, "Container failed to start");
                self.pool.release(&ports);
                return self.fail(&mut instance).await;
            }
        };

        instance.container_id = Some(container_id.clone());
        instance.environment = Some(environment);
        match self.runtime.inspect(&container_id).await {
            Ok(state) => self.apply_networking(&mut instance, &state),
            Err(error) => {
                warn!(instance_id = %instance.id, error = %error, "Cannot read container networking");
                instance.clear_connection();
            }
        }

        self.instances
            .update_instance_status(&mut instance, InstanceStatus::Starting, true)
            .await?;
        Ok(())
    }

    async fn delete_instance(&self, command: Instance) -> WorkerResult<()> {
        let _guard = self.operations.lock().await;

        let Some(mut instance) = self.instances.get_instance(&command.id).await? else {
            info!(instance_id = %command.id, "Delete for unknown instance, ignoring");
            return Ok(());
        };

        match instance.lifecycle_status() {
            Some(InstanceStatus::Deleted) => {
                debug!(instance_id = %instance.id, "Instance already deleted, republishing");
                self.instances.publish_instance(&instance.id).await?;
                return Ok(());
            }
            Some(InstanceStatus::Running) => {
                info!(instance_id = %instance.id, "Deleting instance");
                self.teardown(&instance).await?;
            }
            status => {
                debug!(instance_id = %instance.id, ?status, "Instance not running, no teardown");
            }
        }

        instance.clear_connection();
        self.instances
            .update_instance_status(&mut instance, InstanceStatus::Deleted, true)
            .await?;
        Ok(())
    }

    async fn reconcile(&self) -> WorkerResult<Availability> {
        let _guard = self.operations.lock().await;

        for (instance_id, mut instance) in self.instances.get_instances().await? {
            let result = match instance.lifecycle_status() {
                Some(InstanceStatus::Deleted) => continue,
                Some(InstanceStatus::Failed) => self
                    .instances
                    .publish_instance(&instance_id)
                    .await
                    .map(|_| ()),
                _ => {
                    let state = match instance.container_id.as_deref() {
                        Some(container_id) => match self.runtime.inspect(container_id).await {
                            Ok(state) => Some(state),
                            Err(RuntimeError::NotFound(_)) => None,
                            Err(error) => {
                                warn!(%instance_id, error = %error, "Cannot inspect container, treating as gone");
                                None
                            }
                        },
                        None => None,
                    };

                    match state {
                        Some(state) if state.running => {
                            self.apply_networking(&mut instance, &state);
                            self.instances
                                .update_instance_status(&mut instance, InstanceStatus::Running, true)
                                .await
                                .map(|_| ())
                        }
                        _ => {
                            instance.clear_connection();
                            self.instances
                                .update_instance_status(&mut instance, InstanceStatus::Stopped, true)
                                .await
                                .map(|_| ())
                        }
                    }
                }
            };

            if let Err(error) = result {
                warn!(%instance_id, error = %error, "Failed to reconcile instance");
            }
        }

        self.resync_ports().await;
        Ok(self.refresh_availability())
    }

    fn availability(&self) -> Availability {
        if self.available.load(Ordering::SeqCst) {
            Availability::Available
        } else {
            Availability::Exhausted
        }
    }
}

/// Substitute acquired ports into every template carrying the placeholder,
/// in order. Once the ports run out the first one is reused.
pub fn inject_ports(templates: &[String], ports: &[u16]) -> Vec<String> {
    let Some(first) = ports.first() else {
        return templates.to_vec();
    };

    let mut next = 0;
    templates
        .iter()
        .map(|entry| {
            if !entry.contains(PORT_PLACEHOLDER) {
                return entry.clone();
            }
            let port = ports.get(next).unwrap_or(first);
            next += 1;
            entry.replace(PORT_PLACEHOLDER, &port.to_string())
        })
        .collect()
}

pub fn build_urls(scheme: &str, connection: &Connection) -> Vec<String> {
    connection
        .values()
        .flatten()
        .map(|binding| format!("{scheme}://{}:{}", binding.host_ip, binding.host_port))
        .collect()
}
