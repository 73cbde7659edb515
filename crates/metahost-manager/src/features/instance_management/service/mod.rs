use metahost_core::{
    generate_id, Authorizer, Instance, InstanceType, Message, MessageBus, MonotonicClock,
    PendingAction, ReportedStatus, INFO_CHANNEL,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::features::instance_management::repo::InstanceDirectory;
use crate::features::observability::service::ObservabilityService;
use crate::features::type_registry::service::TypeRegistry;
use crate::shared::error::ManagerResult;

/// Entry point for user intent.
///
/// Every per-user operation is guarded by the authorizer, and a denial is
/// indistinguishable from a missing instance. Writes never touch the
/// directory directly: they become commands on the type channel plus an
/// `instance_info` report that the synchronizer folds in.
pub struct InstanceFacade {
    authorizer: Arc<dyn Authorizer>,
    registry: Arc<TypeRegistry>,
    directory: InstanceDirectory,
    bus: Arc<dyn MessageBus>,
    observability: Arc<ObservabilityService>,
    clock: MonotonicClock,
}

impl InstanceFacade {
    pub fn new(
        authorizer: Arc<dyn Authorizer>,
        registry: Arc<TypeRegistry>,
        directory: InstanceDirectory,
        bus: Arc<dyn MessageBus>,
        observability: Arc<ObservabilityService>,
    ) -> Self {
        Self {
            authorizer,
            registry,
            directory,
            bus,
            observability,
            clock: MonotonicClock::new(),
        }
    }

    /// Administrative registration, not subject to authorization.
    pub async fn add_type(&self, name: &str, description: &str) -> ManagerResult<bool> {
        let registered = self
            .registry
            .register(InstanceType::new(name, description))
            .await?;
        if registered {
            let known = self.registry.get_all().await?.len();
            self.observability.set_known_types(known);
        }
        Ok(registered)
    }

    pub async fn get_types(&self) -> ManagerResult<HashMap<String, InstanceType>> {
        self.registry.get_all().await
    }

    pub async fn create_instance(
        &self,
        uid: &str,
        instance_type: &str,
    ) -> ManagerResult<Option<Instance>> {
        if !self.registry.contains(instance_type).await? {
            debug!(%uid, %instance_type, "Unknown instance type, nothing created");
            return Ok(None);
        }

        let instance = Instance::new(generate_id(), instance_type, self.clock.now());

        if !self.authorizer.make_owner(uid, &instance.id).await? {
            warn!(%uid, instance_id = %instance.id, "Ownership refused, instance not created");
            return Ok(None);
        }

        self.bus
            .send(instance_type, &Message::create_instance(instance.clone()))
            .await?;
        // the worker may already be provisioning; its own report will
        // bring the instance into the directory
        if let Err(error) = self
            .bus
            .send(INFO_CHANNEL, &Message::instance_info(instance.clone()))
            .await
        {
            warn!(
                %uid,
                instance_id = %instance.id,
                %instance_type,
                error = %error,
                "Create command dispatched but initial report failed"
            );
            return Err(error.into());
        }

        self.observability.record_created();
        info!(%uid, instance_id = %instance.id, %instance_type, "Instance creation requested");
        Ok(Some(instance))
    }

    pub async fn get_instance(&self, uid: &str, instance_id: &str) -> ManagerResult<Option<Instance>> {
        if !self.authorizer.is_user_instance(instance_id, uid).await? {
            debug!(%uid, %instance_id, "Instance not visible to user");
            return Ok(None);
        }
        self.directory.get(instance_id).await
    }

    /// Instances the user owns that the directory already knows about.
    ///
    /// The authorization view may run ahead of or behind the directory; ids
    /// without a directory entry are dropped.
    pub async fn get_all_instances(&self, uid: &str) -> ManagerResult<HashMap<String, Instance>> {
        let ids = self.authorizer.get_user_instances(uid).await?;
        let resolved = self.directory.resolve(&ids).await?;
        if resolved.len() < ids.len() {
            debug!(
                %uid,
                owned = ids.len(),
                resolved = resolved.len(),
                "Some owned instances are not in the directory"
            );
        }
        Ok(resolved)
    }

    pub async fn get_instances_of_type(
        &self,
        instance_type: &str,
        uid: &str,
    ) -> ManagerResult<HashMap<String, Instance>> {
        let mut instances = self.get_all_instances(uid).await?;
        instances.retain(|_, instance| instance.instance_type == instance_type);
        Ok(instances)
    }

    /// Request deletion. Returns `false` when the instance is unknown or not
    /// the user's. Repeating the request resends the command.
    pub async fn delete_instance(&self, uid: &str, instance_id: &str) -> ManagerResult<bool> {
        let Some(mut instance) = self.directory.get(instance_id).await? else {
            debug!(%uid, %instance_id, "Instance not in directory, not deleting it");
            return Ok(false);
        };

        if !self.authorizer.is_user_instance(instance_id, uid).await? {
            debug!(%uid, %instance_id, "Delete denied");
            return Ok(false);
        }

        if !self.authorizer.revoke_ownership(instance_id, uid).await? {
            warn!(%uid, %instance_id, "Ownership was not revoked, deleting anyway");
        }

        instance.status = ReportedStatus::Pending(PendingAction::Deleting);
        instance.ts = self.clock.now();

        self.bus
            .send(
                &instance.instance_type,
                &Message::delete_instance(instance.clone()),
            )
            .await?;
        self.bus
            .send(INFO_CHANNEL, &Message::instance_info(instance))
            .await?;

        self.observability.record_deleted();
        info!(%uid, %instance_id, "Instance deletion requested");
        Ok(true)
    }
}
