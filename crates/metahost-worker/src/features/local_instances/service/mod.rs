use metahost_core::{
    Instance, InstanceStatus, Message, MessageBus, MonotonicClock, Store, INFO_CHANNEL,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::shared::error::WorkerResult;

/// The worker's own record of the instances it provisions.
///
/// Every status change goes through [`LocalInstanceManager::update_instance_status`],
/// which refuses transitions the lifecycle does not allow and publishes the
/// stored record on the info channel.
pub struct LocalInstanceManager {
    store: Arc<dyn Store<Instance>>,
    bus: Arc<dyn MessageBus>,
    clock: MonotonicClock,
}

impl LocalInstanceManager {
    pub fn new(store: Arc<dyn Store<Instance>>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            store,
            bus,
            clock: MonotonicClock::new(),
        }
    }

    pub async fn get_instance(&self, instance_id: &str) -> WorkerResult<Option<Instance>> {
        Ok(self.store.get(instance_id).await?)
    }

    pub async fn get_instances(&self) -> WorkerResult<HashMap<String, Instance>> {
        Ok(self.store.get_all().await?)
    }

    /// Stamp `ts` and upsert.
    pub async fn set_instance(&self, instance: &mut Instance) -> WorkerResult<()> {
        instance.ts = self.clock.now();
        self.store.update(&instance.id, instance.clone()).await?;
        Ok(())
    }

    /// Move `instance` to `status`, persist it and, if `publish` is set,
    /// report it.
    ///
    /// The transition is checked against the stored record. A refused
    /// transition leaves the store untouched, republishes the stored record
    /// when `publish` is set and returns `false`.
    pub async fn update_instance_status(
        &self,
        instance: &mut Instance,
        status: InstanceStatus,
        publish: bool,
    ) -> WorkerResult<bool> {
        let current = self
            .store
            .get(&instance.id)
            .await?
            .and_then(|stored| stored.lifecycle_status());

        if let Some(current) = current {
            if !current.can_transition_to(status) {
                warn!(
                    instance_id = %instance.id,
                    from = %current,
                    to = %status,
                    "Refusing lifecycle transition"
                );
                if publish {
                    self.publish_instance(&instance.id).await?;
                }
                return Ok(false);
            }
        }

        instance.status = status.into();
        self.set_instance(instance).await?;
        debug!(instance_id = %instance.id, %status, "Instance status updated");

        if publish {
            self.publish_instance(&instance.id).await?;
        }
        Ok(true)
    }

    /// Report the stored record on the info channel. Returns `false` when the
    /// instance is no longer known locally.
    pub async fn publish_instance(&self, instance_id: &str) -> WorkerResult<bool> {
        let Some(instance) = self.get_instance(instance_id).await? else {
            debug!(%instance_id, "Instance gone before publish, skipping");
            return Ok(false);
        };
        self.bus
            .send(INFO_CHANNEL, &Message::instance_info(instance))
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use metahost_providers::{InMemoryBus, InMemoryStore};
    use tokio_test::assert_err;

    fn manager() -> (LocalInstanceManager, InMemoryBus) {
        let bus = InMemoryBus::recording();
        let manager = LocalInstanceManager::new(Arc::new(InMemoryStore::new()), Arc::new(bus.clone()));
        (manager, bus)
    }

    fn reported(bus: &InMemoryBus) -> Vec<Instance> {
        bus.sent_on(INFO_CHANNEL)
            .into_iter()
            .filter_map(|m| match m {
                Message::InstanceInfo { instance } => Some(instance),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_set_instance_stamps_increasing_ts() {
        let (manager, _) = manager();
        let mut instance = Instance::new("i-1", "web", Utc::now());

        manager.set_instance(&mut instance).await.unwrap();
        let first = manager.get_instance("i-1").await.unwrap().unwrap().ts;
        manager.set_instance(&mut instance).await.unwrap();
        let second = manager.get_instance("i-1").await.unwrap().unwrap().ts;

        assert!(second > first);
        assert_eq!(instance.ts, second);
    }

    #[tokio::test]
    async fn test_update_status_persists_and_publishes() {
        let (manager, bus) = manager();
        let mut instance = Instance::new("i-1", "web", Utc::now());

        assert!(manager
            .update_instance_status(&mut instance, InstanceStatus::Running, true)
            .await
            .unwrap());

        let stored = manager.get_instance("i-1").await.unwrap().unwrap();
        assert_eq!(stored.status, InstanceStatus::Running);
        let reports = reported(&bus);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0], stored);
    }

    #[tokio::test]
    async fn test_update_status_without_publish() {
        let (manager, bus) = manager();
        let mut instance = Instance::new("i-1", "web", Utc::now());

        manager
            .update_instance_status(&mut instance, InstanceStatus::Failed, false)
            .await
            .unwrap();
        assert!(bus.sent().is_empty());
        assert_eq!(manager.get_instances().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_leaves_deleted() {
        let (manager, bus) = manager();
        let mut instance = Instance::new("i-1", "web", Utc::now());
        manager
            .update_instance_status(&mut instance, InstanceStatus::Deleted, false)
            .await
            .unwrap();

        let mut stale = Instance::new("i-1", "web", Utc::now());
        let applied = manager
            .update_instance_status(&mut stale, InstanceStatus::Stopped, true)
            .await
            .unwrap();

        assert!(!applied);
        let stored = manager.get_instance("i-1").await.unwrap().unwrap();
        assert_eq!(stored.status, InstanceStatus::Deleted);
        // the refusal republishes what is actually stored
        assert_eq!(reported(&bus)[0].status, InstanceStatus::Deleted);
    }

    #[tokio::test]
    async fn test_publish_missing_instance_is_skipped() {
        let (manager, bus) = manager();
        assert!(!manager.publish_instance("nope").await.unwrap());
        assert!(bus.sent().is_empty());
    }

    #[tokio::test]
    async fn test_publish_surfaces_transport_errors() {
        let (manager, bus) = manager();
        let mut instance = Instance::new("i-1", "web", Utc::now());
        manager.set_instance(&mut instance).await.unwrap();
        bus.set_unavailable(true);

        assert_err!(manager.publish_instance("i-1").await);
    }
}
