use metahost_core::{Instance, Store};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::shared::error::ManagerResult;

/// The manager's eventually consistent view of all instances, keyed by id.
///
/// Only the directory synchronizer writes here; the facade reads.
#[derive(Clone)]
pub struct InstanceDirectory {
    store: Arc<dyn Store<Instance>>,
}

impl InstanceDirectory {
    pub fn new(store: Arc<dyn Store<Instance>>) -> Self {
        Self { store }
    }

    pub async fn get(&self, instance_id: &str) -> ManagerResult<Option<Instance>> {
        Ok(self.store.get(instance_id).await?)
    }

    pub async fn get_all(&self) -> ManagerResult<HashMap<String, Instance>> {
        Ok(self.store.get_all().await?)
    }

    /// Last-write-wins upsert keyed by the instance id.
    pub async fn upsert(&self, instance: Instance) -> ManagerResult<()> {
        let id = instance.id.clone();
        Ok(self.store.update(&id, instance).await?)
    }

    /// Resolve each id, silently skipping the ones the directory does not hold.
    pub async fn resolve(&self, ids: &HashSet<String>) -> ManagerResult<HashMap<String, Instance>> {
        let mut resolved = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(instance) = self.store.get(id).await? {
                resolved.insert(id.clone(), instance);
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use metahost_core::InstanceStatus;
    use metahost_providers::InMemoryStore;

    fn directory() -> InstanceDirectory {
        InstanceDirectory::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let directory = directory();
        directory
            .upsert(Instance::new("i-1", "web", Utc::now()))
            .await
            .unwrap();

        let stored = directory.get("i-1").await.unwrap().unwrap();
        assert_eq!(stored.instance_type, "web");
        assert!(directory.get("i-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let directory = directory();
        let mut instance = Instance::new("i-1", "web", Utc::now());
        directory.upsert(instance.clone()).await.unwrap();

        instance.status = InstanceStatus::Running.into();
        directory.upsert(instance).await.unwrap();

        let stored = directory.get("i-1").await.unwrap().unwrap();
        assert_eq!(stored.status, InstanceStatus::Running);
        assert_eq!(directory.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_skips_unknown_ids() {
        let directory = directory();
        directory
            .upsert(Instance::new("known", "web", Utc::now()))
            .await
            .unwrap();

        let ids: HashSet<String> = ["known", "missing"].iter().map(|s| s.to_string()).collect();
        let resolved = directory.resolve(&ids).await.unwrap();

        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains_key("known"));
    }
}
