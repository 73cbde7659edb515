use chrono::Utc;
use metahost_core::{InstanceType, Store};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::shared::error::ManagerResult;

/// Authoritative mapping of type name to descriptor.
pub struct TypeRegistry {
    store: Arc<dyn Store<InstanceType>>,
}

impl TypeRegistry {
    pub fn new(store: Arc<dyn Store<InstanceType>>) -> Self {
        Self { store }
    }

    /// Upsert a descriptor by name, stamping `registered_at`.
    ///
    /// A descriptor without a name is logged and skipped; that is reported
    /// as `Ok(false)`, not as an error.
    pub async fn register(&self, mut descriptor: InstanceType) -> ManagerResult<bool> {
        if let Err(error) = descriptor.validate() {
            warn!(error = %error, ?descriptor, "Rejecting instance type registration");
            return Ok(false);
        }

        descriptor.registered_at = Some(Utc::now());
        let name = descriptor.name.clone();
        self.store.update(&name, descriptor).await?;

        debug!(instance_type = %name, "Registered instance type");
        Ok(true)
    }

    pub async fn get_all(&self) -> ManagerResult<HashMap<String, InstanceType>> {
        Ok(self.store.get_all().await?)
    }

    pub async fn get(&self, name: &str) -> ManagerResult<Option<InstanceType>> {
        Ok(self.store.get(name).await?)
    }

    pub async fn contains(&self, name: &str) -> ManagerResult<bool> {
        Ok(self.get(name).await?.is_some())
    }
}
