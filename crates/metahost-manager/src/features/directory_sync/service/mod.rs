use chrono::Utc;
use metahost_core::{Instance, InstanceType, Subject};
use std::sync::Arc;
use tracing::debug;

use crate::features::instance_management::repo::InstanceDirectory;
use crate::features::observability::service::ObservabilityService;
use crate::features::type_registry::service::TypeRegistry;
use crate::shared::error::ManagerResult;

/// Folds worker reports into the type registry and the instance directory.
pub struct DirectorySyncService {
    registry: Arc<TypeRegistry>,
    directory: InstanceDirectory,
    observability: Arc<ObservabilityService>,
    reject_stale_reports: bool,
}

impl DirectorySyncService {
    pub fn new(
        registry: Arc<TypeRegistry>,
        directory: InstanceDirectory,
        observability: Arc<ObservabilityService>,
    ) -> Self {
        Self {
            registry,
            directory,
            observability,
            reject_stale_reports: false,
        }
    }

    /// Drop `instance_info` reports older than the stored record instead of
    /// overwriting it.
    pub fn with_stale_report_guard(mut self, enabled: bool) -> Self {
        self.reject_stale_reports = enabled;
        self
    }

    pub async fn register_type(&self, descriptor: InstanceType) -> ManagerResult<bool> {
        let registered = self.registry.register(descriptor).await?;
        if registered {
            self.observability.record_report(Subject::InstanceType);
            let known = self.registry.get_all().await?.len();
            self.observability.set_known_types(known);
        }
        Ok(registered)
    }

    /// Upsert a reported instance, stamping `last_info`. Returns `false` when
    /// the stale guard dropped the report.
    pub async fn apply_instance_report(&self, mut instance: Instance) -> ManagerResult<bool> {
        if self.reject_stale_reports {
            if let Some(current) = self.directory.get(&instance.id).await? {
                if instance.ts < current.ts {
                    debug!(
                        instance_id = %instance.id,
                        reported_ts = %instance.ts,
                        stored_ts = %current.ts,
                        "Dropping stale instance report"
                    );
                    self.observability.record_dropped("stale_report");
                    return Ok(false);
                }
            }
        }

        instance.last_info = Some(Utc::now());
        debug!(instance_id = %instance.id, status = ?instance.status, "Applying instance report");
        self.directory.upsert(instance).await?;
        self.observability.record_report(Subject::InstanceInfo);
        Ok(true)
    }
}
