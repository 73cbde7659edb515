use metahost_core::{InstanceType, Message, MessageBus, INFO_CHANNEL};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::WorkerConfig;
use crate::features::backend::{Availability, Backend};
use crate::features::observability::WorkerMetrics;
use crate::features::port_pool::PortPool;
use crate::shared::error::WorkerResult;

/// One reconcile pass plus the type announcement that follows it.
pub struct ReconcileService {
    config: WorkerConfig,
    backend: Arc<dyn Backend>,
    pool: Arc<PortPool>,
    bus: Arc<dyn MessageBus>,
    metrics: Arc<WorkerMetrics>,
}

impl ReconcileService {
    pub fn new(
        config: WorkerConfig,
        backend: Arc<dyn Backend>,
        pool: Arc<PortPool>,
        bus: Arc<dyn MessageBus>,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            config,
            backend,
            pool,
            bus,
            metrics,
        }
    }

    pub async fn run_once(&self) -> WorkerResult<Availability> {
        let started = Instant::now();
        let availability = self.backend.reconcile().await?;
        self.metrics.observe_reconcile(started.elapsed().as_secs_f64());
        self.metrics.set_free_ports(self.pool.free_count());
        self.metrics.set_availability(availability);
        debug!(
            available = availability.is_available(),
            free_ports = self.pool.free_count(),
            "Reconcile pass finished"
        );

        self.announce_type().await?;
        Ok(availability)
    }

    /// Publish this worker's type descriptor with its current availability.
    pub async fn announce_type(&self) -> WorkerResult<()> {
        let availability = self.backend.availability();
        self.bus
            .send(INFO_CHANNEL, &Message::instance_type(self.descriptor(availability)))
            .await?;
        Ok(())
    }

    pub fn descriptor(&self, availability: Availability) -> InstanceType {
        let mut descriptor = InstanceType::new(&self.config.instance_type, &self.config.description)
            .with_backend(&self.config.backend);
        descriptor.available = Some(availability.is_available());
        descriptor.status = Some(availability.describe().to_string());
        descriptor
    }
}
