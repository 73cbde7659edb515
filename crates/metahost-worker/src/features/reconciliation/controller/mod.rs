use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::features::backend::Availability;
use crate::features::reconciliation::service::ReconcileService;
use crate::shared::error::WorkerResult;

/// Drives [`ReconcileService`] on a fixed interval, first pass one interval
/// after spawning. A tick that finds the previous pass still running is
/// skipped.
pub struct ReconcileController {
    service: Arc<ReconcileService>,
    interval: Duration,
    in_progress: Mutex<()>,
}

impl ReconcileController {
    pub fn new(service: Arc<ReconcileService>, interval: Duration) -> Self {
        Self {
            service,
            interval,
            in_progress: Mutex::new(()),
        }
    }

    pub fn spawn_periodic_reconcile(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;

                match self.tick().await {
                    Some(Ok(availability)) => {
                        debug!(available = availability.is_available(), "Periodic reconcile done")
                    }
                    Some(Err(error)) => warn!(error = %error, "Periodic reconcile failed"),
                    None => debug!("Previous reconcile still running, tick skipped"),
                }
            }
        })
    }

    /// Run one pass unless one is already in flight, in which case `None`.
    pub async fn tick(&self) -> Option<WorkerResult<Availability>> {
        let _guard = self.in_progress.try_lock().ok()?;
        Some(self.service.run_once().await)
    }

    pub async fn announce_type(&self) -> WorkerResult<()> {
        self.service.announce_type().await
    }
}
