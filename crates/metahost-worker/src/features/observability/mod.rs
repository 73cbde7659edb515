use prometheus::{
    histogram_opts, opts, CounterVec, Encoder, Gauge, Histogram, Registry, TextEncoder,
};

use crate::features::backend::Availability;
use crate::shared::error::{WorkerError, WorkerResult};

fn metrics_error(error: prometheus::Error) -> WorkerError {
    WorkerError::Metrics(error.to_string())
}

pub struct WorkerMetrics {
    registry: Registry,
    free_ports: Gauge,
    available: Gauge,
    reconcile_seconds: Histogram,
    commands_total: CounterVec,
}

impl WorkerMetrics {
    pub fn new() -> WorkerResult<Self> {
        let registry = Registry::new();

        let free_ports = Gauge::with_opts(opts!(
            "metahost_worker_free_ports",
            "Ports left in the worker's pool"
        ))
        .map_err(metrics_error)?;
        let available = Gauge::with_opts(opts!(
            "metahost_worker_available",
            "1 when the worker can take another instance"
        ))
        .map_err(metrics_error)?;
        let reconcile_seconds = Histogram::with_opts(histogram_opts!(
            "metahost_worker_reconcile_seconds",
            "Duration of a reconcile pass"
        ))
        .map_err(metrics_error)?;
        let commands_total = CounterVec::new(
            opts!("metahost_worker_commands_total", "Commands handled"),
            &["subject", "outcome"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(free_ports.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(available.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(reconcile_seconds.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(commands_total.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            free_ports,
            available,
            reconcile_seconds,
            commands_total,
        })
    }

    pub fn set_free_ports(&self, free: usize) {
        self.free_ports.set(free as f64);
    }

    pub fn set_availability(&self, availability: Availability) {
        self.available
            .set(if availability.is_available() { 1.0 } else { 0.0 });
    }

    pub fn observe_reconcile(&self, seconds: f64) {
        self.reconcile_seconds.observe(seconds);
    }

    pub fn record_command(&self, subject: &str, outcome: &str) {
        self.commands_total
            .with_label_values(&[subject, outcome])
            .inc();
    }

    pub fn commands(&self, subject: &str, outcome: &str) -> f64 {
        self.commands_total.with_label_values(&[subject, outcome]).get()
    }

    pub fn reconcile_count(&self) -> u64 {
        self.reconcile_seconds.get_sample_count()
    }

    pub fn render_metrics(&self) -> WorkerResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| WorkerError::Metrics(e.to_string()))
    }
}
