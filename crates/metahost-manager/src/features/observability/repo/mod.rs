use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};

pub struct ObservabilityRepository {
    registry: Registry,
    instances_created_total: Counter,
    instances_deleted_total: Counter,
    reports_applied_total: CounterVec,
    messages_dropped_total: CounterVec,
    known_types: Gauge,
}

impl ObservabilityRepository {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();

        let instances_created_total = Counter::with_opts(opts!(
            "metahost_instances_created_total",
            "Instances created through the facade"
        ))
        .map_err(|e| e.to_string())?;
        let instances_deleted_total = Counter::with_opts(opts!(
            "metahost_instances_deleted_total",
            "Delete requests issued through the facade"
        ))
        .map_err(|e| e.to_string())?;
        let reports_applied_total = CounterVec::new(
            opts!(
                "metahost_reports_applied_total",
                "Reports applied to the directory"
            ),
            &["subject"],
        )
        .map_err(|e| e.to_string())?;
        let messages_dropped_total = CounterVec::new(
            opts!(
                "metahost_messages_dropped_total",
                "Info channel messages dropped without being applied"
            ),
            &["reason"],
        )
        .map_err(|e| e.to_string())?;
        let known_types = Gauge::with_opts(opts!(
            "metahost_known_instance_types",
            "Instance types in the registry"
        ))
        .map_err(|e| e.to_string())?;

        registry
            .register(Box::new(instances_created_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(instances_deleted_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(reports_applied_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(messages_dropped_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(known_types.clone()))
            .map_err(|e| e.to_string())?;

        Ok(Self {
            registry,
            instances_created_total,
            instances_deleted_total,
            reports_applied_total,
            messages_dropped_total,
            known_types,
        })
    }

    pub fn inc_instances_created(&self) {
        self.instances_created_total.inc();
    }

    pub fn inc_instances_deleted(&self) {
        self.instances_deleted_total.inc();
    }

    pub fn inc_reports_applied(&self, subject: &str) {
        self.reports_applied_total.with_label_values(&[subject]).inc();
    }

    pub fn inc_messages_dropped(&self, reason: &str) {
        self.messages_dropped_total.with_label_values(&[reason]).inc();
    }

    pub fn set_known_types(&self, count: f64) {
        self.known_types.set(count);
    }

    pub fn messages_dropped(&self, reason: &str) -> f64 {
        self.messages_dropped_total.with_label_values(&[reason]).get()
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}
