use crate::features::observability::repo::ObservabilityRepository;
use crate::shared::error::{ManagerError, ManagerResult};
use metahost_core::{MessageError, Subject};
use std::sync::Arc;

pub struct ObservabilityService {
    repo: Arc<ObservabilityRepository>,
}

impl ObservabilityService {
    pub fn new(repo: Arc<ObservabilityRepository>) -> Self {
        Self { repo }
    }

    /// Service over a fresh, private registry.
    pub fn create() -> ManagerResult<Self> {
        let repo = ObservabilityRepository::new().map_err(ManagerError::Metrics)?;
        Ok(Self::new(Arc::new(repo)))
    }

    pub fn record_created(&self) {
        self.repo.inc_instances_created();
    }

    pub fn record_deleted(&self) {
        self.repo.inc_instances_deleted();
    }

    pub fn record_report(&self, subject: Subject) {
        self.repo.inc_reports_applied(subject.as_str());
    }

    pub fn record_rejected(&self, error: &MessageError) {
        let reason = match error {
            MessageError::Malformed(_) => "malformed",
            MessageError::MissingSubject => "missing_subject",
            MessageError::UnknownSubject(_) => "unknown_subject",
            MessageError::InvalidPayload { .. } => "invalid_payload",
        };
        self.repo.inc_messages_dropped(reason);
    }

    pub fn record_dropped(&self, reason: &str) {
        self.repo.inc_messages_dropped(reason);
    }

    pub fn dropped_count(&self, reason: &str) -> f64 {
        self.repo.messages_dropped(reason)
    }

    pub fn set_known_types(&self, count: usize) {
        self.repo.set_known_types(count as f64);
    }

    pub fn render_metrics(&self) -> ManagerResult<String> {
        self.repo.render_metrics().map_err(ManagerError::Metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_metrics() {
        let service = ObservabilityService::create().unwrap();
        service.record_created();
        service.record_deleted();
        service.record_report(Subject::InstanceInfo);
        service.record_rejected(&MessageError::MissingSubject);
        service.set_known_types(3);

        let text = service.render_metrics().unwrap();
        assert!(text.contains("metahost_instances_created_total 1"));
        assert!(text.contains("metahost_instances_deleted_total 1"));
        assert!(text.contains("subject=\"instance_info\""));
        assert!(text.contains("reason=\"missing_subject\""));
        assert!(text.contains("metahost_known_instance_types 3"));
    }

    #[test]
    fn test_dropped_count_by_reason() {
        let service = ObservabilityService::create().unwrap();
        service.record_rejected(&MessageError::UnknownSubject("x".to_string()));
        service.record_rejected(&MessageError::UnknownSubject("y".to_string()));
        service.record_dropped("unexpected_subject");

        assert_eq!(service.dropped_count("unknown_subject"), 2.0);
        assert_eq!(service.dropped_count("unexpected_subject"), 1.0);
        assert_eq!(service.dropped_count("malformed"), 0.0);
    }
}
