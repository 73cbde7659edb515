use async_trait::async_trait;
use metahost_core::{Message, MessageHandler};
use std::sync::Arc;
use tracing::{error, warn};

use crate::features::directory_sync::service::DirectorySyncService;
use crate::features::observability::service::ObservabilityService;

/// Subscriber on the shared `info` channel.
///
/// Nothing here is ever retried: undecodable payloads and command subjects
/// are logged and dropped, and store failures are logged.
pub struct DirectorySyncController {
    service: Arc<DirectorySyncService>,
    observability: Arc<ObservabilityService>,
}

impl DirectorySyncController {
    pub fn new(service: Arc<DirectorySyncService>, observability: Arc<ObservabilityService>) -> Self {
        Self {
            service,
            observability,
        }
    }

    pub async fn dispatch(&self, message: Message) {
        match message {
            Message::InstanceType { instance_type } => {
                let name = instance_type.name.clone();
                if let Err(error) = self.service.register_type(instance_type).await {
                    error!(instance_type = %name, error = %error, "Failed to register reported type");
                }
            }
            Message::InstanceInfo { instance } => {
                let instance_id = instance.id.clone();
                if let Err(error) = self.service.apply_instance_report(instance).await {
                    error!(%instance_id, error = %error, "Failed to apply instance report");
                }
            }
            other => {
                warn!(subject = %other.subject(), "Command subject on info channel, dropping");
                self.observability.record_dropped("unexpected_subject");
            }
        }
    }
}

#[async_trait]
impl MessageHandler for DirectorySyncController {
    async fn handle(&self, payload: &[u8]) {
        match Message::decode(payload) {
            Ok(message) => self.dispatch(message).await,
            Err(error) => {
                warn!(error = %error, "Dropping undecodable report");
                self.observability.record_rejected(&error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::instance_management::repo::InstanceDirectory;
    use crate::features::type_registry::service::TypeRegistry;
    use chrono::Utc;
    use metahost_core::{Instance, InstanceType};
    use metahost_providers::InMemoryStore;

    struct Fixture {
        controller: DirectorySyncController,
        directory: InstanceDirectory,
        registry: Arc<TypeRegistry>,
        observability: Arc<ObservabilityService>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(TypeRegistry::new(Arc::new(InMemoryStore::new())));
        let directory = InstanceDirectory::new(Arc::new(InMemoryStore::new()));
        let observability = Arc::new(ObservabilityService::create().unwrap());
        let service = Arc::new(DirectorySyncService::new(
            registry.clone(),
            directory.clone(),
            observability.clone(),
        ));
        Fixture {
            controller: DirectorySyncController::new(service, observability.clone()),
            directory,
            registry,
            observability,
        }
    }

    #[tokio::test]
    async fn test_instance_info_is_applied() {
        let fixture = fixture();
        let payload = Message::instance_info(Instance::new("i-1", "web", Utc::now()))
            .encode()
            .unwrap();

        fixture.controller.handle(&payload).await;
        assert!(fixture.directory.get("i-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_instance_type_is_registered() {
        let fixture = fixture();
        let payload = Message::instance_type(InstanceType::new("web", "web servers"))
            .encode()
            .unwrap();

        fixture.controller.handle(&payload).await;
        assert!(fixture.registry.contains("web").await.unwrap());
    }

    #[tokio::test]
    async fn test_unrecognized_payloads_are_dropped() {
        let fixture = fixture();

        fixture.controller.handle(b"not json").await;
        fixture.controller.handle(br#"{"instance": {}}"#).await;
        fixture.controller.handle(br#"{"subject": "explode"}"#).await;
        fixture
            .controller
            .handle(br#"{"subject": "instance_info", "instance": {"id": 3}}"#)
            .await;

        assert!(fixture.directory.get_all().await.unwrap().is_empty());
        assert_eq!(fixture.observability.dropped_count("malformed"), 1.0);
        assert_eq!(fixture.observability.dropped_count("missing_subject"), 1.0);
        assert_eq!(fixture.observability.dropped_count("unknown_subject"), 1.0);
        assert_eq!(fixture.observability.dropped_count("invalid_payload"), 1.0);
    }

    #[tokio::test]
    async fn test_command_subjects_are_dropped() {
        let fixture = fixture();
        let payload = Message::create_instance(Instance::new("i-1", "web", Utc::now()))
            .encode()
            .unwrap();

        fixture.controller.handle(&payload).await;
        assert!(fixture.directory.get("i-1").await.unwrap().is_none());
        assert_eq!(fixture.observability.dropped_count("unexpected_subject"), 1.0);
    }

    #[tokio::test]
    async fn test_nameless_type_report_is_skipped() {
        let fixture = fixture();
        let payload = br#"{"subject": "instance_type", "type": {"description": "x"}}"#;

        fixture.controller.handle(payload).await;
        assert!(fixture.registry.get_all().await.unwrap().is_empty());
    }
}
