use async_trait::async_trait;
use metahost_core::{Instance, Message, MessageHandler};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::features::backend::Backend;
use crate::features::observability::WorkerMetrics;

/// Subscriber on the worker's type channel; hands commands to the backend.
pub struct CommandController {
    instance_type: String,
    backend: Arc<dyn Backend>,
    metrics: Arc<WorkerMetrics>,
}

impl CommandController {
    pub fn new(
        instance_type: impl Into<String>,
        backend: Arc<dyn Backend>,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            instance_type: instance_type.into(),
            backend,
            metrics,
        }
    }

    pub async fn dispatch(&self, message: Message) {
        let subject = message.subject();
        let (instance, create) = match message {
            Message::CreateInstance { instance } => (instance, true),
            Message::DeleteInstance { instance } => (instance, false),
            other => {
                debug!(subject = %other.subject(), "Report on command channel, ignoring");
                self.metrics.record_command(subject.as_str(), "ignored");
                return;
            }
        };

        if !self.accepts(&instance) {
            warn!(
                instance_id = %instance.id,
                instance_type = %instance.instance_type,
                served = %self.instance_type,
                "Command for another instance type, ignoring"
            );
            self.metrics.record_command(subject.as_str(), "ignored");
            return;
        }

        let instance_id = instance.id.clone();
        let result = if create {
            self.backend.create_instance(instance).await
        } else {
            self.backend.delete_instance(instance).await
        };

        match result {
            Ok(()) => self.metrics.record_command(subject.as_str(), "ok"),
            Err(err) => {
                error!(%instance_id, %subject, error = %err, "Command failed");
                self.metrics.record_command(subject.as_str(), "error");
            }
        }
    }

    fn accepts(&self, instance: &Instance) -> bool {
        instance.instance_type == self.instance_type
    }
}

#[async_trait]
impl MessageHandler for CommandController {
    async fn handle(&self, payload: &[u8]) {
        match Message::decode(payload) {
            Ok(message) => self.dispatch(message).await,
            Err(err) => {
                warn!(error = %err, "Dropping undecodable command");
                self.metrics.record_command("unknown", "rejected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::backend::Availability;
    use crate::shared::error::WorkerResult;
    use chrono::Utc;
    use metahost_core::{CoreError, InstanceType};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        async fn initialize(&self) -> WorkerResult<()> {
            Ok(())
        }

        async fn create_instance(&self, instance: Instance) -> WorkerResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(("create".to_string(), instance.id));
            if self.fail {
                return Err(CoreError::Store("down".to_string()).into());
            }
            Ok(())
        }

        async fn delete_instance(&self, instance: Instance) -> WorkerResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(("delete".to_string(), instance.id));
            Ok(())
        }

        async fn reconcile(&self) -> WorkerResult<Availability> {
            Ok(Availability::Available)
        }

        fn availability(&self) -> Availability {
            Availability::Available
        }
    }

    fn controller(fail: bool) -> (CommandController, Arc<RecordingBackend>, Arc<WorkerMetrics>) {
        let backend = Arc::new(RecordingBackend {
            fail,
            ..RecordingBackend::default()
        });
        let metrics = Arc::new(WorkerMetrics::new().unwrap());
        (
            CommandController::new("web", backend.clone(), metrics.clone()),
            backend,
            metrics,
        )
    }

    fn payload(message: Message) -> Vec<u8> {
        message.encode().unwrap()
    }

    #[tokio::test]
    async fn test_routes_commands_to_backend() {
        let (controller, backend, metrics) = controller(false);
        let instance = Instance::new("i-1", "web", Utc::now());

        controller
            .handle(&payload(Message::create_instance(instance.clone())))
            .await;
        controller
            .handle(&payload(Message::delete_instance(instance)))
            .await;

        assert_eq!(
            *backend.calls.lock().unwrap(),
            vec![
                ("create".to_string(), "i-1".to_string()),
                ("delete".to_string(), "i-1".to_string())
            ]
        );
        assert_eq!(metrics.commands("create_instance", "ok"), 1.0);
        assert_eq!(metrics.commands("delete_instance", "ok"), 1.0);
    }

    #[tokio::test]
    async fn test_backend_errors_are_counted() {
        let (controller, _, metrics) = controller(true);
        controller
            .handle(&payload(Message::create_instance(Instance::new(
                "i-1",
                "web",
                Utc::now(),
            ))))
            .await;

        assert_eq!(metrics.commands("create_instance", "error"), 1.0);
    }

    #[tokio::test]
    async fn test_foreign_type_and_reports_are_ignored() {
        let (controller, backend, metrics) = controller(false);

        controller
            .handle(&payload(Message::create_instance(Instance::new(
                "i-1",
                "db",
                Utc::now(),
            ))))
            .await;
        controller
            .handle(&payload(Message::instance_type(InstanceType::new("web", ""))))
            .await;
        controller.handle(b"{\"subject\": 42}").await;

        assert!(backend.calls.lock().unwrap().is_empty());
        assert_eq!(metrics.commands("create_instance", "ignored"), 1.0);
        assert_eq!(metrics.commands("instance_type", "ignored"), 1.0);
        assert_eq!(metrics.commands("unknown", "rejected"), 1.0);
    }
}
