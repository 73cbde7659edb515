//! Provisioning strategies and the static registry that selects one.

pub mod container;
pub mod runtime;

use async_trait::async_trait;
use metahost_core::Instance;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::features::local_instances::service::LocalInstanceManager;
use crate::features::port_pool::PortPool;
use crate::shared::error::{WorkerError, WorkerResult};
use container::ContainerBackend;
use runtime::ContainerRuntime;

pub const CONTAINER_BACKEND: &str = "container";

/// Whether the worker can take another instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Exhausted,
}

impl Availability {
    pub fn is_available(self) -> bool {
        matches!(self, Availability::Available)
    }

    pub fn describe(self) -> &'static str {
        match self {
            Availability::Available => "Worker available",
            Availability::Exhausted => "Worker unavailable, too many resources in use",
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Prepare the backend before the first command.
    async fn initialize(&self) -> WorkerResult<()>;

    async fn create_instance(&self, instance: Instance) -> WorkerResult<()>;

    async fn delete_instance(&self, instance: Instance) -> WorkerResult<()>;

    /// Poll the external runtime and align every local record with it.
    async fn reconcile(&self) -> WorkerResult<Availability>;

    /// Availability as of the last reconcile.
    fn availability(&self) -> Availability;
}

/// Everything a backend is constructed from.
#[derive(Clone)]
pub struct BackendContext {
    pub config: WorkerConfig,
    pub instances: Arc<LocalInstanceManager>,
    pub pool: Arc<PortPool>,
    pub runtime: Arc<dyn ContainerRuntime>,
}

pub type BackendConstructor = fn(BackendContext) -> Arc<dyn Backend>;

/// Compiled-in backends keyed by the identifier a worker is configured with.
pub struct BackendRegistry {
    constructors: BTreeMap<String, BackendConstructor>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(CONTAINER_BACKEND, container_backend);
        registry
    }
}

fn container_backend(context: BackendContext) -> Arc<dyn Backend> {
    Arc::new(ContainerBackend::new(context))
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, constructor: BackendConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn build(&self, name: &str, context: BackendContext) -> WorkerResult<Arc<dyn Backend>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| WorkerError::UnknownBackend(name.to_string()))?;
        Ok(constructor(context))
    }
}
