//! Seam between the container backend and the engine that actually runs
//! containers.

use async_trait::async_trait;
use metahost_core::{generate_id, Connection, PortBinding};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("container '{0}' not found")]
    NotFound(String),
    #[error("image '{0}' not found")]
    ImageNotFound(String),
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
    #[error("{operation} failed: {reason}")]
    Failed { operation: String, reason: String },
}

/// What to run. `port_bindings` pairs a container port such as `8080/tcp`
/// with the host port it is published on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub environment: Vec<String>,
    pub port_bindings: Vec<(String, u16)>,
}

/// A container as the runtime currently sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub id: String,
    pub running: bool,
    pub ports: Connection,
}

impl ContainerState {
    pub fn host_ports(&self) -> Vec<u16> {
        self.ports
            .values()
            .flatten()
            .map(|binding| binding.host_port)
            .collect()
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Container ports the image exposes, e.g. `["8080/tcp"]`.
    async fn exposed_ports(&self, image: &str) -> Result<Vec<String>, RuntimeError>;

    /// Create and start a container, returning its id.
    async fn create_and_start(&self, spec: ContainerSpec) -> Result<String, RuntimeError>;

    async fn inspect(&self, container_id: &str) -> Result<ContainerState, RuntimeError>;

    /// Kill and remove.
    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Every container the runtime knows, including ones it did not start
    /// for us.
    async fn list(&self) -> Result<Vec<ContainerState>, RuntimeError>;
}

/// Runtime that keeps containers in memory. Used by the standalone binary
/// and by tests, which can also stop containers behind the backend's back
/// and inject failures.
#[derive(Debug, Default)]
pub struct InMemoryContainerRuntime {
    images: Mutex<HashMap<String, Vec<String>>>,
    containers: Mutex<HashMap<String, ContainerState>>,
    fail_create: AtomicBool,
    create_calls: AtomicUsize,
    remove_calls: AtomicUsize,
}

impl InMemoryContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, image: &str, exposed_ports: &[&str]) -> Self {
        lock(&self.images).insert(
            image.to_string(),
            exposed_ports.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    /// Make every following `create_and_start` fail.
    pub fn fail_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Simulate the container exiting on its own.
    pub fn stop(&self, container_id: &str) -> bool {
        match lock(&self.containers).get_mut(container_id) {
            Some(container) => {
                container.running = false;
                true
            }
            None => false,
        }
    }

    /// Simulate the container being removed out of band.
    pub fn vanish(&self, container_id: &str) -> bool {
        lock(&self.containers).remove(container_id).is_some()
    }

    /// Register a container the backend did not start.
    pub fn adopt(&self, state: ContainerState) {
        lock(&self.containers).insert(state.id.clone(), state);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn container_count(&self) -> usize {
        lock(&self.containers).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ContainerRuntime for InMemoryContainerRuntime {
    async fn exposed_ports(&self, image: &str) -> Result<Vec<String>, RuntimeError> {
        lock(&self.images)
            .get(image)
            .cloned()
            .ok_or_else(|| RuntimeError::ImageNotFound(image.to_string()))
    }

    async fn create_and_start(&self, spec: ContainerSpec) -> Result<String, RuntimeError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RuntimeError::Failed {
                operation: "create".to_string(),
                reason: format!("refusing to start '{}'", spec.name),
            });
        }

        let mut ports = Connection::new();
        for (container_port, host_port) in spec.port_bindings {
            ports.entry(container_port).or_default().push(PortBinding {
                host_ip: "0.0.0.0".to_string(),
                host_port,
            });
        }

        let id = generate_id();
        lock(&self.containers).insert(
            id.clone(),
            ContainerState {
                id: id.clone(),
                running: true,
                ports,
            },
        );
        Ok(id)
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerState, RuntimeError> {
        lock(&self.containers)
            .get(container_id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.containers)
            .remove(container_id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<ContainerState>, RuntimeError> {
        Ok(lock(&self.containers).values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(bindings: &[(&str, u16)]) -> ContainerSpec {
        ContainerSpec {
            name: "i-1".to_string(),
            image: "nginx:latest".to_string(),
            environment: vec![],
            port_bindings: bindings.iter().map(|(p, h)| (p.to_string(), *h)).collect(),
        }
    }

    #[tokio::test]
    async fn test_create_inspect_remove() {
        let runtime = InMemoryContainerRuntime::new();
        let id = runtime
            .create_and_start(spec(&[("80/tcp", 20000), ("443/tcp", 20001)]))
            .await
            .unwrap();

        let state = runtime.inspect(&id).await.unwrap();
        assert!(state.running);
        let mut ports = state.host_ports();
        ports.sort_unstable();
        assert_eq!(ports, vec![20000, 20001]);

        runtime.remove(&id).await.unwrap();
        assert_eq!(
            runtime.inspect(&id).await.unwrap_err(),
            RuntimeError::NotFound(id.clone())
        );
        assert!(matches!(
            runtime.remove(&id).await,
            Err(RuntimeError::NotFound(_))
        ));
        assert_eq!(runtime.remove_calls(), 2);
    }

    #[tokio::test]
    async fn test_exposed_ports() {
        let runtime = InMemoryContainerRuntime::new().with_image("nginx:latest", &["80/tcp"]);
        assert_eq!(
            runtime.exposed_ports("nginx:latest").await.unwrap(),
            vec!["80/tcp"]
        );
        assert!(matches!(
            runtime.exposed_ports("missing").await,
            Err(RuntimeError::ImageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_and_vanish() {
        let runtime = InMemoryContainerRuntime::new();
        let id = runtime.create_and_start(spec(&[])).await.unwrap();

        assert!(runtime.stop(&id));
        assert!(!runtime.inspect(&id).await.unwrap().running);
        assert!(runtime.vanish(&id));
        assert_eq!(runtime.container_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_create_failure() {
        let runtime = InMemoryContainerRuntime::new();
        runtime.fail_creates(true);

        assert!(runtime.create_and_start(spec(&[])).await.is_err());
        assert_eq!(runtime.create_calls(), 1);
        assert_eq!(runtime.container_count(), 0);
    }
}
