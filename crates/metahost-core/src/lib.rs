pub mod authorization;
pub mod bus;
pub mod message;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use uuid::Uuid;

pub use authorization::Authorizer;
pub use bus::{MessageBus, MessageHandler};
pub use message::{Message, MessageError, Subject, INFO_CHANNEL};
pub use store::Store;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("Store error: {0}")]
    Store(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Authorization service error: {0}")]
    Authorization(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Invalid instance type: {0}")]
    InvalidInstanceType(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Lifecycle state owned by the worker that provisions the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Starting,
    Running,
    Stopped,
    Failed,
    Deleted,
}

impl InstanceStatus {
    /// Whether a worker may move an instance from `self` to `next`.
    ///
    /// Re-asserting the current state is always allowed so records can be
    /// refreshed and republished. `failed` and `stopped` only leave through an
    /// explicit delete, and nothing leaves `deleted`.
    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;

        if self == next {
            return true;
        }
        match (self, next) {
            (Deleted, _) => false,
            (_, Deleted) => true,
            (Starting, Running | Failed | Stopped) => true,
            (Running, Stopped) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceStatus::Deleted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manager-side marker for a request that has been issued but not yet
/// confirmed by the owning worker. Never written by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    Deleting,
}

/// Status as it travels on the wire and sits in the directory: either a
/// worker lifecycle state or a manager-side pending marker. Both serialize
/// to a bare string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportedStatus {
    Lifecycle(InstanceStatus),
    Pending(PendingAction),
}

impl ReportedStatus {
    pub fn lifecycle(self) -> Option<InstanceStatus> {
        match self {
            ReportedStatus::Lifecycle(status) => Some(status),
            ReportedStatus::Pending(_) => None,
        }
    }
}

impl From<InstanceStatus> for ReportedStatus {
    fn from(status: InstanceStatus) -> Self {
        ReportedStatus::Lifecycle(status)
    }
}

impl PartialEq<InstanceStatus> for ReportedStatus {
    fn eq(&self, other: &InstanceStatus) -> bool {
        self.lifecycle() == Some(*other)
    }
}

/// One host-side binding of a container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    #[serde(rename = "HostIp")]
    pub host_ip: String,
    #[serde(rename = "HostPort")]
    pub host_port: u16,
}

/// Container port (e.g. `8080/tcp`) to its host bindings.
pub type Connection = BTreeMap<String, Vec<PortBinding>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    #[serde(rename = "type")]
    pub instance_type: String,
    pub status: ReportedStatus,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_info: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<Connection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
}

impl Instance {
    pub fn new(id: impl Into<String>, instance_type: impl Into<String>, ts: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            instance_type: instance_type.into(),
            status: InstanceStatus::Starting.into(),
            ts,
            last_info: None,
            container_id: None,
            environment: None,
            connection: None,
            urls: None,
        }
    }

    pub fn lifecycle_status(&self) -> Option<InstanceStatus> {
        self.status.lifecycle()
    }

    /// Drop the fields that only make sense while the backing resource runs.
    pub fn clear_connection(&mut self) {
        self.connection = None;
        self.urls = None;
    }

    /// Host ports recorded in the connection info, in binding order.
    pub fn host_ports(&self) -> Vec<u16> {
        self.connection
            .iter()
            .flat_map(|connection| connection.values())
            .flatten()
            .map(|binding| binding.host_port)
            .collect()
    }
}

/// Descriptor of a provisionable category, keyed by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceType {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
}

impl InstanceType {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            backend: None,
            available: None,
            status: None,
            registered_at: None,
        }
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidInstanceType(
                "missing required field 'name'".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fresh globally unique instance id. Backed by random v4 UUIDs so concurrent
/// callers never contend on a shared counter.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Wall clock that never hands out the same instant twice.
///
/// Back-to-back calls within the platform clock resolution are pushed one
/// microsecond past the previous value.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let mut now = Utc::now();
        if let Some(previous) = *last {
            if now <= previous {
                now = previous + chrono::Duration::microseconds(1);
            }
        }
        *last = Some(now);
        now
    }
}
