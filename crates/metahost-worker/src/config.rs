use std::time::Duration;

use crate::shared::error::{WorkerError, WorkerResult};

pub const DEFAULT_PORT_MIN: u16 = 20000;
pub const DEFAULT_PORT_MAX: u16 = 20099;
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 10;

/// Worker settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Instance type this worker serves; also the command channel name.
    pub instance_type: String,
    pub description: String,
    pub backend: String,
    pub image: String,
    /// `KEY=VALUE` templates; `INJECT_PORT` is replaced by an acquired port.
    pub environment: Vec<String>,
    /// Address advertised in connection info instead of the runtime's.
    pub host_ip: Option<String>,
    pub url_scheme: String,
    pub port_min: u16,
    pub port_max: u16,
    pub reconcile_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            instance_type: "web".to_string(),
            description: String::new(),
            backend: "container".to_string(),
            image: "nginx:latest".to_string(),
            environment: Vec::new(),
            host_ip: None,
            url_scheme: "http".to_string(),
            port_min: DEFAULT_PORT_MIN,
            port_max: DEFAULT_PORT_MAX,
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> WorkerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> WorkerResult<Self> {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let config = Self {
            instance_type: non_empty("WORKER_TYPE").unwrap_or(defaults.instance_type),
            description: lookup("WORKER_DESCRIPTION").unwrap_or(defaults.description),
            backend: non_empty("WORKER_BACKEND").unwrap_or(defaults.backend),
            image: non_empty("WORKER_IMAGE").unwrap_or(defaults.image),
            environment: lookup("WORKER_ENV")
                .map(|raw| parse_environment(&raw))
                .unwrap_or(defaults.environment),
            host_ip: non_empty("WORKER_IP"),
            url_scheme: non_empty("WORKER_URL_SCHEME").unwrap_or(defaults.url_scheme),
            port_min: lookup("WORKER_PORT_MIN")
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(defaults.port_min),
            port_max: lookup("WORKER_PORT_MAX")
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(defaults.port_max),
            reconcile_interval: lookup("WORKER_RECONCILE_INTERVAL_SECS")
                .and_then(|value| value.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> WorkerResult<()> {
        if self.port_min > self.port_max {
            return Err(WorkerError::Config(format!(
                "empty port range {}-{}",
                self.port_min, self.port_max
            )));
        }
        Ok(())
    }
}

fn parse_environment(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(ToString::to_string)
        .collect()
}
