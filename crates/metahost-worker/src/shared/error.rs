use metahost_core::CoreError;
use thiserror::Error;

use crate::features::backend::runtime::RuntimeError;
use crate::features::port_pool::PoolError;

/// Worker specific errors
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("Port pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("Unknown backend '{0}'")]
    UnknownBackend(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Metrics error: {0}")]
    Metrics(String),
}

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;
