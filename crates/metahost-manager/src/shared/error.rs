use metahost_core::CoreError;
use thiserror::Error;

/// Manager specific errors
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl ManagerError {
    /// Whether the failure came from the message transport rather than a store.
    pub fn is_transport(&self) -> bool {
        matches!(self, ManagerError::Core(CoreError::Transport(_)))
    }
}

pub type ManagerResult<T> = std::result::Result<T, ManagerError>;
