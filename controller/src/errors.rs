//! Error types for the swarmsync controller

use thiserror::Error;

/// Main error type for the controller
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Docker error: {0}")]
    DockerError(#[from] bollard::errors::Error),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Source error: {0}")]
    SourceError(String),

    #[error("Cluster error: {0}")]
    ClusterError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

impl ControllerError {
    /// Errors a control loop absorbs into Degraded health and retries on the
    /// next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ControllerError::SourceError(_)
                | ControllerError::ClusterError(_)
                | ControllerError::DockerError(_)
                | ControllerError::Timeout(_)
                | ControllerError::IoError(_)
        )
    }
}
