//! Settings file management

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ControllerError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs under the data directory
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    /// Docker Engine connection
    #[serde(default)]
    pub docker: DockerSettings,

    /// Reconciliation tuning
    #[serde(default)]
    pub reconcile: ReconcileSettings,

    /// Git client configuration
    #[serde(default)]
    pub git: GitSettings,

    /// Maximum delay for graceful shutdown in seconds
    #[serde(default = "default_max_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_shutdown_delay() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: true,
            docker: DockerSettings::default(),
            reconcile: ReconcileSettings::default(),
            git: GitSettings::default(),
            max_shutdown_delay_secs: default_max_shutdown_delay(),
        }
    }
}

impl Settings {
    /// Read settings from `file`, falling back to defaults when it does not
    /// exist.
    pub async fn load(file: &File) -> Result<Self, ControllerError> {
        if !file.exists().await {
            info!("No settings file at {}, using defaults", file.path().display());
            return Ok(Self::default());
        }

        file.read_json().await.map_err(|e| {
            ControllerError::ConfigError(format!(
                "Unable to read settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }
}

/// Docker Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerSettings {
    /// Path to the Docker Engine unix socket
    #[serde(default = "default_docker_socket")]
    pub socket: String,

    /// Request timeout in seconds
    #[serde(default = "default_docker_timeout")]
    pub timeout_secs: u64,
}

fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

fn default_docker_timeout() -> u64 {
    120
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            socket: default_docker_socket(),
            timeout_secs: default_docker_timeout(),
        }
    }
}

/// Reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Upper bound on one manifest fetch, in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Upper bound on one convergence pass, in seconds
    #[serde(default = "default_apply_timeout")]
    pub apply_timeout_secs: u64,

    /// Poll interval while waiting for a removed network to disappear
    #[serde(default = "default_network_poll_interval")]
    pub network_poll_interval_ms: u64,

    /// Remove namespaced services that the manifest no longer declares
    #[serde(default = "default_true")]
    pub prune_orphans: bool,
}

fn default_fetch_timeout() -> u64 {
    60
}

fn default_apply_timeout() -> u64 {
    300
}

fn default_network_poll_interval() -> u64 {
    500
}

impl ReconcileSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }

    pub fn network_poll_interval(&self) -> Duration {
        Duration::from_millis(self.network_poll_interval_ms)
    }
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout(),
            apply_timeout_secs: default_apply_timeout(),
            network_poll_interval_ms: default_network_poll_interval(),
            prune_orphans: true,
        }
    }
}

/// Git client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSettings {
    /// Git executable
    #[serde(default = "default_git_binary")]
    pub binary: String,
}

fn default_git_binary() -> String {
    "git".to_string()
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
        }
    }
}
