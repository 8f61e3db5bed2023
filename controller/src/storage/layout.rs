//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::ControllerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::utils::home_dir;

/// Storage layout for the controller
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Snapshot of registered applications
    pub fn applications_file(&self) -> File {
        File::new(self.base_dir.join("applications.json"))
    }

    /// Snapshot of private source credentials
    pub fn repositories_file(&self) -> File {
        File::new(self.base_dir.join("repositories.json"))
    }

    /// Git checkouts, one subdirectory per application
    pub fn sources_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("sources"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), ControllerError> {
        Dir::new(&self.base_dir).create().await?;
        self.sources_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".swarmsync");

        Self::new(base_dir)
    }
}
