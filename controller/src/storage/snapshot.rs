//! Snapshot persistence for the registry and the credential store
//!
//! Snapshots are opaque byte blobs: read once at startup and written once
//! at graceful shutdown.

use tracing::{debug, info};

use crate::errors::ControllerError;
use crate::filesys::file::File;
use crate::storage::layout::StorageLayout;

/// Reads and writes the two state snapshots in the data directory
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    applications: File,
    repositories: File,
}

impl SnapshotStore {
    pub fn new(layout: &StorageLayout) -> Self {
        Self {
            applications: layout.applications_file(),
            repositories: layout.repositories_file(),
        }
    }

    /// Application snapshot; empty when nothing was saved yet
    pub async fn load_applications(&self) -> Result<Vec<u8>, ControllerError> {
        Self::load(&self.applications).await
    }

    /// Credential snapshot; empty when nothing was saved yet
    pub async fn load_repositories(&self) -> Result<Vec<u8>, ControllerError> {
        Self::load(&self.repositories).await
    }

    pub async fn save_applications(&self, data: &[u8]) -> Result<(), ControllerError> {
        self.applications.write_atomic(data).await?;
        info!("Saved application snapshot to {}", self.applications.path().display());
        Ok(())
    }

    /// Saves the credential snapshot readable by the owner only.
    pub async fn save_repositories(&self, data: &[u8]) -> Result<(), ControllerError> {
        self.repositories.write_private(data).await?;
        info!("Saved repository snapshot to {}", self.repositories.path().display());
        Ok(())
    }

    async fn load(file: &File) -> Result<Vec<u8>, ControllerError> {
        if !file.exists().await {
            debug!("No snapshot at {}", file.path().display());
            return Ok(Vec::new());
        }
        file.read_bytes().await.map_err(|e| {
            ControllerError::StorageError(format!(
                "Unable to read snapshot {}: {}",
                file.path().display(),
                e
            ))
        })
    }
}
