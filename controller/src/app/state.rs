//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use crate::cluster::adapter::ClusterAdapter;
use crate::cluster::swarm::SwarmApi;
use crate::cluster::ClusterApi;
use crate::credentials::probe::SourceProbe;
use crate::credentials::store::CredentialStore;
use crate::credentials::ReachabilityProbe;
use crate::errors::ControllerError;
use crate::reconcile::control_loop::Reconciler;
use crate::registry::Registry;
use crate::source::git::GitFetcher;
use crate::source::SourceFetcher;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::storage::snapshot::SnapshotStore;

/// Main application state
pub struct AppState {
    /// Application registry
    pub registry: Arc<Registry>,

    /// Credentials for private sources
    pub credentials: Arc<CredentialStore>,

    /// Snapshot persistence
    pub snapshots: SnapshotStore,
}

impl AppState {
    /// Connect to the cluster and build the state from the data directory
    pub async fn init(layout: &StorageLayout, settings: &Settings) -> Result<Self, ControllerError> {
        info!("Initializing application state...");

        let cluster: Arc<dyn ClusterApi> = Arc::new(SwarmApi::connect(&settings.docker)?);
        let git = GitFetcher::new(settings.git.binary.clone(), layout.sources_dir());

        let probe: Arc<dyn ReachabilityProbe> =
            Arc::new(SourceProbe::new(git.clone(), cluster.clone()));

        Self::with_collaborators(layout, settings, Arc::new(git), cluster, Some(probe)).await
    }

    /// Build the state around the given source fetcher and cluster client
    pub async fn with_collaborators(
        layout: &StorageLayout,
        settings: &Settings,
        fetcher: Arc<dyn SourceFetcher>,
        cluster: Arc<dyn ClusterApi>,
        probe: Option<Arc<dyn ReachabilityProbe>>,
    ) -> Result<Self, ControllerError> {
        let credentials = Arc::new(CredentialStore::new(probe));
        let adapter = ClusterAdapter::new(cluster, settings.reconcile.network_poll_interval());
        let reconciler = Arc::new(Reconciler::new(
            fetcher,
            adapter,
            credentials.clone(),
            settings.reconcile.clone(),
        ));
        let registry = Arc::new(Registry::new(reconciler));
        let snapshots = SnapshotStore::new(layout);

        let state = Self {
            registry,
            credentials,
            snapshots,
        };
        state.load().await;
        Ok(state)
    }

    /// Restore both snapshots; unreadable ones start empty
    async fn load(&self) {
        match self.snapshots.load_repositories().await {
            Ok(data) => match self.credentials.restore(&data) {
                Ok(count) => info!("Restored {} credentials", count),
                Err(e) => warn!("Ignoring unreadable repository snapshot: {}", e),
            },
            Err(e) => warn!("{}", e),
        }

        match self.snapshots.load_applications().await {
            Ok(data) => {
                if let Err(e) = self.registry.restore(&data) {
                    warn!("Ignoring unreadable application snapshot: {}", e);
                }
            }
            Err(e) => warn!("{}", e),
        }
    }

    /// Stop every control loop, then persist both snapshots
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        info!("Shutting down application state...");
        self.registry.shutdown().await;

        self.snapshots
            .save_applications(&self.registry.snapshot()?)
            .await?;
        self.snapshots
            .save_repositories(&self.credentials.snapshot()?)
            .await?;
        Ok(())
    }
}
