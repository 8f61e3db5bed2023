//! Convergence of deployment specs against the live cluster

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cluster::spec::{network_name, ServiceSpec, VolumeSpec, NAMESPACE_LABEL};
use crate::cluster::{ClusterApi, ServiceSummary};
use crate::errors::ControllerError;
use crate::models::credential::Credentials;

/// Result of creating or updating one service
#[derive(Debug, Default)]
pub struct ServiceOutcome {
    pub warnings: Vec<String>,

    /// Set when the opportunistic image pull failed
    pub pull_error: Option<String>,
}

/// Cluster Adapter
#[derive(Clone)]
pub struct ClusterAdapter {
    api: Arc<dyn ClusterApi>,
    network_poll_interval: Duration,
}

impl ClusterAdapter {
    pub fn new(api: Arc<dyn ClusterApi>, network_poll_interval: Duration) -> Self {
        Self {
            api,
            network_poll_interval,
        }
    }

    /// Id of the application's private network, created if absent
    pub async fn ensure_network(&self, app_name: &str) -> Result<String, ControllerError> {
        let name = network_name(app_name);
        let networks = self.api.list_networks().await?;
        if let Some(existing) = networks.iter().find(|n| n.name == name) {
            debug!(app = app_name, network = %name, "Network already exists");
            return Ok(existing.id.clone());
        }

        let labels = HashMap::from([(NAMESPACE_LABEL.to_string(), app_name.to_string())]);
        let id = self.api.create_network(&name, labels).await?;
        info!(app = app_name, network = %name, id = %id, "Created network");
        Ok(id)
    }

    pub async fn ensure_volume(&self, spec: &VolumeSpec) -> Result<(), ControllerError> {
        self.api.create_volume(spec).await?;
        debug!(volume = %spec.name, "Volume ready");
        Ok(())
    }

    /// Update the service with the same name, or create it.
    ///
    /// The image pull runs alongside and never fails the call; its error
    /// is reported in the outcome.
    pub async fn create_or_update_service(
        &self,
        spec: &ServiceSpec,
        auth: Option<&Credentials>,
    ) -> Result<ServiceOutcome, ControllerError> {
        let (pulled, upserted) =
            tokio::join!(self.api.pull_image(&spec.image, auth), self.upsert(spec, auth));

        let warnings = upserted?;
        for warning in &warnings {
            warn!(service = %spec.name, "Cluster warning: {}", warning);
        }

        let pull_error = match pulled {
            Ok(()) => None,
            Err(e) => {
                warn!(service = %spec.name, image = %spec.image, "Image pull failed: {}", e);
                Some(format!("pull {}: {}", spec.image, e))
            }
        };

        Ok(ServiceOutcome {
            warnings,
            pull_error,
        })
    }

    async fn upsert(
        &self,
        spec: &ServiceSpec,
        auth: Option<&Credentials>,
    ) -> Result<Vec<String>, ControllerError> {
        let services = self.api.list_services().await?;
        match services.iter().find(|s| s.name == spec.name) {
            Some(existing) => {
                info!(service = %spec.name, "Updating service");
                self.api
                    .update_service(&existing.id, existing.version, spec, auth)
                    .await
            }
            None => {
                info!(service = %spec.name, "Creating service");
                let (id, warnings) = self.api.create_service(spec, auth).await?;
                debug!(service = %spec.name, id = %id, "Created service");
                Ok(warnings)
            }
        }
    }

    /// Remove namespaced services whose names are not in `keep`
    pub async fn prune_orphans(
        &self,
        app_name: &str,
        keep: &[String],
    ) -> Result<Vec<String>, ControllerError> {
        let mut removed = Vec::new();
        for service in self.namespaced_services(app_name).await? {
            if keep.contains(&service.name) {
                continue;
            }
            info!(app = app_name, service = %service.name, "Removing orphaned service");
            self.api.remove_service(&service.id).await?;
            removed.push(service.name);
        }
        Ok(removed)
    }

    /// Tear down an application: services first, then its networks.
    ///
    /// Returns once every removed network is confirmed gone, so that a
    /// following re-creation can reuse the network name.
    pub async fn remove_services_and_network(&self, app_name: &str) -> Result<(), ControllerError> {
        let services = self.namespaced_services(app_name).await?;
        let mut attached: BTreeSet<String> = BTreeSet::new();

        for service in &services {
            attached.extend(service.networks.iter().cloned());
            info!(app = app_name, service = %service.name, "Removing service");
            self.api.remove_service(&service.id).await?;
        }

        let default_name = network_name(app_name);
        let owned: Vec<String> = self
            .api
            .list_networks()
            .await?
            .into_iter()
            .filter(|n| {
                n.name == default_name
                    || (attached.contains(&n.id)
                        && n.labels.get(NAMESPACE_LABEL).map(String::as_str) == Some(app_name))
            })
            .map(|n| n.id)
            .collect();

        for id in owned {
            self.remove_network_and_wait(&id).await?;
        }

        info!(app = app_name, "Removed application resources");
        Ok(())
    }

    async fn namespaced_services(&self, app_name: &str) -> Result<Vec<ServiceSummary>, ControllerError> {
        Ok(self
            .api
            .list_services()
            .await?
            .into_iter()
            .filter(|s| s.labels.get(NAMESPACE_LABEL).map(String::as_str) == Some(app_name))
            .collect())
    }

    /// Tasks may still hold the network for a moment after their service is
    /// removed, so removal is retried until the network disappears.
    async fn remove_network_and_wait(&self, id: &str) -> Result<(), ControllerError> {
        loop {
            let present = self.api.list_networks().await?.iter().any(|n| n.id == id);
            if !present {
                info!(network = %id, "Network removed");
                return Ok(());
            }
            if let Err(e) = self.api.remove_network(id).await {
                debug!(network = %id, "Network not removed yet: {}", e);
            }
            tokio::time::sleep(self.network_poll_interval).await;
        }
    }
}
