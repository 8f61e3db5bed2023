//! Reachability checks backed by the source fetcher and the cluster

use std::sync::Arc;

use async_trait::async_trait;

use crate::cluster::ClusterApi;
use crate::credentials::ReachabilityProbe;
use crate::errors::ControllerError;
use crate::models::credential::Credentials;
use crate::source::git::GitFetcher;

/// Lists remote heads for repositories and pulls images for registries
pub struct SourceProbe {
    git: GitFetcher,
    cluster: Arc<dyn ClusterApi>,
}

impl SourceProbe {
    pub fn new(git: GitFetcher, cluster: Arc<dyn ClusterApi>) -> Self {
        Self { git, cluster }
    }
}

#[async_trait]
impl ReachabilityProbe for SourceProbe {
    async fn check(
        &self,
        url: &str,
        image_ref: &str,
        creds: &Credentials,
    ) -> Result<(), ControllerError> {
        if !url.is_empty() {
            self.git.ls_remote(url, Some(creds)).await?;
        }
        if !image_ref.is_empty() {
            self.cluster.pull_image(image_ref, Some(creds)).await?;
        }
        Ok(())
    }
}
