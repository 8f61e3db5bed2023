//! Cluster Adapter
//!
//! `ClusterApi` is the thin boundary to the orchestration platform;
//! `ClusterAdapter` holds the convergence logic built on top of it.

pub mod adapter;
pub mod spec;
pub mod swarm;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::cluster::spec::{ServiceSpec, VolumeSpec};
use crate::errors::ControllerError;
use crate::models::credential::Credentials;

/// Service as listed by the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSummary {
    pub id: String,
    pub name: String,
    /// Object version required by updates
    pub version: u64,
    pub labels: HashMap<String, String>,
    /// Ids of attached networks
    pub networks: Vec<String>,
}

/// Network as listed by the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSummary {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// Primitive operations of the orchestration platform
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_services(&self) -> Result<Vec<ServiceSummary>, ControllerError>;

    /// Returns the new service id and any warnings
    async fn create_service(
        &self,
        spec: &ServiceSpec,
        auth: Option<&Credentials>,
    ) -> Result<(String, Vec<String>), ControllerError>;

    /// Returns warnings reported by the platform
    async fn update_service(
        &self,
        id: &str,
        version: u64,
        spec: &ServiceSpec,
        auth: Option<&Credentials>,
    ) -> Result<Vec<String>, ControllerError>;

    async fn remove_service(&self, id: &str) -> Result<(), ControllerError>;

    async fn list_networks(&self) -> Result<Vec<NetworkSummary>, ControllerError>;

    /// Creates an attachable overlay network and returns its id
    async fn create_network(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> Result<String, ControllerError>;

    async fn remove_network(&self, id: &str) -> Result<(), ControllerError>;

    async fn pull_image(
        &self,
        image: &str,
        auth: Option<&Credentials>,
    ) -> Result<(), ControllerError>;

    /// Succeeds when the volume already exists
    async fn create_volume(&self, spec: &VolumeSpec) -> Result<(), ControllerError>;
}
