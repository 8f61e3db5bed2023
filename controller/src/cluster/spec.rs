//! Normalized deployment spec types
//!
//! Derived each reconciliation cycle from the fetched manifest and never
//! persisted.

use std::collections::{BTreeMap, HashMap};

/// Label naming the application that owns a cluster object
pub const NAMESPACE_LABEL: &str = "com.docker.stack.namespace";

/// Label carrying the image a service was declared with
pub const IMAGE_LABEL: &str = "com.docker.stack.image";

/// Name of an application's private network
pub fn network_name(app_name: &str) -> String {
    format!("{}_default", app_name)
}

/// Namespaced service name
pub fn service_name(app_name: &str, service: &str) -> String {
    format!("{}_{}", app_name, service)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Bind,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub kind: MountKind,
    pub source: String,
    pub target: String,
}

/// TCP port published through the ingress mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    pub published: u32,
    pub target: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMode {
    Replicated(u64),
    Global,
}

/// Network attachment of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub target: String,
    pub aliases: Vec<String>,
}

/// One service ready to be created or updated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// `{app}_{service}`
    pub name: String,

    pub image: String,

    /// Service-level labels
    pub labels: HashMap<String, String>,

    /// Container-level labels
    pub container_labels: HashMap<String, String>,

    /// Sorted by key
    pub env: BTreeMap<String, String>,

    pub mounts: Vec<MountSpec>,

    pub ports: Vec<PortSpec>,

    /// `None` leaves the platform default
    pub mode: Option<ServiceMode>,

    pub networks: Vec<NetworkAttachment>,
}

impl ServiceSpec {
    /// Environment in `KEY=VALUE` form
    pub fn env_list(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}

/// Named volume declared at manifest top level
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeSpec {
    pub name: String,
    pub driver: String,
    pub driver_opts: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}
