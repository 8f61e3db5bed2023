//! Docker Swarm implementation of `ClusterApi`

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{
    EndpointPortConfig, EndpointPortConfigProtocolEnum, EndpointPortConfigPublishModeEnum,
    EndpointSpec, Mount, MountTypeEnum, NetworkAttachmentConfig, ServiceSpec as SwarmServiceSpec,
    ServiceSpecMode, ServiceSpecModeReplicated, TaskSpec, TaskSpecContainerSpec,
};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions, ListNetworksOptions};
use bollard::service::{ListServicesOptions, UpdateServiceOptions};
use bollard::volume::CreateVolumeOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::TryStreamExt;
use tracing::{debug, info};

use crate::cluster::spec::{MountKind, ServiceMode, ServiceSpec, VolumeSpec};
use crate::cluster::{ClusterApi, NetworkSummary, ServiceSummary};
use crate::errors::ControllerError;
use crate::models::credential::Credentials;
use crate::storage::settings::DockerSettings;

/// Docker Engine client talking to a swarm manager
pub struct SwarmApi {
    docker: Docker,
}

impl SwarmApi {
    pub fn connect(settings: &DockerSettings) -> Result<Self, ControllerError> {
        let docker =
            Docker::connect_with_socket(&settings.socket, settings.timeout_secs, API_DEFAULT_VERSION)?;
        info!("Connected to Docker Engine at {}", settings.socket);
        Ok(Self { docker })
    }
}

fn docker_credentials(auth: Option<&Credentials>) -> Option<DockerCredentials> {
    auth.map(|creds| DockerCredentials {
        username: Some(creds.username.clone()),
        password: Some(creds.password().to_string()),
        ..Default::default()
    })
}

/// Map a deployment spec onto the Engine API model
fn to_swarm_spec(spec: &ServiceSpec) -> SwarmServiceSpec {
    let mounts = spec
        .mounts
        .iter()
        .map(|m| Mount {
            typ: Some(match m.kind {
                MountKind::Bind => MountTypeEnum::BIND,
                MountKind::Volume => MountTypeEnum::VOLUME,
            }),
            source: Some(m.source.clone()),
            target: Some(m.target.clone()),
            ..Default::default()
        })
        .collect();

    let networks = spec
        .networks
        .iter()
        .map(|n| NetworkAttachmentConfig {
            target: Some(n.target.clone()),
            aliases: Some(n.aliases.clone()),
            ..Default::default()
        })
        .collect();

    let ports = spec
        .ports
        .iter()
        .map(|p| EndpointPortConfig {
            protocol: Some(EndpointPortConfigProtocolEnum::TCP),
            target_port: Some(i64::from(p.target)),
            published_port: Some(i64::from(p.published)),
            publish_mode: Some(EndpointPortConfigPublishModeEnum::INGRESS),
            ..Default::default()
        })
        .collect();

    let mode = spec.mode.map(|mode| match mode {
        ServiceMode::Replicated(replicas) => ServiceSpecMode {
            replicated: Some(ServiceSpecModeReplicated {
                replicas: Some(i64::try_from(replicas).unwrap_or(i64::MAX)),
            }),
            ..Default::default()
        },
        ServiceMode::Global => ServiceSpecMode {
            global: Some(HashMap::new()),
            ..Default::default()
        },
    });

    SwarmServiceSpec {
        name: Some(spec.name.clone()),
        labels: Some(spec.labels.clone()),
        task_template: Some(TaskSpec {
            container_spec: Some(TaskSpecContainerSpec {
                image: Some(spec.image.clone()),
                labels: Some(spec.container_labels.clone()),
                env: Some(spec.env_list()),
                mounts: Some(mounts),
                ..Default::default()
            }),
            networks: Some(networks),
            ..Default::default()
        }),
        mode,
        endpoint_spec: Some(EndpointSpec {
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterApi for SwarmApi {
    async fn list_services(&self) -> Result<Vec<ServiceSummary>, ControllerError> {
        let services = self
            .docker
            .list_services(None::<ListServicesOptions<String>>)
            .await?;

        Ok(services
            .into_iter()
            .map(|service| {
                let spec = service.spec.unwrap_or_default();
                let networks = spec
                    .task_template
                    .and_then(|t| t.networks)
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|n| n.target)
                    .collect();
                ServiceSummary {
                    id: service.id.unwrap_or_default(),
                    name: spec.name.unwrap_or_default(),
                    version: service.version.and_then(|v| v.index).unwrap_or_default(),
                    labels: spec.labels.unwrap_or_default(),
                    networks,
                }
            })
            .collect())
    }

    async fn create_service(
        &self,
        spec: &ServiceSpec,
        auth: Option<&Credentials>,
    ) -> Result<(String, Vec<String>), ControllerError> {
        let response = self
            .docker
            .create_service(to_swarm_spec(spec), docker_credentials(auth))
            .await?;
        Ok((response.id.unwrap_or_default(), response.warnings.unwrap_or_default()))
    }

    async fn update_service(
        &self,
        id: &str,
        version: u64,
        spec: &ServiceSpec,
        auth: Option<&Credentials>,
    ) -> Result<Vec<String>, ControllerError> {
        let options = UpdateServiceOptions {
            version,
            ..Default::default()
        };
        let response = self
            .docker
            .update_service(id, to_swarm_spec(spec), options, docker_credentials(auth))
            .await?;
        Ok(response.warnings.unwrap_or_default())
    }

    async fn remove_service(&self, id: &str) -> Result<(), ControllerError> {
        self.docker.delete_service(id).await?;
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<NetworkSummary>, ControllerError> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await?;
        Ok(networks
            .into_iter()
            .map(|n| NetworkSummary {
                id: n.id.unwrap_or_default(),
                name: n.name.unwrap_or_default(),
                labels: n.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_network(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> Result<String, ControllerError> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "overlay".to_string(),
            attachable: true,
            labels,
            ..Default::default()
        };
        self.docker.create_network(options).await?;

        let network = self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await?;
        network.id.ok_or_else(|| {
            ControllerError::ClusterError(format!("network {} was created without an id", name))
        })
    }

    async fn remove_network(&self, id: &str) -> Result<(), ControllerError> {
        self.docker.remove_network(id).await?;
        Ok(())
    }

    async fn pull_image(
        &self,
        image: &str,
        auth: Option<&Credentials>,
    ) -> Result<(), ControllerError> {
        debug!(image, "Pulling image");
        self.docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: image,
                    ..Default::default()
                }),
                None,
                docker_credentials(auth),
            )
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> Result<(), ControllerError> {
        let options = CreateVolumeOptions {
            name: spec.name.clone(),
            driver: if spec.driver.is_empty() {
                "local".to_string()
            } else {
                spec.driver.clone()
            },
            driver_opts: spec.driver_opts.clone(),
            labels: spec.labels.clone(),
        };
        match self.docker.create_volume(options).await {
            Ok(_) => Ok(()),
            Err(DockerError::DockerResponseServerError { status_code: 409, .. }) => {
                debug!(volume = %spec.name, "Volume already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
