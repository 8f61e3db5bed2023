//! Manifest to deployment spec translation

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::cluster::spec::{
    service_name, MountKind, MountSpec, NetworkAttachment, PortSpec, ServiceMode, ServiceSpec,
    IMAGE_LABEL, NAMESPACE_LABEL,
};
use crate::errors::ControllerError;
use crate::filesys::file::File;
use crate::manifest::compose::{Deploy, Manifest, Service};
use crate::manifest::envfile;
use crate::utils::home_dir;

/// Translates a manifest for one application
#[derive(Debug, Clone)]
pub struct Translator<'a> {
    app_name: &'a str,
    network_id: &'a str,
    /// Directory holding the manifest; relative env-file paths resolve here
    base_dir: &'a Path,
}

impl<'a> Translator<'a> {
    pub fn new(app_name: &'a str, network_id: &'a str, base_dir: &'a Path) -> Self {
        Self {
            app_name,
            network_id,
            base_dir,
        }
    }

    /// One spec per declared service, in service-name order
    pub async fn translate(&self, manifest: &Manifest) -> Result<Vec<ServiceSpec>, ControllerError> {
        let mut specs = Vec::with_capacity(manifest.services.len());
        for (name, service) in &manifest.services {
            specs.push(self.translate_service(name, service).await?);
        }
        info!(app = self.app_name, count = specs.len(), "Translated manifest services");
        Ok(specs)
    }

    async fn translate_service(
        &self,
        name: &str,
        service: &Service,
    ) -> Result<ServiceSpec, ControllerError> {
        let full_name = service_name(self.app_name, name);
        debug!(app = self.app_name, service = %full_name, "Translating service");

        if service.image.trim().is_empty() {
            return Err(ControllerError::ValidationError(format!(
                "service {} does not declare an image",
                name
            )));
        }

        let labels = HashMap::from([
            (IMAGE_LABEL.to_string(), service.image.clone()),
            (NAMESPACE_LABEL.to_string(), self.app_name.to_string()),
        ]);
        let container_labels =
            HashMap::from([(NAMESPACE_LABEL.to_string(), self.app_name.to_string())]);

        let env = self.environment(service).await?;

        let mounts = service
            .volumes
            .iter()
            .map(|m| parse_mount(m))
            .collect::<Result<Vec<_>, _>>()?;

        let ports = service
            .ports
            .iter()
            .map(|p| parse_port(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mode = parse_mode(name, &service.deploy)?;

        Ok(ServiceSpec {
            name: full_name,
            image: service.image.clone(),
            labels,
            container_labels,
            env,
            mounts,
            ports,
            mode,
            networks: vec![NetworkAttachment {
                target: self.network_id.to_string(),
                aliases: vec![name.to_string()],
            }],
        })
    }

    /// Env-files first, then inline entries; inline wins on collision.
    async fn environment(&self, service: &Service) -> Result<BTreeMap<String, String>, ControllerError> {
        let mut env = BTreeMap::new();
        for path in service.env_file.paths() {
            let resolved = resolve_path(path, self.base_dir);
            let contents = File::new(&resolved).read_string().await.map_err(|e| {
                ControllerError::ValidationError(format!(
                    "unable to read env file {}: {}",
                    resolved.display(),
                    e
                ))
            })?;
            let vars = envfile::parse(&contents);
            debug!(file = %resolved.display(), count = vars.len(), "Loaded env file");
            env.extend(vars);
        }
        env.extend(service.environment.pairs());
        Ok(env)
    }
}

/// Classify a `source:target` mount.
///
/// Sources starting with `.`, `~` or `/` are host paths and become
/// absolute bind mounts; anything else names a volume.
pub fn parse_mount(mount: &str) -> Result<MountSpec, ControllerError> {
    let fields: Vec<&str> = mount.split(':').collect();
    let [source, target] = fields.as_slice() else {
        return Err(ControllerError::ValidationError(format!(
            "invalid volume mount {:?}: expected source:target",
            mount
        )));
    };
    if source.is_empty() || target.is_empty() {
        return Err(ControllerError::ValidationError(format!(
            "invalid volume mount {:?}: empty source or target",
            mount
        )));
    }

    if source.starts_with('.') || source.starts_with('~') || source.starts_with('/') {
        let cwd = std::env::current_dir()?;
        let absolute = resolve_path(source, &cwd);
        return Ok(MountSpec {
            kind: MountKind::Bind,
            source: absolute.to_string_lossy().into_owned(),
            target: target.to_string(),
        });
    }

    Ok(MountSpec {
        kind: MountKind::Volume,
        source: source.to_string(),
        target: target.to_string(),
    })
}

/// Parse a `published:target` port mapping
pub fn parse_port(port: &str) -> Result<PortSpec, ControllerError> {
    let invalid = || {
        ControllerError::ValidationError(format!(
            "invalid port {:?}: expected published:target",
            port
        ))
    };
    let (published, target) = port.split_once(':').ok_or_else(invalid)?;
    Ok(PortSpec {
        published: published.trim().parse().map_err(|_| invalid())?,
        target: target.trim().parse().map_err(|_| invalid())?,
    })
}

/// Deployment mode; unknown modes leave the platform default.
pub fn parse_mode(service: &str, deploy: &Deploy) -> Result<Option<ServiceMode>, ControllerError> {
    match deploy.mode.as_str() {
        "replicated" => deploy
            .replicas
            .map(|n| Some(ServiceMode::Replicated(n)))
            .ok_or_else(|| {
                ControllerError::ValidationError(format!(
                    "service {} uses replicated mode without a replica count",
                    service
                ))
            }),
        "global" => Ok(Some(ServiceMode::Global)),
        _ => Ok(None),
    }
}

/// Expand `~`, then make the path absolute against `base` and drop `.`
/// and `..` components.
fn resolve_path(raw: &str, base: &Path) -> PathBuf {
    let expanded = match raw.strip_prefix('~') {
        Some(rest) => match home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    };
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
