//! Multi-service manifest document

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_yaml::Value;

use crate::cluster::spec::VolumeSpec;
use crate::errors::ControllerError;

/// Top-level manifest
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub version: Option<Value>,

    #[serde(default)]
    pub services: BTreeMap<String, Service>,

    #[serde(default)]
    pub networks: BTreeMap<String, Option<Network>>,

    #[serde(default)]
    pub volumes: BTreeMap<String, Option<Volume>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Service {
    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub ports: Vec<String>,

    #[serde(default)]
    pub deploy: Deploy,

    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub env_file: EnvFiles,

    #[serde(default)]
    pub volumes: Vec<String>,

    #[serde(default)]
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Deploy {
    #[serde(default)]
    pub mode: String,

    #[serde(default)]
    pub replicas: Option<u64>,
}

/// Inline environment, either a map or a list of `KEY=VALUE` strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    Map(BTreeMap<String, Value>),
    List(Vec<String>),
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Map(BTreeMap::new())
    }
}

impl Environment {
    /// Flatten to key/value pairs. A list entry without `=` gets an empty
    /// value.
    pub fn pairs(&self) -> Vec<(String, String)> {
        match self {
            Environment::Map(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), scalar_to_string(v)))
                .collect(),
            Environment::List(list) => list
                .iter()
                .map(|entry| match entry.split_once('=') {
                    Some((k, v)) => (k.trim().to_string(), v.to_string()),
                    None => (entry.trim().to_string(), String::new()),
                })
                .collect(),
        }
    }
}

/// `env_file` as a single path or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EnvFiles {
    One(String),
    Many(Vec<String>),
}

impl Default for EnvFiles {
    fn default() -> Self {
        EnvFiles::Many(Vec::new())
    }
}

impl EnvFiles {
    pub fn paths(&self) -> Vec<&str> {
        match self {
            EnvFiles::One(path) => vec![path.as_str()],
            EnvFiles::Many(paths) => paths.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Network {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub driver: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Volume {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub driver: Option<String>,

    #[serde(default)]
    pub driver_opts: HashMap<String, String>,

    #[serde(default)]
    pub labels: Vec<String>,
}

impl Manifest {
    pub fn parse(content: &str) -> Result<Self, ControllerError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Named volumes to create before services, with parsed labels
    pub fn volume_specs(&self) -> Result<Vec<VolumeSpec>, ControllerError> {
        let mut specs = Vec::with_capacity(self.volumes.len());
        for (key, volume) in &self.volumes {
            let volume = volume.clone().unwrap_or_default();
            let mut labels = HashMap::new();
            for label in &volume.labels {
                match label.split_once('=') {
                    Some((k, v)) if !k.trim().is_empty() && !v.contains('=') => {
                        labels.insert(k.trim().to_string(), v.trim().to_string());
                    }
                    _ => {
                        return Err(ControllerError::ValidationError(format!(
                            "invalid label {:?} on volume {}",
                            label, key
                        )))
                    }
                }
            }
            specs.push(VolumeSpec {
                name: volume.name.unwrap_or_else(|| key.clone()),
                driver: volume.driver.unwrap_or_default(),
                driver_opts: volume.driver_opts,
                labels,
            });
        }
        Ok(specs)
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
