//! Application models

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ControllerError;
use crate::filesys::file::File;
use crate::reconcile::fsm::{Health, HealthFsm};

/// Revision used when none is given
pub const DEFAULT_REVISION: &str = "HEAD";

/// Refresh timer used when none is given
pub const DEFAULT_REFRESH_TIMER: &str = "3m";

/// Where an application's manifest lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Git repository URL
    #[serde(rename = "repoURL")]
    pub repo_url: String,

    /// Branch name, or `HEAD` for the default branch
    #[serde(rename = "targetRevision", default)]
    pub target_revision: String,

    /// Manifest path inside the repository
    #[serde(default)]
    pub path: String,
}

/// Command that wakes a control loop before its timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    /// Manual refresh
    Synchronize,

    /// The application's source or timer changed
    UpdateSync,
}

/// Application specification as supplied by a caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSpec {
    pub name: String,

    #[serde(default)]
    pub refresh_timer: String,

    pub source: Source,
}

impl ApplicationSpec {
    pub fn new(
        name: impl Into<String>,
        repo_url: impl Into<String>,
        target_revision: impl Into<String>,
        path: impl Into<String>,
        refresh_timer: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            refresh_timer: refresh_timer.into(),
            source: Source {
                repo_url: repo_url.into(),
                target_revision: target_revision.into(),
                path: path.into(),
            },
        }
    }

    /// Validate untrusted input and fill defaults.
    ///
    /// The refresh timer is not parsed here: an unparsable
    /// timer suspends the application instead of rejecting it.
    pub fn validate(mut self) -> Result<Self, ControllerError> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(ControllerError::ValidationError(
                "application name is required".to_string(),
            ));
        }
        if !is_valid_name(&self.name) {
            return Err(ControllerError::ValidationError(format!(
                "application name {:?} must start with a letter or digit and contain only letters, digits, '_', '.' or '-'",
                self.name
            )));
        }

        self.source.repo_url = self.source.repo_url.trim().to_string();
        if self.source.repo_url.is_empty() {
            return Err(ControllerError::ValidationError(
                "the git repository is not specified".to_string(),
            ));
        }

        self.source.path = self.source.path.trim().to_string();
        if self.source.path.is_empty() {
            return Err(ControllerError::ValidationError(
                "the path to the manifest file is not specified".to_string(),
            ));
        }

        if self.source.target_revision.trim().is_empty() {
            self.source.target_revision = DEFAULT_REVISION.to_string();
        }
        if self.refresh_timer.trim().is_empty() {
            self.refresh_timer = DEFAULT_REFRESH_TIMER.to_string();
        }

        Ok(self)
    }

    /// Parse a spec from a `.yaml`, `.yml` or `.json` file
    pub async fn from_file(path: &Path) -> Result<Self, ControllerError> {
        let contents = File::new(path).read_string().await?;
        let spec = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)?,
            Some("json") => serde_json::from_str(&contents)?,
            _ => {
                return Err(ControllerError::ValidationError(format!(
                    "{}: only yaml and json application files are supported",
                    path.display()
                )))
            }
        };
        Ok(spec)
    }
}

/// Docker object-name charset: `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
///
/// The name becomes a directory under the sources dir and the prefix of
/// every cluster object the application owns.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_alphanumeric()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

impl From<&Application> for ApplicationSpec {
    fn from(app: &Application) -> Self {
        Self {
            name: app.name.clone(),
            refresh_timer: app.refresh_timer.clone(),
            source: app.source.clone(),
        }
    }
}

/// A managed deployment unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: u32,

    pub name: String,

    pub source: Source,

    /// Poll interval such as `"3m30s"`, re-read every cycle
    pub refresh_timer: String,

    #[serde(flatten)]
    pub status: HealthFsm,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub last_synced_at: DateTime<Utc>,

    /// Last manifest text applied to the cluster
    #[serde(skip)]
    live_state: String,
}

impl Application {
    /// Build a fresh application from a validated spec
    pub fn new(id: u32, spec: ApplicationSpec) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: spec.name,
            source: spec.source,
            refresh_timer: spec.refresh_timer,
            status: HealthFsm::new(),
            created_at: now,
            updated_at: now,
            last_synced_at: now,
            live_state: String::new(),
        }
    }

    pub fn health(&self) -> Health {
        self.status.health()
    }

    pub fn live_state(&self) -> &str {
        &self.live_state
    }

    pub(crate) fn record_applied(&mut self, manifest: String) {
        self.live_state = manifest;
        self.last_synced_at = Utc::now();
    }

    /// Lightweight status projection
    pub fn status_view(&self) -> AppStatus {
        AppStatus {
            id: self.id,
            name: self.name.clone(),
            health: self.health().to_string(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_synced_at: self.last_synced_at,
        }
    }
}

/// Row of the application list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    pub id: u32,
    pub name: String,
    pub health: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}
