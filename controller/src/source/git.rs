//! Git-backed source fetcher
//!
//! Each application gets a shallow working copy under the sources
//! directory. Credentials travel only in the URL of the single `git`
//! invocation that needs them and are never stored in the checkout.

use std::path::{Component, Path};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use crate::errors::ControllerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::application::{Source, DEFAULT_REVISION};
use crate::models::credential::Credentials;
use crate::source::{FetchedManifest, SourceFetcher};

const REDACTED: &str = "***";

/// Fetches manifests with the `git` CLI
#[derive(Debug, Clone)]
pub struct GitFetcher {
    binary: String,
    sources_dir: Dir,
}

impl GitFetcher {
    pub fn new(binary: impl Into<String>, sources_dir: Dir) -> Self {
        Self {
            binary: binary.into(),
            sources_dir,
        }
    }

    /// Check that a repository answers with the given credentials
    pub async fn ls_remote(
        &self,
        repo_url: &str,
        creds: Option<&Credentials>,
    ) -> Result<(), ControllerError> {
        self.sources_dir.create().await?;
        let url = authenticated_url(repo_url, creds);
        self.run_git(
            self.sources_dir.path(),
            &["ls-remote", "--heads", url.as_str()],
            creds,
        )
        .await?;
        Ok(())
    }

    /// Working copy of `app_name`, which must be a single plain path component
    fn checkout_dir(&self, app_name: &str) -> Result<Dir, ControllerError> {
        let mut components = Path::new(app_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.sources_dir.subdir(app_name)),
            _ => Err(ControllerError::ValidationError(format!(
                "application name {:?} is not a valid checkout directory",
                app_name
            ))),
        }
    }

    async fn run_git(
        &self,
        cwd: &Path,
        args: &[&str],
        creds: Option<&Credentials>,
    ) -> Result<String, ControllerError> {
        // Never print the arguments: they may carry credentials.
        debug!("Running git {}", args.first().copied().unwrap_or_default());

        let output = Command::new(&self.binary)
            .current_dir(cwd)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ControllerError::SourceError(format!("Failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ControllerError::SourceError(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                redact(stderr.trim(), creds)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(
        &self,
        app_name: &str,
        source: &Source,
        creds: Option<&Credentials>,
    ) -> Result<FetchedManifest, ControllerError> {
        let manifest_path = checked_manifest_path(&source.path)?;
        info!(app = app_name, repo = %source.repo_url, path = %source.path, "Fetching manifest");

        let workdir = self.checkout_dir(app_name)?;
        workdir.create().await?;
        if !workdir.subdir(".git").exists().await {
            self.run_git(workdir.path(), &["init", "--quiet"], None).await?;
        }

        let revision = if source.target_revision.is_empty() {
            DEFAULT_REVISION
        } else {
            source.target_revision.as_str()
        };
        let url = authenticated_url(&source.repo_url, creds);
        self.run_git(
            workdir.path(),
            &["fetch", "--quiet", "--depth", "1", "--no-tags", url.as_str(), revision],
            creds,
        )
        .await?;
        self.run_git(
            workdir.path(),
            &["checkout", "--quiet", "--force", "FETCH_HEAD"],
            None,
        )
        .await?;

        let file = File::new(workdir.path().join(manifest_path));
        if !file.exists().await {
            return Err(ControllerError::SourceError(format!(
                "path {} not found in {}",
                source.path, source.repo_url
            )));
        }
        let content = file.read_string().await?;
        let base_dir = file
            .path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| workdir.path().to_path_buf());

        Ok(FetchedManifest { content, base_dir })
    }

    async fn discard(&self, app_name: &str) -> Result<(), ControllerError> {
        self.checkout_dir(app_name)?.delete().await
    }
}

/// Reject manifest paths escaping the checkout
fn checked_manifest_path(path: &str) -> Result<&Path, ControllerError> {
    let candidate = Path::new(path);
    let escapes = candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if path.is_empty() || escapes {
        return Err(ControllerError::ValidationError(format!(
            "manifest path {:?} must be relative to the repository root",
            path
        )));
    }
    Ok(candidate)
}

/// Embed basic-auth credentials into an http(s) URL.
///
/// Other URL forms (ssh, local paths) are returned untouched.
fn authenticated_url(repo_url: &str, creds: Option<&Credentials>) -> String {
    let Some(creds) = creds else {
        return repo_url.to_string();
    };
    match Url::parse(repo_url) {
        Ok(mut url) if matches!(url.scheme(), "http" | "https") => {
            if url.set_username(&creds.username).is_err()
                || url.set_password(Some(creds.password())).is_err()
            {
                return repo_url.to_string();
            }
            url.to_string()
        }
        _ => repo_url.to_string(),
    }
}

fn redact(message: &str, creds: Option<&Credentials>) -> String {
    let Some(creds) = creds else {
        return message.to_string();
    };
    let password = creds.password();
    if password.is_empty() {
        return message.to_string();
    }
    let mut redacted = message.replace(password, REDACTED);
    // Url percent-encodes reserved characters
    if let Ok(mut url) = Url::parse("http://host/") {
        if url.set_password(Some(password)).is_ok() {
            if let Some(encoded) = url.password() {
                redacted = redacted.replace(encoded, REDACTED);
            }
        }
    }
    redacted
}
