//! Source Fetcher: retrieves manifest text for an application

pub mod git;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::errors::ControllerError;
use crate::models::application::Source;
use crate::models::credential::Credentials;

/// Manifest text and the directory it was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedManifest {
    pub content: String,
    /// Relative env-file paths in the manifest resolve against this
    pub base_dir: PathBuf,
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch `source.path` at `source.target_revision`.
    ///
    /// `creds` of `None` means unauthenticated access.
    async fn fetch(
        &self,
        app_name: &str,
        source: &Source,
        creds: Option<&Credentials>,
    ) -> Result<FetchedManifest, ControllerError>;

    /// Drop any local state kept for `app_name`
    async fn discard(&self, _app_name: &str) -> Result<(), ControllerError> {
        Ok(())
    }
}
