//! Credential Resolver: private git repositories and image registries

pub mod probe;
pub mod store;

use async_trait::async_trait;

use crate::errors::ControllerError;
use crate::models::credential::Credentials;

/// Checks whether a credentialed source can currently be contacted
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// `url` or `image_ref` may be empty, never both.
    async fn check(
        &self,
        url: &str,
        image_ref: &str,
        creds: &Credentials,
    ) -> Result<(), ControllerError>;
}
