//! Credential models

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Stored credential entry for a private git repository or image
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Git repository URL; empty for image-only entries
    #[serde(default)]
    pub url: String,

    /// Container image reference; empty for repository-only entries
    #[serde(default, rename = "imageRef")]
    pub image_ref: String,

    /// base64 of `username:password`
    pub secret: String,

    /// Outcome of the last reachability probe
    #[serde(default)]
    pub reachable: bool,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("url", &self.url)
            .field("image_ref", &self.image_ref)
            .field("secret", &"[REDACTED]")
            .field("reachable", &self.reachable)
            .finish()
    }
}

impl CredentialRecord {
    pub fn summary(&self) -> CredentialSummary {
        CredentialSummary {
            url: self.url.clone(),
            image_ref: self.image_ref.clone(),
            reachable: self.reachable,
        }
    }
}

/// Decoded username and password
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

/// Credential entry without its secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSummary {
    pub url: String,

    #[serde(rename = "imageRef")]
    pub image_ref: String,

    pub reachable: bool,
}
