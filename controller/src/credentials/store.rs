//! In-memory credential store

use std::sync::{Arc, RwLock};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::{debug, info, warn};

use crate::credentials::ReachabilityProbe;
use crate::errors::ControllerError;
use crate::models::credential::{CredentialRecord, CredentialSummary, Credentials};

/// Normalize a repository URL so that `url`, `url/` and `url.git` compare
/// equal.
pub fn url_key(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    trimmed.trim_end_matches('/').to_string()
}

/// Normalize an image reference by dropping its digest and tag.
///
/// A colon before the last `/` is a registry port and is kept.
pub fn image_key(image: &str) -> String {
    let image = image.trim();
    let image = image.split_once('@').map(|(name, _)| name).unwrap_or(image);
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].find(':') {
        Some(colon) => image[..name_start + colon].to_string(),
        None => image.to_string(),
    }
}

fn encode_secret(username: &str, password: &str) -> String {
    BASE64.encode(format!("{}:{}", username, password))
}

fn decode_secret(secret: &str) -> Option<Credentials> {
    let bytes = BASE64.decode(secret).ok()?;
    let pair = String::from_utf8(bytes).ok()?;
    let (username, password) = pair.split_once(':')?;
    Some(Credentials::new(username, password))
}

fn record_matches(record: &CredentialRecord, url: &str, image_ref: &str) -> bool {
    url_key(&record.url) == url_key(url) && image_key(&record.image_ref) == image_key(image_ref)
}

/// Credential records keyed by normalized source identity
pub struct CredentialStore {
    records: Arc<RwLock<Vec<CredentialRecord>>>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CredentialStore {
    pub fn new(probe: Option<Arc<dyn ReachabilityProbe>>) -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            probe,
        }
    }

    /// Store a credential and verify reachability in the background.
    pub fn add(
        &self,
        url: &str,
        image_ref: &str,
        username: &str,
        password: &str,
    ) -> Result<(), ControllerError> {
        if url.trim().is_empty() && image_ref.trim().is_empty() {
            return Err(ControllerError::ValidationError(
                "a repository URL or an image reference is required".to_string(),
            ));
        }
        if username.is_empty() || password.is_empty() {
            return Err(ControllerError::ValidationError(
                "username and password are required".to_string(),
            ));
        }

        {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            if records.iter().any(|r| record_matches(r, url, image_ref)) {
                return Err(ControllerError::AlreadyExists(format!(
                    "credential for {}{}",
                    url, image_ref
                )));
            }
            records.push(CredentialRecord {
                url: url.trim().to_string(),
                image_ref: image_ref.trim().to_string(),
                secret: encode_secret(username, password),
                reachable: true,
            });
        }

        info!(url, image_ref, "Added credential");
        self.spawn_probe(url, image_ref, Credentials::new(username, password));
        Ok(())
    }

    /// Replace the secret of an existing record
    pub fn update(
        &self,
        url: &str,
        image_ref: &str,
        username: &str,
        password: &str,
    ) -> Result<(), ControllerError> {
        {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            let record = records
                .iter_mut()
                .find(|r| record_matches(r, url, image_ref))
                .ok_or_else(|| {
                    ControllerError::NotFound(format!("credential for {}{}", url, image_ref))
                })?;
            record.secret = encode_secret(username, password);
        }

        info!(url, image_ref, "Updated credential");
        self.spawn_probe(url, image_ref, Credentials::new(username, password));
        Ok(())
    }

    /// Remove every record whose repository URL or image reference matches
    /// `key`.
    pub fn remove(&self, key: &str) -> Result<(), ControllerError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|r| !Self::key_matches(r, key));
        if records.len() == before {
            return Err(ControllerError::NotFound(format!("credential for {}", key)));
        }
        info!(key, "Removed credential");
        Ok(())
    }

    /// Resolve credentials for a repository URL or an image reference.
    ///
    /// `None` means unauthenticated access should be attempted.
    pub fn find(&self, key: &str) -> Option<Credentials> {
        if key.trim().is_empty() {
            return None;
        }
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let record = records.iter().find(|r| Self::key_matches(r, key))?;
        let creds = decode_secret(&record.secret);
        if creds.is_none() {
            warn!(key, "Stored credential could not be decoded");
        }
        creds
    }

    /// Known sources without their secrets
    pub fn list(&self) -> Vec<CredentialSummary> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.iter().map(CredentialRecord::summary).collect()
    }

    pub fn snapshot(&self) -> Result<Vec<u8>, ControllerError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(serde_json::to_vec_pretty(&*records)?)
    }

    /// Replace all records with the contents of a snapshot
    pub fn restore(&self, data: &[u8]) -> Result<usize, ControllerError> {
        if data.is_empty() {
            return Ok(0);
        }
        let restored: Vec<CredentialRecord> = serde_json::from_slice(data)?;
        let count = restored.len();
        *self.records.write().unwrap_or_else(|e| e.into_inner()) = restored;
        Ok(count)
    }

    fn key_matches(record: &CredentialRecord, key: &str) -> bool {
        (!record.url.is_empty() && url_key(&record.url) == url_key(key))
            || (!record.image_ref.is_empty() && image_key(&record.image_ref) == image_key(key))
    }

    fn spawn_probe(&self, url: &str, image_ref: &str, creds: Credentials) {
        let Some(probe) = self.probe.clone() else {
            return;
        };
        let records = self.records.clone();
        let url = url.to_string();
        let image_ref = image_ref.to_string();

        tokio::spawn(async move {
            let reachable = match probe.check(&url, &image_ref, &creds).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(url, image_ref, "Credential source is not reachable: {}", e);
                    false
                }
            };
            let mut records = records.write().unwrap_or_else(|e| e.into_inner());
            if let Some(record) = records.iter_mut().find(|r| record_matches(r, &url, &image_ref)) {
                record.reachable = reachable;
                debug!(url, image_ref, reachable, "Recorded reachability");
            }
        });
    }
}
