//! Credential store tests with a scripted reachability probe

use std::sync::Arc;

use async_trait::async_trait;

use swarmsync::credentials::store::CredentialStore;
use swarmsync::credentials::ReachabilityProbe;
use swarmsync::errors::ControllerError;
use swarmsync::models::credential::Credentials;

use crate::support::wait_until;

/// Accepts only the password `good`
struct PasswordProbe;

#[async_trait]
impl ReachabilityProbe for PasswordProbe {
    async fn check(
        &self,
        url: &str,
        _image_ref: &str,
        creds: &Credentials,
    ) -> Result<(), ControllerError> {
        if creds.password() == "good" {
            Ok(())
        } else {
            Err(ControllerError::SourceError(format!("authentication failed for {}", url)))
        }
    }
}

fn store() -> CredentialStore {
    CredentialStore::new(Some(Arc::new(PasswordProbe)))
}

#[tokio::test]
async fn test_add_is_optimistic_then_probed() {
    let store = store();
    store
        .add("https://example.com/repo.git", "", "alice", "bad")
        .unwrap();

    // Reachable until the background check says otherwise
    assert!(wait_until(|| !store.list()[0].reachable).await);

    store
        .update("https://example.com/repo", "", "alice", "good")
        .unwrap();
    assert!(wait_until(|| store.list()[0].reachable).await);
}

#[tokio::test]
async fn test_find_is_suffix_insensitive() {
    let store = store();
    store
        .add("https://example.com/repo.git", "", "alice", "good")
        .unwrap();

    let plain = store.find("https://example.com/repo").unwrap();
    let slash = store.find("https://example.com/repo/").unwrap();
    assert_eq!(plain.username, slash.username);
    assert_eq!(plain.password(), slash.password());
}

#[tokio::test]
async fn test_unresolved_lookup_is_empty_not_error() {
    let store = store();
    assert!(store.find("https://example.com/public").is_none());
    assert!(store.find("").is_none());
}

#[tokio::test]
async fn test_list_never_exposes_secrets() {
    let store = store();
    store.add("", "registry.local/api:1.0", "bot", "good").unwrap();

    let listed = serde_json::to_string(&store.list()).unwrap();
    assert!(listed.contains("registry.local/api:1.0"));
    assert!(!listed.contains("good"));
    assert!(!listed.contains("secret"));
}

#[tokio::test]
async fn test_snapshot_keeps_secret_encoded() {
    let store = store();
    store
        .add("https://example.com/repo", "", "alice", "good")
        .unwrap();

    let data = String::from_utf8(store.snapshot().unwrap()).unwrap();
    assert!(data.contains("\"secret\""));
    assert!(!data.contains("alice:good"));
}
