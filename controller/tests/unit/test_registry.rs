//! Registry and control loop tests against in-memory collaborators

use std::sync::Arc;
use std::time::Duration;

use swarmsync::cluster::adapter::ClusterAdapter;
use swarmsync::cluster::spec::ServiceSpec;
use swarmsync::credentials::store::CredentialStore;
use swarmsync::errors::ControllerError;
use swarmsync::models::application::{Application, ApplicationSpec};
use swarmsync::reconcile::control_loop::{self, ManagedApp};
use swarmsync::reconcile::fsm::Health;
use swarmsync::registry::Registry;

use crate::support::{
    reconciler_with, registry_with, registry_with_credentials, spec, wait_until, FakeCluster,
    FakeSource, WEB_AND_WORKER_MANIFEST, WEB_MANIFEST, WEB_MANIFEST_V2,
};

fn live_state(registry: &Registry, name: &str) -> String {
    registry
        .details(name)
        .map(|app| app.live_state().to_string())
        .unwrap_or_default()
}

fn health(registry: &Registry, name: &str) -> Option<Health> {
    registry.details(name).ok().map(|app| app.health())
}

#[tokio::test]
async fn test_register_twice_conflicts() {
    let source = FakeSource::with_manifest("service.yaml", WEB_MANIFEST);
    let registry = registry_with(source, FakeCluster::new());

    let first = registry.register(spec("demo", "service.yaml")).unwrap();
    let second = registry.register(spec("demo", "other.yaml"));

    assert!(matches!(second, Err(ControllerError::AlreadyExists(_))));
    assert_eq!(registry.list().len(), 1);
    assert_eq!(registry.details("demo").unwrap().id, first.id);
    assert_eq!(registry.details("demo").unwrap().source.path, "service.yaml");

    registry.shutdown().await;
}

#[tokio::test]
async fn test_register_rejects_invalid_spec() {
    let registry = registry_with(FakeSource::new(), FakeCluster::new());

    let result = registry.register(ApplicationSpec::new("demo", "", "HEAD", "a.yaml", "3m"));
    assert!(matches!(result, Err(ControllerError::ValidationError(_))));
    assert!(registry.list().is_empty());
}

#[tokio::test]
async fn test_first_cycle_applies_then_refresh_is_a_no_op() {
    let source = FakeSource::with_manifest("service.yaml", WEB_MANIFEST);
    let cluster = FakeCluster::new();
    let registry = registry_with(source.clone(), cluster.clone());

    let registered = registry.register(spec("demo", "service.yaml")).unwrap();

    assert!(wait_until(|| live_state(&registry, "demo") == WEB_MANIFEST).await);
    assert_eq!(cluster.service_names(), vec!["demo_web".to_string()]);
    assert_eq!(cluster.network_names(), vec!["demo_default".to_string()]);
    assert_eq!(cluster.create_calls(), 1);

    let details = registry.details("demo").unwrap();
    assert_eq!(details.health(), Health::Healthy);
    assert!(details.last_synced_at >= registered.last_synced_at);

    registry.refresh("demo").unwrap();
    assert!(wait_until(|| source.fetch_count() == 2).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(health(&registry, "demo"), Some(Health::Healthy));
    assert_eq!(cluster.create_calls(), 1);
    assert_eq!(cluster.update_calls(), 0);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_update_interrupts_the_wait() {
    let source = FakeSource::with_manifest("service.yaml", WEB_MANIFEST);
    source.set_manifest("v2.yaml", WEB_MANIFEST_V2);
    let cluster = FakeCluster::new();
    let registry = registry_with(source.clone(), cluster.clone());

    registry.register(spec("demo", "service.yaml")).unwrap();
    assert!(wait_until(|| live_state(&registry, "demo") == WEB_MANIFEST).await);

    // The refresh timer is one hour; only the trigger can wake the loop.
    let updated = registry.update(spec("demo", "v2.yaml")).unwrap();
    assert!(updated.updated_at >= updated.created_at);

    assert!(wait_until(|| live_state(&registry, "demo") == WEB_MANIFEST_V2).await);
    assert_eq!(cluster.update_calls(), 1);
    assert_eq!(cluster.create_calls(), 1);
    assert_eq!(cluster.service_image("demo_web").as_deref(), Some("nginx:1.27"));
    assert_eq!(health(&registry, "demo"), Some(Health::Healthy));

    registry.shutdown().await;
}

#[tokio::test]
async fn test_apply_failure_keeps_live_state() {
    let source = FakeSource::with_manifest("service.yaml", WEB_MANIFEST);
    let cluster = FakeCluster::new();
    let registry = registry_with(source.clone(), cluster.clone());

    registry.register(spec("demo", "service.yaml")).unwrap();
    assert!(wait_until(|| live_state(&registry, "demo") == WEB_MANIFEST).await);

    cluster.fail_upsert(Some("no swarm manager"));
    source.set_manifest("service.yaml", WEB_MANIFEST_V2);
    registry.refresh("demo").unwrap();

    assert!(wait_until(|| health(&registry, "demo") == Some(Health::Degraded)).await);
    let details = registry.details("demo").unwrap();
    assert_eq!(details.live_state(), WEB_MANIFEST);
    assert!(details.status.last_error().unwrap_or_default().contains("no swarm manager"));

    // The next cycle retries from scratch
    cluster.fail_upsert(None);
    registry.refresh("demo").unwrap();
    assert!(wait_until(|| live_state(&registry, "demo") == WEB_MANIFEST_V2).await);
    assert_eq!(health(&registry, "demo"), Some(Health::Healthy));

    registry.shutdown().await;
}

#[tokio::test]
async fn test_fetch_failure_degrades_and_recovers() {
    let source = FakeSource::with_manifest("service.yaml", WEB_MANIFEST);
    source.fail_with(Some("repository not found"));
    let cluster = FakeCluster::new();
    let registry = registry_with(source.clone(), cluster.clone());

    registry.register(spec("demo", "service.yaml")).unwrap();
    assert!(wait_until(|| health(&registry, "demo") == Some(Health::Degraded)).await);
    assert_eq!(cluster.create_calls(), 0);

    source.fail_with(None);
    registry.refresh("demo").unwrap();
    assert!(wait_until(|| live_state(&registry, "demo") == WEB_MANIFEST).await);
    assert_eq!(health(&registry, "demo"), Some(Health::Healthy));

    registry.shutdown().await;
}

#[tokio::test]
async fn test_invalid_timer_suspends_until_updated() {
    let source = FakeSource::with_manifest("service.yaml", WEB_MANIFEST);
    let registry = registry_with(source.clone(), FakeCluster::new());

    let bad = ApplicationSpec::new("demo", "https://git.example/app", "HEAD", "service.yaml", "soon");
    registry.register(bad).unwrap();

    assert!(wait_until(|| health(&registry, "demo") == Some(Health::Suspended)).await);
    assert_eq!(source.fetch_count(), 0);

    // Refresh alone restarts the loop, which suspends again
    registry.refresh("demo").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(health(&registry, "demo"), Some(Health::Suspended));
    assert_eq!(source.fetch_count(), 0);

    registry.update(spec("demo", "service.yaml")).unwrap();
    assert!(wait_until(|| live_state(&registry, "demo") == WEB_MANIFEST).await);
    assert_eq!(health(&registry, "demo"), Some(Health::Healthy));

    registry.shutdown().await;
}

#[tokio::test]
async fn test_unknown_application_is_not_found() {
    let registry = registry_with(FakeSource::new(), FakeCluster::new());

    assert!(matches!(registry.details("ghost"), Err(ControllerError::NotFound(_))));
    assert!(matches!(registry.refresh("ghost"), Err(ControllerError::NotFound(_))));
    assert!(matches!(
        registry.update(spec("ghost", "a.yaml")),
        Err(ControllerError::NotFound(_))
    ));
    assert!(matches!(
        registry.remove_application("ghost").await,
        Err(ControllerError::NotFound(_))
    ));
    assert!(matches!(registry.recreate("ghost").await, Err(ControllerError::NotFound(_))));
}

#[tokio::test]
async fn test_remove_tears_down_services_and_network() {
    let source = FakeSource::with_manifest("service.yaml", WEB_AND_WORKER_MANIFEST);
    let cluster = FakeCluster::new();
    let registry = registry_with(source, cluster.clone());

    registry.register(spec("demo", "service.yaml")).unwrap();
    registry.register(spec("other", "service.yaml")).unwrap();
    assert!(wait_until(|| cluster.service_names().len() == 4).await);

    registry.remove_application("demo").await.unwrap();

    assert!(matches!(registry.details("demo"), Err(ControllerError::NotFound(_))));
    assert_eq!(
        cluster.service_names(),
        vec!["other_web".to_string(), "other_worker".to_string()]
    );
    assert_eq!(cluster.network_names(), vec!["other_default".to_string()]);
    assert_eq!(registry.list().len(), 1);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_failed_remove_keeps_entry() {
    let source = FakeSource::with_manifest("service.yaml", WEB_MANIFEST);
    let cluster = FakeCluster::new();
    let registry = registry_with(source, cluster.clone());

    registry.register(spec("demo", "service.yaml")).unwrap();
    assert!(wait_until(|| live_state(&registry, "demo") == WEB_MANIFEST).await);

    cluster.fail_service_removal(true);
    let result = registry.remove_application("demo").await;

    assert!(result.is_err());
    assert_eq!(health(&registry, "demo"), Some(Health::Degraded));
    assert_eq!(cluster.service_names(), vec!["demo_web".to_string()]);

    // Recreate does not proceed past the failed removal
    assert!(registry.recreate("demo").await.is_err());
    assert_eq!(registry.list().len(), 1);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_recreate_reapplies_from_scratch() {
    let source = FakeSource::with_manifest("service.yaml", WEB_MANIFEST);
    let cluster = FakeCluster::new();
    let registry = registry_with(source.clone(), cluster.clone());

    let first = registry.register(spec("demo", "service.yaml")).unwrap();
    assert!(wait_until(|| live_state(&registry, "demo") == WEB_MANIFEST).await);
    assert_eq!(cluster.create_calls(), 1);

    let second = registry.recreate("demo").await.unwrap();
    assert_ne!(first.id, second.id);

    assert!(wait_until(|| cluster.create_calls() == 2).await);
    assert!(wait_until(|| live_state(&registry, "demo") == WEB_MANIFEST).await);
    assert_eq!(cluster.service_names(), vec!["demo_web".to_string()]);
    assert_eq!(cluster.network_names(), vec!["demo_default".to_string()]);
    assert_eq!(registry.details("demo").unwrap().source.path, "service.yaml");

    registry.shutdown().await;
}

#[tokio::test]
async fn test_orphaned_services_are_pruned() {
    let source = FakeSource::with_manifest("service.yaml", WEB_AND_WORKER_MANIFEST);
    let cluster = FakeCluster::new();
    let registry = registry_with(source.clone(), cluster.clone());

    registry.register(spec("demo", "service.yaml")).unwrap();
    assert!(wait_until(|| cluster.service_names().len() == 2).await);

    source.set_manifest("service.yaml", WEB_MANIFEST);
    registry.refresh("demo").unwrap();

    assert!(wait_until(|| cluster.service_names() == vec!["demo_web".to_string()]).await);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_pull_failure_degrades_but_records_live_state() {
    let source = FakeSource::with_manifest("service.yaml", WEB_MANIFEST);
    let cluster = FakeCluster::new();
    cluster.fail_pull(true);
    let registry = registry_with(source, cluster.clone());

    registry.register(spec("demo", "service.yaml")).unwrap();

    assert!(wait_until(|| live_state(&registry, "demo") == WEB_MANIFEST).await);
    assert_eq!(health(&registry, "demo"), Some(Health::Degraded));
    assert_eq!(cluster.service_names(), vec!["demo_web".to_string()]);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_volumes_created_before_services() {
    let manifest = "services:\n  db:\n    image: postgres\n    volumes: [\"pgdata:/var/lib/postgresql/data\"]\nvolumes:\n  pgdata:\n";
    let source = FakeSource::with_manifest("service.yaml", manifest);
    let cluster = FakeCluster::new();
    let registry = registry_with(source, cluster.clone());

    registry.register(spec("demo", "service.yaml")).unwrap();

    assert!(wait_until(|| live_state(&registry, "demo") == manifest).await);
    assert_eq!(cluster.volume_names(), vec!["pgdata".to_string()]);
    assert_eq!(cluster.service_names(), vec!["demo_db".to_string()]);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_invalid_manifest_degrades() {
    let source = FakeSource::with_manifest(
        "service.yaml",
        "services:\n  web:\n    image: nginx\n    ports: [\"eighty:80\"]\n",
    );
    let cluster = FakeCluster::new();
    let registry = registry_with(source, cluster.clone());

    registry.register(spec("demo", "service.yaml")).unwrap();

    assert!(wait_until(|| health(&registry, "demo") == Some(Health::Degraded)).await);
    assert!(live_state(&registry, "demo").is_empty());
    assert!(cluster.service_names().is_empty());

    registry.shutdown().await;
}

#[tokio::test]
async fn test_fetch_uses_stored_credentials() {
    let source = FakeSource::with_manifest("service.yaml", WEB_MANIFEST);
    let credentials = Arc::new(CredentialStore::default());
    credentials
        .add("https://git.example/app.git", "", "deployer", "token")
        .unwrap();
    let registry = registry_with_credentials(source.clone(), FakeCluster::new(), credentials);

    registry.register(spec("demo", "service.yaml")).unwrap();

    assert!(wait_until(|| source.fetch_count() == 1).await);
    assert_eq!(source.last_username().as_deref(), Some("deployer"));

    registry.shutdown().await;
}

#[tokio::test]
async fn test_snapshot_restore_preserves_ids() {
    let source = FakeSource::with_manifest("service.yaml", WEB_MANIFEST);
    let registry = registry_with(source.clone(), FakeCluster::new());

    registry.register(spec("alpha", "service.yaml")).unwrap();
    registry.register(spec("beta", "service.yaml")).unwrap();
    assert!(wait_until(|| live_state(&registry, "beta") == WEB_MANIFEST).await);
    registry.shutdown().await;

    let data = registry.snapshot().unwrap();

    let cluster = FakeCluster::new();
    let restored = registry_with(source, cluster.clone());
    assert_eq!(restored.restore(&data).unwrap(), 2);

    let names: Vec<String> = restored.list().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
    assert_eq!(restored.details("alpha").unwrap().id, 1);
    assert_eq!(restored.details("beta").unwrap().id, 2);

    // Live state is not persisted, so restored loops apply again
    assert!(wait_until(|| cluster.service_names().len() == 2).await);

    let gamma = restored.register(spec("gamma", "service.yaml")).unwrap();
    assert_eq!(gamma.id, 3);

    restored.shutdown().await;
}

#[tokio::test]
async fn test_register_rejects_path_like_names() {
    let source = FakeSource::with_manifest("stack.yaml", WEB_MANIFEST);
    let registry = registry_with(source.clone(), FakeCluster::new());

    for name in ["..", ".", "../data"] {
        let result = registry.register(spec(name, "stack.yaml"));
        assert!(matches!(result, Err(ControllerError::ValidationError(_))));
    }
    assert!(registry.list().is_empty());
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test]
async fn test_restore_skips_invalid_names() {
    let data = br#"[{"id":4,"name":"..","source":{"repoURL":"https://git.example/app","targetRevision":"HEAD","path":"stack.yaml"},"refresh_timer":"1h","health":"healthy","failure_streak":0,"created_at":"2024-01-01T00:00:00Z","updated_at":"2024-01-01T00:00:00Z","last_synced_at":"2024-01-01T00:00:00Z"}]"#;
    let source = FakeSource::with_manifest("stack.yaml", WEB_MANIFEST);
    let registry = registry_with(source.clone(), FakeCluster::new());

    assert_eq!(registry.restore(data).unwrap(), 0);
    assert!(registry.list().is_empty());
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test]
async fn test_no_loop_starts_while_removal_is_under_way() {
    let source = FakeSource::with_manifest("service.yaml", WEB_MANIFEST);
    let reconciler = reconciler_with(
        source.clone(),
        FakeCluster::new(),
        Arc::new(CredentialStore::default()),
    );
    let app = Arc::new(ManagedApp::new(Application::new(
        1,
        spec("demo", "service.yaml").validate().unwrap(),
    )));

    assert!(app.begin_removal());
    assert!(!app.begin_removal());
    assert!(!control_loop::start(&reconciler, &app));
    tokio::task::yield_now().await;
    assert_eq!(source.fetch_count(), 0);

    // A failed removal hands the application back to its loop
    app.abort_removal();
    assert!(control_loop::start(&reconciler, &app));
    assert!(!control_loop::start(&reconciler, &app));
    assert!(wait_until(|| source.fetch_count() == 1).await);
}

#[tokio::test]
async fn test_refresh_during_removal_leaves_no_loop_behind() {
    let source = FakeSource::with_manifest("service.yaml", WEB_MANIFEST);
    let cluster = FakeCluster::new();
    cluster.linger_networks(5);
    let registry = registry_with(source.clone(), cluster.clone());

    registry.register(spec("demo", "service.yaml")).unwrap();
    assert!(wait_until(|| live_state(&registry, "demo") == WEB_MANIFEST).await);

    let refresher = async {
        for _ in 0..20 {
            let _ = registry.refresh("demo");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    let (removed, ()) = tokio::join!(registry.remove_application("demo"), refresher);
    removed.unwrap();
    assert!(matches!(registry.refresh("demo"), Err(ControllerError::NotFound(_))));

    // A loop left running would fetch and re-create the service
    let fetches = source.fetch_count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.fetch_count(), fetches);
    assert!(cluster.service_names().is_empty());
    assert!(cluster.network_names().is_empty());
}

#[tokio::test]
async fn test_remove_waits_until_network_is_gone() {
    let source = FakeSource::with_manifest("service.yaml", WEB_MANIFEST);
    let cluster = FakeCluster::new();
    cluster.linger_networks(3);
    let registry = registry_with(source, cluster.clone());

    registry.register(spec("demo", "service.yaml")).unwrap();
    assert!(wait_until(|| live_state(&registry, "demo") == WEB_MANIFEST).await);
    let first_network = cluster.network_id("demo_default").unwrap();

    let recreated = registry.recreate("demo").await.unwrap();
    assert_eq!(recreated.name, "demo");
    // Removal was retried while the network was still listed
    assert!(cluster.network_removals() > 1);

    assert!(wait_until(|| cluster.create_calls() == 2).await);
    let second_network = cluster.network_id("demo_default").unwrap();
    assert_ne!(first_network, second_network);
    assert_eq!(cluster.network_names(), vec!["demo_default".to_string()]);
    assert_eq!(cluster.service_names(), vec!["demo_web".to_string()]);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_network_removal_returns_only_once_gone() {
    let cluster = FakeCluster::new();
    cluster.linger_networks(4);
    let adapter = ClusterAdapter::new(cluster.clone(), Duration::from_millis(5));

    adapter.ensure_network("demo").await.unwrap();
    adapter.remove_services_and_network("demo").await.unwrap();

    assert!(cluster.network_names().is_empty());
    assert_eq!(cluster.network_removals(), 5);
}

#[tokio::test]
async fn test_engine_warnings_reported_for_create_and_update() {
    let cluster = FakeCluster::new();
    cluster.warn_on_upsert("image nginx:1.25 could not be accessed on a registry");
    let adapter = ClusterAdapter::new(cluster.clone(), Duration::from_millis(5));
    let spec = ServiceSpec {
        name: "demo_web".to_string(),
        image: "nginx:1.25".to_string(),
        labels: Default::default(),
        container_labels: Default::default(),
        env: Default::default(),
        mounts: Vec::new(),
        ports: Vec::new(),
        mode: None,
        networks: Vec::new(),
    };

    let created = adapter.create_or_update_service(&spec, None).await.unwrap();
    assert_eq!(cluster.create_calls(), 1);
    assert_eq!(created.warnings.len(), 1);
    assert!(created.pull_error.is_none());

    let updated = adapter.create_or_update_service(&spec, None).await.unwrap();
    assert_eq!(cluster.update_calls(), 1);
    assert_eq!(updated.warnings, created.warnings);
}
