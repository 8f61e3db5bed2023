//! Application control loop
//!
//! One task per registered application. Each cycle re-reads the refresh
//! timer, waits for the timer, a trigger or cancellation, then fetches the
//! manifest, compares it with the live state and converges the cluster
//! when they differ. The first cycle runs without waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cluster::adapter::ClusterAdapter;
use crate::credentials::store::CredentialStore;
use crate::errors::ControllerError;
use crate::manifest::compose::Manifest;
use crate::manifest::translate::Translator;
use crate::models::application::{Application, SyncType};
use crate::reconcile::fsm::{Health, HealthEvent};
use crate::source::{FetchedManifest, SourceFetcher};
use crate::storage::settings::ReconcileSettings;
use crate::utils::{parse_duration, short_digest};

/// Shared collaborators of every control loop
pub struct Reconciler {
    fetcher: Arc<dyn SourceFetcher>,
    cluster: ClusterAdapter,
    credentials: Arc<CredentialStore>,
    settings: ReconcileSettings,
}

/// Outcome of a successful convergence
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub services: Vec<String>,
    pub pruned: Vec<String>,
    pub pull_error: Option<String>,
}

impl Reconciler {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        cluster: ClusterAdapter,
        credentials: Arc<CredentialStore>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            fetcher,
            cluster,
            credentials,
            settings,
        }
    }

    /// One fetch, diff and apply pass
    pub async fn reconcile(&self, app: &ManagedApp) {
        let (name, source) = {
            let state = app.read();
            (state.name.clone(), state.source.clone())
        };

        let creds = self.credentials.find(&source.repo_url);
        let fetched = match tokio::time::timeout(
            self.settings.fetch_timeout(),
            self.fetcher.fetch(&name, &source, creds.as_ref()),
        )
        .await
        {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(e)) => {
                log_cycle_error(&name, "fetch manifest", &e);
                app.transition(HealthEvent::FetchFailed(e.to_string()));
                return;
            }
            Err(_) => {
                let e = ControllerError::Timeout(format!(
                    "fetch exceeded {:?}",
                    self.settings.fetch_timeout()
                ));
                log_cycle_error(&name, "fetch manifest", &e);
                app.transition(HealthEvent::FetchFailed(e.to_string()));
                return;
            }
        };

        if app.read().live_state() == fetched.content {
            debug!(app = %name, "Live state matches target state");
            app.transition(HealthEvent::InSync);
            return;
        }

        let digest = short_digest(fetched.content.as_bytes());
        info!(app = %name, %digest, "Target state changed, applying");
        app.transition(HealthEvent::Drifted);

        let applied = tokio::time::timeout(self.settings.apply_timeout(), self.apply(&name, &fetched))
            .await
            .unwrap_or_else(|_| {
                Err(ControllerError::Timeout(format!(
                    "apply exceeded {:?}",
                    self.settings.apply_timeout()
                )))
            });

        match applied {
            Ok(report) => {
                let mut state = app.write();
                state.record_applied(fetched.content);
                log_transition(&name, state.status.process(HealthEvent::Applied));
                if let Some(pull_error) = report.pull_error {
                    log_transition(&name, state.status.process(HealthEvent::PullFailed(pull_error)));
                }
                info!(
                    app = %name,
                    %digest,
                    services = report.services.len(),
                    pruned = report.pruned.len(),
                    "Applied target state"
                );
            }
            Err(e) => {
                log_cycle_error(&name, "apply target state", &e);
                app.transition(HealthEvent::ApplyFailed(e.to_string()));
            }
        }
    }

    /// Converge the cluster toward `fetched`
    pub async fn apply(
        &self,
        name: &str,
        fetched: &FetchedManifest,
    ) -> Result<ApplyReport, ControllerError> {
        let manifest = Manifest::parse(&fetched.content)?;
        let volumes = manifest.volume_specs()?;

        let network_id = self.cluster.ensure_network(name).await?;
        for volume in &volumes {
            self.cluster.ensure_volume(volume).await?;
        }

        let specs = Translator::new(name, &network_id, &fetched.base_dir)
            .translate(&manifest)
            .await?;

        let mut pull_errors = Vec::new();
        for spec in &specs {
            let auth = self.credentials.find(&spec.image);
            let outcome = self
                .cluster
                .create_or_update_service(spec, auth.as_ref())
                .await?;
            pull_errors.extend(outcome.pull_error);
        }

        let services: Vec<String> = specs.into_iter().map(|s| s.name).collect();
        let pruned = if self.settings.prune_orphans {
            self.cluster.prune_orphans(name, &services).await?
        } else {
            Vec::new()
        };

        Ok(ApplyReport {
            services,
            pruned,
            pull_error: (!pull_errors.is_empty()).then(|| pull_errors.join("; ")),
        })
    }

    /// Remove the application's services and networks, then its checkout
    pub async fn teardown(&self, name: &str) -> Result<(), ControllerError> {
        tokio::time::timeout(
            self.settings.apply_timeout(),
            self.cluster.remove_services_and_network(name),
        )
        .await
        .map_err(|_| {
            ControllerError::Timeout(format!(
                "teardown exceeded {:?}",
                self.settings.apply_timeout()
            ))
        })??;

        if let Err(e) = self.fetcher.discard(name).await {
            warn!(app = %name, "Failed to discard source checkout: {}", e);
        }
        Ok(())
    }
}

/// Transient failures are retried as they are; the others need a change
/// to the manifest or the application before the next cycle can succeed.
fn log_cycle_error(name: &str, stage: &str, e: &ControllerError) {
    if e.is_transient() {
        warn!(app = %name, "Failed to {}, retrying next cycle: {}", stage, e);
    } else {
        error!(app = %name, "Failed to {}: {}", stage, e);
    }
}

fn log_transition(name: &str, result: Result<(), String>) {
    if let Err(e) = result {
        debug!(app = %name, "Ignored health event: {}", e);
    }
}

struct LoopHandle {
    trigger_tx: mpsc::Sender<SyncType>,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// An application together with its control loop
pub struct ManagedApp {
    state: RwLock<Application>,
    control: Mutex<Option<LoopHandle>>,
    removing: AtomicBool,
}

impl ManagedApp {
    pub fn new(app: Application) -> Self {
        Self {
            state: RwLock::new(app),
            control: Mutex::new(None),
            removing: AtomicBool::new(false),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Application> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Application> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the current application state
    pub fn snapshot(&self) -> Application {
        self.read().clone()
    }

    pub fn health(&self) -> Health {
        self.read().health()
    }

    pub(crate) fn transition(&self, event: HealthEvent) {
        let mut state = self.write();
        let name = state.name.clone();
        log_transition(&name, state.status.process(event));
    }

    /// Mark removal as started; false when one is already under way.
    ///
    /// Taken under the control lock so that no `start` can slip in between
    /// this call and `stop`.
    pub fn begin_removal(&self) -> bool {
        let _control = self.control.lock().unwrap_or_else(|e| e.into_inner());
        !self.removing.swap(true, Ordering::SeqCst)
    }

    pub fn abort_removal(&self) {
        let _control = self.control.lock().unwrap_or_else(|e| e.into_inner());
        self.removing.store(false, Ordering::SeqCst);
    }

    pub fn is_removing(&self) -> bool {
        self.removing.load(Ordering::SeqCst)
    }

    /// Post a command to a running loop without blocking.
    ///
    /// A full channel already holds a pending wake-up, which counts as
    /// delivered. Returns false when no loop is running.
    pub(crate) fn trigger(&self, command: SyncType) -> bool {
        let control = self.control.lock().unwrap_or_else(|e| e.into_inner());
        let Some(handle) = control.as_ref() else {
            return false;
        };
        if handle.task.is_finished() {
            return false;
        }
        match handle.trigger_tx.try_send(command) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Cancel the loop and hand back its task for joining
    pub(crate) fn stop(&self) -> Option<JoinHandle<()>> {
        let mut control = self.control.lock().unwrap_or_else(|e| e.into_inner());
        control.take().map(|handle| {
            let _ = handle.cancel_tx.send(true);
            handle.task
        })
    }
}

/// Spawn the control loop of `app` unless one is already running or the
/// application is being removed. Returns whether a loop was spawned.
///
/// A suspended application is resumed first.
pub fn start(reconciler: &Arc<Reconciler>, app: &Arc<ManagedApp>) -> bool {
    let mut control = app.control.lock().unwrap_or_else(|e| e.into_inner());
    if app.is_removing() {
        debug!(app = %app.read().name, "Not starting control loop of an application being removed");
        return false;
    }
    if control.as_ref().is_some_and(|h| !h.task.is_finished()) {
        return false;
    }

    if app.health() == Health::Suspended {
        app.transition(HealthEvent::Resume);
    }

    let (trigger_tx, trigger_rx) = mpsc::channel(1);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let task = tokio::spawn(run(reconciler.clone(), app.clone(), trigger_rx, cancel_rx));

    *control = Some(LoopHandle {
        trigger_tx,
        cancel_tx,
        task,
    });
    true
}

async fn run(
    reconciler: Arc<Reconciler>,
    app: Arc<ManagedApp>,
    mut trigger_rx: mpsc::Receiver<SyncType>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let name = app.read().name.clone();
    info!(app = %name, "Control loop starting...");

    let mut first_cycle = true;
    loop {
        let timer = app.read().refresh_timer.clone();
        let interval = match parse_duration(&timer) {
            Ok(interval) => interval,
            Err(e) => {
                error!(
                    app = %name,
                    "Invalid refresh timer {:?}, it must be like \"3m30s\": {}", timer, e
                );
                app.transition(HealthEvent::InvalidTimer(format!(
                    "invalid refresh timer {:?}: {}",
                    timer, e
                )));
                return;
            }
        };

        if !first_cycle {
            tokio::select! {
                _ = cancelled(&mut cancel_rx) => {
                    info!(app = %name, "Control loop stopping...");
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    debug!(app = %name, "Refresh timer fired");
                }
                command = trigger_rx.recv() => match command {
                    Some(command) => debug!(app = %name, ?command, "Sync triggered"),
                    None => return,
                },
            }
        }
        first_cycle = false;

        tokio::select! {
            _ = cancelled(&mut cancel_rx) => {
                info!(app = %name, "Control loop stopping during reconciliation...");
                return;
            }
            _ = reconciler.reconcile(&app) => {}
        }
    }
}

/// Resolves once cancellation is requested or its sender is gone
async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    loop {
        if *cancel_rx.borrow_and_update() {
            return;
        }
        if cancel_rx.changed().await.is_err() {
            return;
        }
    }
}
