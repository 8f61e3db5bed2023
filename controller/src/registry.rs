//! Registry of managed applications
//!
//! The single entry point of the API layer into reconciliation. The
//! directory is guarded by one lock; per-application state sits behind
//! each application's own lock, shared with its control loop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::errors::ControllerError;
use crate::models::application::{AppStatus, Application, ApplicationSpec, SyncType};
use crate::reconcile::control_loop::{self, ManagedApp, Reconciler};
use crate::reconcile::fsm::HealthEvent;

pub struct Registry {
    apps: RwLock<Vec<Arc<ManagedApp>>>,
    next_id: AtomicU32,
    reconciler: Arc<Reconciler>,
}

impl Registry {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            apps: RwLock::new(Vec::new()),
            next_id: AtomicU32::new(1),
            reconciler,
        }
    }

    fn find(&self, name: &str) -> Result<Arc<ManagedApp>, ControllerError> {
        let apps = self.apps.read().unwrap_or_else(|e| e.into_inner());
        apps.iter()
            .find(|app| app.read().name == name)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(format!("application {}", name)))
    }

    /// Register an application and start its control loop
    pub fn register(&self, spec: ApplicationSpec) -> Result<AppStatus, ControllerError> {
        let spec = spec.validate()?;

        let mut apps = self.apps.write().unwrap_or_else(|e| e.into_inner());
        if apps.iter().any(|app| app.read().name == spec.name) {
            return Err(ControllerError::AlreadyExists(format!(
                "application {}",
                spec.name
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let app = Arc::new(ManagedApp::new(Application::new(id, spec)));
        control_loop::start(&self.reconciler, &app);
        apps.push(app.clone());

        let status = app.read().status_view();
        info!(app = %status.name, id, "Registered application");
        Ok(status)
    }

    /// Replace source and refresh timer in place and wake the loop
    pub fn update(&self, spec: ApplicationSpec) -> Result<AppStatus, ControllerError> {
        let spec = spec.validate()?;
        let app = self.find(&spec.name)?;

        let status = {
            let mut state = app.write();
            state.source = spec.source;
            state.refresh_timer = spec.refresh_timer;
            state.updated_at = Utc::now();
            state.status_view()
        };

        self.wake(&app, SyncType::UpdateSync);
        info!(app = %status.name, "Updated application");
        Ok(status)
    }

    pub fn details(&self, name: &str) -> Result<Application, ControllerError> {
        Ok(self.find(name)?.snapshot())
    }

    pub fn list(&self) -> Vec<AppStatus> {
        let apps = self.apps.read().unwrap_or_else(|e| e.into_inner());
        apps.iter().map(|app| app.read().status_view()).collect()
    }

    /// Request an immediate reconciliation
    pub fn refresh(&self, name: &str) -> Result<(), ControllerError> {
        let app = self.find(name)?;
        self.wake(&app, SyncType::Synchronize);
        Ok(())
    }

    /// Post to a running loop, or restart a stopped one.
    ///
    /// `start` refuses applications under removal, so a removal racing
    /// with this call never leaves a loop behind.
    fn wake(&self, app: &Arc<ManagedApp>, command: SyncType) {
        if app.trigger(command) {
            return;
        }
        if control_loop::start(&self.reconciler, app) {
            info!(app = %app.read().name, "Restarted stopped control loop");
        }
    }

    /// Stop the loop, tear down cluster resources and drop the entry.
    ///
    /// On teardown failure the entry stays and its loop is restarted.
    pub async fn remove_application(&self, name: &str) -> Result<(), ControllerError> {
        let app = self.find(name)?;
        if !app.begin_removal() {
            return Err(ControllerError::AlreadyExists(format!(
                "removal of application {} already in progress",
                name
            )));
        }

        if let Some(task) = app.stop() {
            if let Err(e) = task.await {
                warn!(app = %name, "Control loop ended abnormally: {}", e);
            }
        }
        app.transition(HealthEvent::Teardown);

        if let Err(e) = self.reconciler.teardown(name).await {
            error!(app = %name, "Failed to remove application resources: {}", e);
            app.transition(HealthEvent::ApplyFailed(e.to_string()));
            app.abort_removal();
            control_loop::start(&self.reconciler, &app);
            return Err(e);
        }

        let mut apps = self.apps.write().unwrap_or_else(|e| e.into_inner());
        apps.retain(|other| !Arc::ptr_eq(other, &app));
        info!(app = %name, "Removed application");
        Ok(())
    }

    /// Remove and register again from the last known spec
    pub async fn recreate(&self, name: &str) -> Result<AppStatus, ControllerError> {
        let spec = ApplicationSpec::from(&self.details(name)?);
        self.remove_application(name).await?;
        self.register(spec)
    }

    /// Serialize every application, ordered by id
    pub fn snapshot(&self) -> Result<Vec<u8>, ControllerError> {
        let mut snapshot: Vec<Application> = {
            let apps = self.apps.read().unwrap_or_else(|e| e.into_inner());
            apps.iter().map(|app| app.snapshot()).collect()
        };
        snapshot.sort_by_key(|app| app.id);
        Ok(serde_json::to_vec_pretty(&snapshot)?)
    }

    /// Load applications from a snapshot and start their loops.
    ///
    /// Names already registered are skipped. Ids are preserved.
    pub fn restore(&self, data: &[u8]) -> Result<usize, ControllerError> {
        if data.is_empty() {
            return Ok(0);
        }
        let restored: Vec<Application> = serde_json::from_slice(data)?;

        let mut apps = self.apps.write().unwrap_or_else(|e| e.into_inner());
        let mut count = 0;
        for app in restored {
            if apps.iter().any(|other| other.read().name == app.name) {
                warn!(app = %app.name, "Skipping duplicate application in snapshot");
                continue;
            }
            self.next_id.fetch_max(app.id.saturating_add(1), Ordering::SeqCst);

            if let Err(e) = ApplicationSpec::from(&app).validate() {
                warn!(app = %app.name, "Skipping invalid application in snapshot: {}", e);
                continue;
            }
            let app = Arc::new(ManagedApp::new(app));
            control_loop::start(&self.reconciler, &app);
            apps.push(app);
            count += 1;
        }

        info!("Restored {} applications", count);
        Ok(count)
    }

    /// Cancel every control loop and wait for them to finish
    pub async fn shutdown(&self) {
        let tasks: Vec<_> = {
            let apps = self.apps.read().unwrap_or_else(|e| e.into_inner());
            apps.iter().filter_map(|app| app.stop()).collect()
        };

        info!("Stopping {} control loops...", tasks.len());
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!("Control loop ended abnormally: {}", e);
            }
        }
    }
}
