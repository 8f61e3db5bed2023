//! Main application run loop

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::ControllerError;
use crate::models::application::ApplicationSpec;
use crate::registry::Registry;

/// Run the controller until `shutdown_signal` resolves
pub async fn run(
    version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ControllerError> {
    info!("Initializing swarmsync controller {}...", version);

    let mut shutdown_manager = ShutdownManager::new(options.lifecycle.clone());

    options.layout.setup().await?;
    let app_state = Arc::new(AppState::init(&options.layout, &options.settings).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    register_bootstrap_specs(&app_state.registry, &options.bootstrap_specs).await;
    info!(
        "Controller running with {} applications",
        app_state.registry.list().len()
    );

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    shutdown_manager.shutdown().await
}

/// Register each spec file, updating applications that already exist
async fn register_bootstrap_specs(registry: &Registry, paths: &[PathBuf]) {
    for path in paths {
        let spec = match ApplicationSpec::from_file(path).await {
            Ok(spec) => spec,
            Err(e) => {
                error!("Unable to read application spec {}: {}", path.display(), e);
                continue;
            }
        };

        let result = match registry.register(spec.clone()) {
            Err(ControllerError::AlreadyExists(_)) => registry.update(spec),
            other => other,
        };
        match result {
            Ok(status) => info!(app = %status.name, "Loaded application spec {}", path.display()),
            Err(e) => warn!("Application spec {} rejected: {}", path.display(), e),
        }
    }
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
}

impl ShutdownManager {
    pub fn new(lifecycle_options: LifecycleOptions) -> Self {
        Self {
            lifecycle_options,
            app_state: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), ControllerError> {
        if self.app_state.is_some() {
            return Err(ControllerError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ControllerError> {
        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, state was not saved",
                    self.lifecycle_options.max_shutdown_delay
                );
                Err(ControllerError::ShutdownError(format!(
                    "timed out after {:?}",
                    self.lifecycle_options.max_shutdown_delay
                )))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), ControllerError> {
        info!("Shutting down swarmsync controller...");

        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
