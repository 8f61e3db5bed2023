//! Finite state machine for application health

use std::fmt;

use serde::{Deserialize, Serialize};

/// Observable reconciliation status of an application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Live state matches the manifest
    #[default]
    Healthy,

    /// Convergence or teardown in progress
    Progressing,

    /// Last fetch or convergence failed; retried on the next cycle
    Degraded,

    /// Refresh timer is unusable; the control loop has stopped
    Suspended,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "healthy",
            Health::Progressing => "progressing",
            Health::Degraded => "degraded",
            Health::Suspended => "suspended",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health event
#[derive(Debug, Clone)]
pub enum HealthEvent {
    /// Fetched manifest equals the live state
    InSync,

    /// Fetched manifest differs from the live state
    Drifted,

    /// Convergence completed
    Applied,

    /// Convergence failed
    ApplyFailed(String),

    /// Manifest could not be fetched
    FetchFailed(String),

    /// Services converged but an image pull failed
    PullFailed(String),

    /// Refresh timer failed to parse
    InvalidTimer(String),

    /// A stopped control loop is being restarted
    Resume,

    /// Cluster resources are being removed
    Teardown,
}

/// Health FSM
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthFsm {
    #[serde(default)]
    health: Health,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,

    #[serde(default)]
    failure_streak: u32,
}

impl HealthFsm {
    /// Create a new FSM in healthy state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current health
    pub fn health(&self) -> Health {
        self.health
    }

    /// Get error message if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Consecutive failed cycles
    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: HealthEvent) -> Result<(), String> {
        let new_health = match (self.health, &event) {
            // From Suspended only a restart, a teardown or another timer error
            (Health::Suspended, HealthEvent::Resume) => {
                self.last_error = None;
                Health::Progressing
            }
            (Health::Suspended, HealthEvent::Teardown) => Health::Progressing,
            (Health::Suspended, HealthEvent::InvalidTimer(err)) => {
                self.last_error = Some(err.clone());
                Health::Suspended
            }
            (Health::Suspended, event) => {
                return Err(format!("Invalid transition: Suspended -> {:?}", event));
            }

            (_, HealthEvent::InvalidTimer(err)) => {
                self.last_error = Some(err.clone());
                Health::Suspended
            }
            (_, HealthEvent::Teardown) => Health::Progressing,
            (_, HealthEvent::FetchFailed(err)) => {
                self.fail(err);
                Health::Degraded
            }
            (_, HealthEvent::InSync) => {
                self.succeed();
                Health::Healthy
            }
            (_, HealthEvent::Drifted) => Health::Progressing,

            // From Progressing
            (Health::Progressing, HealthEvent::Applied) => {
                self.succeed();
                Health::Healthy
            }
            (Health::Progressing, HealthEvent::ApplyFailed(err)) => {
                self.fail(err);
                Health::Degraded
            }

            // From Healthy, right after Applied
            (Health::Healthy, HealthEvent::PullFailed(err)) => {
                self.fail(err);
                Health::Degraded
            }

            // Invalid transitions
            (health, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", health, event));
            }
        };

        self.health = new_health;
        Ok(())
    }

    fn fail(&mut self, err: &str) {
        self.last_error = Some(err.to_string());
        self.failure_streak += 1;
    }

    fn succeed(&mut self) {
        self.last_error = None;
        self.failure_streak = 0;
    }
}
