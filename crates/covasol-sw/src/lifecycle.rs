//! Worker lifecycle state machine.
//!
//! ```text
//! Parsed → Installing → Installed (waiting) → Activating → Activated
//!              │              │                   │            │
//!              └──────────────┴───────────────────┴────────────┴──→ Redundant
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ServiceWorkerError;

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Precaching the static manifest.
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Purging old caches.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

impl ServiceWorkerState {
    fn can_transition_to(self, next: ServiceWorkerState) -> bool {
        use ServiceWorkerState::*;
        matches!(
            (self, next),
            (Parsed, Installing)
                | (Installing, Installed)
                | (Installed, Activating)
                | (Activating, Activated)
                | (Parsed | Installing | Installed | Activating | Activated, Redundant)
        )
    }
}

/// Lifecycle of one worker version.
#[derive(Debug, Clone)]
pub struct WorkerLifecycle {
    id: ServiceWorkerId,
    state: ServiceWorkerState,
    state_changed_at: Instant,
}

impl WorkerLifecycle {
    pub fn new() -> Self {
        Self {
            id: ServiceWorkerId::new(),
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn state(&self) -> ServiceWorkerState {
        self.state
    }

    pub fn state_changed_at(&self) -> Instant {
        self.state_changed_at
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: ServiceWorkerState) -> Result<(), ServiceWorkerError> {
        if !self.state.can_transition_to(next) {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot move from {:?} to {:?}",
                self.state, next
            )));
        }
        debug!(worker = self.id.0, from = ?self.state, to = ?next, "Worker state change");
        self.state = next;
        self.state_changed_at = Instant::now();
        Ok(())
    }

    /// Take up a version that was installed and activated by an earlier run.
    ///
    /// Only a freshly parsed worker can be restored.
    pub fn restore_activated(&mut self) -> Result<(), ServiceWorkerError> {
        if self.state != ServiceWorkerState::Parsed {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot restore a worker in {:?}",
                self.state
            )));
        }
        debug!(worker = self.id.0, "Restoring previously activated worker");
        self.state = ServiceWorkerState::Activated;
        self.state_changed_at = Instant::now();
        Ok(())
    }

    /// Only an active worker answers fetch events.
    pub fn can_intercept_fetch(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Installed but not yet activated.
    pub fn is_waiting(&self) -> bool {
        self.state == ServiceWorkerState::Installed
    }

    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

impl Default for WorkerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
