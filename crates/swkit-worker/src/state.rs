//! Worker identity and lifecycle states.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Constructed, install not started.
    #[default]
    Parsed,
    /// Populating the navigation shell.
    Installing,
    /// Installed, waiting to activate.
    Installed,
    /// Sweeping stale generations.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install failed, replaced, or torn down.
    Redundant,
}

impl ServiceWorkerState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: ServiceWorkerState) -> bool {
        use ServiceWorkerState::{Activated, Activating, Installed, Installing, Parsed, Redundant};
        matches!(
            (self, next),
            (Parsed, Installing)
                | (Installing, Installed)
                | (Installed, Activating)
                | (Activating, Activated)
                | (_, Redundant)
        ) && self != Redundant
    }
}
