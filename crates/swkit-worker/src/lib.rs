//! # swkit Worker
//!
//! Offline caching and version-update coordination for a single-page web
//! application.
//!
//! ## Features
//!
//! - **Lifecycle**: install the navigation shell, activate, sweep stale caches
//! - **Routing**: network-first for API calls, cache-first for everything else
//! - **Version checks**: compare the published `version.json` with this build
//! - **Update signals**: `NEW_VERSION_AVAILABLE` to every open page
//! - **Push**: notifications from push payloads
//!
//! ## Architecture
//!
//! ```text
//! Registration
//!     ├── installing / waiting / active (ServiceWorker)
//!     │       ├── RequestRouter ── CacheStore + Fetcher
//!     │       ├── VersionOracle ── Fetcher
//!     │       └── UpdateNotifier ── Clients
//!     └── Clients
//!             └── Client → ClientEvent inbox
//!
//! UpdateCoordinator (page side)
//! ```
//!
//! Each build owns one cache generation named
//! `{prefix}-{build_date}-{manual_version}`; activation deletes every other
//! generation that shares the prefix.

use swkit_cache::CacheError;
use swkit_net::NetError;
use thiserror::Error;

pub mod clients;
pub mod config;
pub mod identity;
pub mod lifecycle;
pub mod message;
pub mod notifier;
pub mod oracle;
pub mod push;
pub mod registration;
pub mod router;
pub mod state;
pub mod updater;

#[cfg(test)]
mod testing;

pub use clients::{Client, ClientId, ClientMatchOptions, ClientType, Clients};
pub use config::{NotificationConfig, WorkerConfig};
pub use identity::{BuildIdentity, VersionDescriptor};
pub use lifecycle::{ServiceWorker, WorkerContext};
pub use message::{ClientEvent, ClientMessage, NotificationRequest, ServiceWorkerEvent, WorkerMessage};
pub use notifier::UpdateNotifier;
pub use oracle::{OracleError, VersionOracle, VersionStatus};
pub use push::PushPayload;
pub use registration::Registration;
pub use router::{RequestClass, RequestRouter, RoutePolicy};
pub use state::{ServiceWorkerId, ServiceWorkerState};
pub use updater::UpdateCoordinator;

// ==================== Errors ====================

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Message error: {0}")]
    Message(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
