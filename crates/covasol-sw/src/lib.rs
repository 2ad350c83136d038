//! # Covasol Offline Worker
//!
//! Offline cache controller for the Covasol site. It sits between the pages
//! it controls and the network, answering each GET request from one of two
//! version-named caches or from the network.
//!
//! ## Features
//!
//! - **Lifecycle**: install (precache the static manifest), activate (purge
//!   caches from old versions, claim open pages)
//! - **Routing**: API and admin paths are never intercepted; static assets go
//!   Cache-First, everything else Network-First
//! - **Offline fallbacks**: a reserved offline page for navigations and a
//!   placeholder image for images
//! - **Push**: notifications from push payloads, focus-or-open on click
//! - **Background sync**: registration and dispatch of sync tags
//!
//! ## Architecture
//!
//! ```text
//! WorkerHandle ──mpsc──▶ dispatch loop
//!                            │
//!                            └── OfflineController
//!                                    ├── Router            (request → Route)
//!                                    ├── strategies        (cache-first / network-first)
//!                                    ├── dyn Fetcher       (network)
//!                                    ├── dyn CacheBackend  (memory or sqlite)
//!                                    │       ├── covasol-static-v1
//!                                    │       └── covasol-dynamic-v1
//!                                    ├── Clients
//!                                    ├── Notifications
//!                                    └── SyncManager
//! ```

use covasol_common::CovasolError;
use covasol_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod lifecycle;
pub mod push;
pub mod route;
pub mod sqlite;
pub mod strategy;
pub mod sync;

pub use cache::{CacheBackend, CacheEntry, CacheStorage};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use config::{NotificationDefaults, StrategyTimeouts, WorkerConfig};
pub use controller::{ActivationReport, ClickOutcome, ControllerEvent, OfflineController};
pub use dispatch::{spawn_worker, WorkerEvent, WorkerHandle};
pub use lifecycle::{ServiceWorkerId, ServiceWorkerState, WorkerLifecycle};
pub use push::{NotificationId, NotificationIntent, Notifications, PushPayload};
pub use route::{PassthroughReason, Route, Router};
pub use sqlite::SqliteCacheStorage;
pub use strategy::{FetchOutcome, FetchResponse, ResponseSource};
pub use sync::{SyncManager, SyncOutcome, CONTACT_FORM_SYNC};

/// Errors that can occur in offline worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Install failed for {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Worker is no longer running")]
    Closed,
}

impl From<ServiceWorkerError> for CovasolError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::Network(net) => net.into(),
            ServiceWorkerError::StateError(msg) => CovasolError::lifecycle(msg),
            ServiceWorkerError::Config(msg) => CovasolError::config(msg),
            ServiceWorkerError::NotFound(what) => CovasolError::NotFound(what),
            ServiceWorkerError::Closed => CovasolError::Cancelled,
            ServiceWorkerError::Storage(e) => {
                CovasolError::storage_with_source("cache database", e)
            }
            other => CovasolError::cache(other.to_string()),
        }
    }
}
