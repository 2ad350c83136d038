//! The offline cache controller: lifecycle, fetch routing, push, and sync.

use std::sync::Arc;

use covasol_common::retry_with_backoff;
use covasol_net::{Fetcher, Request};
use futures::future::try_join_all;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheBackend, CacheEntry, CacheStorage};
use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::lifecycle::{ServiceWorkerId, ServiceWorkerState, WorkerLifecycle};
use crate::push::{NotificationId, NotificationIntent, Notifications, PushPayload};
use crate::route::{PassthroughReason, Route, Router};
use crate::strategy::{self, fetch_with_timeout, FetchOutcome, StrategyContext};
use crate::sync::{SyncManager, SyncOutcome};
use crate::ServiceWorkerError;

/// Events emitted for observers of the controller.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// Caches from other versions were deleted during activation.
    CachesDeleted { names: Vec<String> },
    /// Open pages came under this worker's control.
    ClientsClaimed { count: usize },
    /// A push message produced a notification.
    NotificationShown { id: NotificationId, url: String },
    /// A notification click focused an existing window.
    ClientFocused { client_id: String },
    /// A notification click opened a new window.
    WindowOpened { client_id: String, url: Url },
    /// A sync event was delivered.
    SyncHandled { tag: String, outcome: SyncOutcome },
}

/// What activation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub deleted_caches: Vec<String>,
    pub claimed_clients: usize,
}

/// What a notification click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An open window was already at the target and got focus.
    Focused(String),
    /// A new window was opened at the target.
    Opened(String),
}

/// One worker version. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct OfflineController {
    config: Arc<WorkerConfig>,
    router: Router,
    fetcher: Arc<dyn Fetcher>,
    caches: Arc<Mutex<Box<dyn CacheBackend>>>,
    lifecycle: Arc<RwLock<WorkerLifecycle>>,
    clients: Arc<RwLock<Clients>>,
    notifications: Arc<RwLock<Notifications>>,
    sync: Arc<Mutex<SyncManager>>,
    event_tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl OfflineController {
    /// Create a controller over the given network and cache storage.
    pub fn new(
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
        caches: Box<dyn CacheBackend>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ControllerEvent>), ServiceWorkerError> {
        config.validate()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let controller = Self {
            router: Router::new(&config),
            config: Arc::new(config),
            fetcher,
            caches: Arc::new(Mutex::new(caches)),
            lifecycle: Arc::new(RwLock::new(WorkerLifecycle::new())),
            clients: Arc::new(RwLock::new(Clients::new())),
            notifications: Arc::new(RwLock::new(Notifications::new())),
            sync: Arc::new(Mutex::new(SyncManager::new())),
            event_tx,
        };
        Ok((controller, event_rx))
    }

    /// Create a controller with in-memory caches.
    pub fn in_memory(
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ControllerEvent>), ServiceWorkerError> {
        Self::new(config, fetcher, Box::new(CacheStorage::new()))
    }

    /// A controller for the next version that shares this one's caches and
    /// open pages, as a redeploy would.
    pub fn successor(
        &self,
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ControllerEvent>), ServiceWorkerError> {
        config.validate()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let controller = Self {
            router: Router::new(&config),
            config: Arc::new(config),
            fetcher,
            caches: Arc::clone(&self.caches),
            lifecycle: Arc::new(RwLock::new(WorkerLifecycle::new())),
            clients: Arc::clone(&self.clients),
            notifications: Arc::new(RwLock::new(Notifications::new())),
            sync: Arc::new(Mutex::new(SyncManager::new())),
            event_tx,
        };
        Ok((controller, event_rx))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub async fn state(&self) -> ServiceWorkerState {
        self.lifecycle.read().await.state()
    }

    pub async fn id(&self) -> ServiceWorkerId {
        self.lifecycle.read().await.id()
    }

    /// Pages visible to the worker.
    pub fn clients(&self) -> &Arc<RwLock<Clients>> {
        &self.clients
    }

    pub fn notifications(&self) -> &Arc<RwLock<Notifications>> {
        &self.notifications
    }

    pub async fn cache_names(&self) -> Result<Vec<String>, ServiceWorkerError> {
        self.caches.lock().await.cache_names()
    }

    pub async fn cache_keys(&self, cache: &str) -> Result<Vec<String>, ServiceWorkerError> {
        self.caches.lock().await.keys(cache)
    }

    /// Exact-URL lookup across every cache.
    pub async fn cache_match(&self, url: &str) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        self.caches.lock().await.match_any(url)
    }

    fn emit(&self, event: ControllerEvent) {
        // Nobody listening is fine.
        let _ = self.event_tx.send(event);
    }

    async fn set_state(&self, state: ServiceWorkerState) -> Result<(), ServiceWorkerError> {
        let mut lifecycle = self.lifecycle.write().await;
        lifecycle.transition(state)?;
        self.emit(ControllerEvent::StateChange {
            worker_id: lifecycle.id(),
            new_state: state,
        });
        Ok(())
    }

    // ==================== Lifecycle ====================

    /// Precache the static manifest, all or nothing.
    ///
    /// On success the worker is installed, and activated too when
    /// `skip_waiting` is set. On failure it becomes redundant and nothing is
    /// stored.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        self.set_state(ServiceWorkerState::Installing).await?;

        match self.precache().await {
            Ok(count) => {
                info!(cache = %self.config.static_cache, count, "Precached static assets");
            }
            Err(e) => {
                error!(error = %e, "Install failed");
                self.set_state(ServiceWorkerState::Redundant).await?;
                return Err(e);
            }
        }

        self.set_state(ServiceWorkerState::Installed).await?;

        if self.config.skip_waiting {
            debug!("Skipping the waiting phase");
            self.activate().await?;
        }
        Ok(())
    }

    async fn precache(&self) -> Result<usize, ServiceWorkerError> {
        let urls = self.config.precache_urls()?;
        let timeout = self.config.timeouts.install;

        let fetches = urls.into_iter().map(|url| {
            let fetcher = Arc::clone(&self.fetcher);
            let retry = self.config.install_retry.clone();
            async move {
                let request = Request::get(url);
                let fetched = retry_with_backoff(&retry, || {
                    let fetcher = Arc::clone(&fetcher);
                    let request = request.clone();
                    async move {
                        match fetch_with_timeout(fetcher.as_ref(), &request, timeout).await {
                            Ok(response) if response.ok() => Ok(response),
                            Ok(response) => Err(format!("HTTP {}", response.status)),
                            Err(e) => Err(e.to_string()),
                        }
                    }
                })
                .await;

                match fetched {
                    Ok(response) => Ok(CacheEntry::from_response(&request.url, &response)),
                    Err(reason) => Err(ServiceWorkerError::InstallFailed {
                        url: request.url.to_string(),
                        reason,
                    }),
                }
            }
        });

        let entries = try_join_all(fetches).await?;
        let count = entries.len();
        self.caches
            .lock()
            .await
            .put_all(&self.config.static_cache, entries)?;
        Ok(count)
    }

    /// Take up this version from a cache filled by an earlier run.
    ///
    /// When every manifest URL is already in the static cache the worker goes
    /// straight to `Activated` without touching the network and `true` is
    /// returned. Otherwise nothing changes and the worker still needs
    /// [`install`](Self::install).
    pub async fn resume(&self) -> Result<bool, ServiceWorkerError> {
        let urls = self.config.precache_urls()?;
        let complete = {
            let caches = self.caches.lock().await;
            let mut complete = caches.has(&self.config.static_cache)?;
            for url in &urls {
                if !complete {
                    break;
                }
                complete = caches
                    .match_in(&self.config.static_cache, url.as_str())?
                    .is_some();
            }
            complete
        };
        if !complete {
            debug!(cache = %self.config.static_cache, "No complete precache to resume from");
            return Ok(false);
        }

        let mut lifecycle = self.lifecycle.write().await;
        lifecycle.restore_activated()?;
        self.emit(ControllerEvent::StateChange {
            worker_id: lifecycle.id(),
            new_state: lifecycle.state(),
        });
        info!(cache = %self.config.static_cache, "Resumed installed version");
        Ok(true)
    }

    /// Delete caches from other versions and take control of open pages.
    pub async fn activate(&self) -> Result<ActivationReport, ServiceWorkerError> {
        self.set_state(ServiceWorkerState::Activating).await?;

        let deleted_caches = {
            let mut caches = self.caches.lock().await;
            let mut deleted = Vec::new();
            for name in caches.cache_names()? {
                if !self.config.is_current_cache(&name) {
                    info!(cache = %name, "Deleting cache from an old version");
                    caches.delete_cache(&name)?;
                    deleted.push(name);
                }
            }
            deleted
        };
        if !deleted_caches.is_empty() {
            self.emit(ControllerEvent::CachesDeleted {
                names: deleted_caches.clone(),
            });
        }

        let claimed_clients = if self.config.claim_clients {
            let count = self.clients.write().await.claim(&self.config.scope);
            self.emit(ControllerEvent::ClientsClaimed { count });
            count
        } else {
            0
        };

        self.set_state(ServiceWorkerState::Activated).await?;
        Ok(ActivationReport {
            deleted_caches,
            claimed_clients,
        })
    }

    /// Mark this version as replaced.
    pub async fn retire(&self) -> Result<(), ServiceWorkerError> {
        self.set_state(ServiceWorkerState::Redundant).await
    }

    // ==================== Events ====================

    /// Answer an intercepted request, or decline to intercept it.
    pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome, ServiceWorkerError> {
        if !self.lifecycle.read().await.can_intercept_fetch() {
            return Ok(FetchOutcome::Passthrough(PassthroughReason::Inactive));
        }

        let ctx = StrategyContext {
            config: &self.config,
            fetcher: self.fetcher.as_ref(),
            caches: &self.caches,
        };

        match self.router.classify(request) {
            Route::Passthrough(reason) => {
                debug!(url = %request.url, ?reason, "Not intercepting");
                Ok(FetchOutcome::Passthrough(reason))
            }
            Route::CacheFirst => strategy::cache_first(&ctx, request)
                .await
                .map(FetchOutcome::Respond),
            Route::NetworkFirst => strategy::network_first(&ctx, request)
                .await
                .map(FetchOutcome::Respond),
        }
    }

    /// Show a notification for a push message. Absent or malformed data is ignored.
    pub async fn handle_push(&self, data: Option<&[u8]>) -> Option<NotificationId> {
        let payload = PushPayload::parse(data)?;
        let intent = NotificationIntent::from_payload(payload, &self.config.notification);
        let url = intent.url.clone();

        let id = self.notifications.write().await.show(intent);
        info!(notification = id.raw(), url = %url, "Showing push notification");
        self.emit(ControllerEvent::NotificationShown { id, url });
        Some(id)
    }

    /// Dismiss the notification, then focus a window already at its URL or
    /// open a new one there.
    pub async fn handle_notification_click(
        &self,
        id: NotificationId,
    ) -> Result<ClickOutcome, ServiceWorkerError> {
        let notification = self
            .notifications
            .write()
            .await
            .close(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("notification {}", id.raw())))?;
        let target = self.config.resolve(&notification.data.url)?;

        let mut clients = self.clients.write().await;
        let existing = clients
            .find_window(&self.config.scope, &target)
            .map(|c| c.id.clone());

        match existing {
            Some(client_id) => {
                clients.focus(&client_id)?;
                debug!(client = %client_id, url = %target, "Focused existing window");
                self.emit(ControllerEvent::ClientFocused {
                    client_id: client_id.clone(),
                });
                Ok(ClickOutcome::Focused(client_id))
            }
            None => {
                let client = clients.open_window(target.clone());
                debug!(client = %client.id, url = %target, "Opened new window");
                self.emit(ControllerEvent::WindowOpened {
                    client_id: client.id.clone(),
                    url: target,
                });
                Ok(ClickOutcome::Opened(client.id))
            }
        }
    }

    /// Register a background sync tag.
    pub async fn register_sync(&self, tag: &str) {
        self.sync.lock().await.register(tag);
    }

    /// Deliver a background sync event.
    pub async fn handle_sync(&self, tag: &str) -> SyncOutcome {
        let outcome = self.sync.lock().await.fire(tag);
        if outcome == SyncOutcome::Ignored {
            warn!(tag, "Sync event for a tag with no registration");
        }
        self.emit(ControllerEvent::SyncHandled {
            tag: tag.to_string(),
            outcome,
        });
        outcome
    }
}
