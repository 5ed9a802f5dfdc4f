//! Lifecycle controller: install, activate, poll, teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{join_all, try_join_all};
use swkit_cache::{CacheEntry, CacheStore, RequestKey};
use swkit_net::{Fetcher, Request, Response};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::{ClientId, Clients};
use crate::config::WorkerConfig;
use crate::identity::VersionDescriptor;
use crate::message::{ClientEvent, ClientMessage, NotificationRequest, ServiceWorkerEvent};
use crate::notifier::UpdateNotifier;
use crate::oracle::{VersionOracle, VersionStatus};
use crate::push::PushPayload;
use crate::router::{RequestRouter, RoutePolicy};
use crate::state::{ServiceWorkerId, ServiceWorkerState};
use crate::ServiceWorkerError;

/// Shared host handles a worker runs against.
pub struct WorkerContext<S, F> {
    pub caches: Arc<S>,
    pub fetcher: Arc<F>,
    pub clients: Arc<RwLock<Clients>>,
    pub events: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl<S, F> Clone for WorkerContext<S, F> {
    fn clone(&self) -> Self {
        Self {
            caches: Arc::clone(&self.caches),
            fetcher: Arc::clone(&self.fetcher),
            clients: Arc::clone(&self.clients),
            events: self.events.clone(),
        }
    }
}

/// One worker instance, bound to a single build and cache generation.
pub struct ServiceWorker<S, F> {
    id: ServiceWorkerId,
    config: WorkerConfig,
    origin: Url,
    generation: String,
    context: WorkerContext<S, F>,
    router: RequestRouter<S, F>,
    oracle: VersionOracle<F>,
    notifier: UpdateNotifier,
    state: RwLock<ServiceWorkerState>,
    skip_waiting: AtomicBool,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl<S: CacheStore, F: Fetcher> ServiceWorker<S, F> {
    /// Create a worker for `config`. Nothing is touched until `install`.
    pub fn new(
        config: WorkerConfig,
        context: WorkerContext<S, F>,
    ) -> Result<Self, ServiceWorkerError> {
        config.validate()?;
        let origin = config.origin_url()?;
        let generation = config.generation_name();
        let endpoint = origin.join(&config.version_endpoint)?;

        let router = RequestRouter::new(
            Arc::clone(&context.caches),
            Arc::clone(&context.fetcher),
            generation.clone(),
            RoutePolicy::from_config(&config),
        );
        let oracle = VersionOracle::new(
            Arc::clone(&context.fetcher),
            endpoint,
            config.build.manual_version.clone(),
        );
        let notifier = UpdateNotifier::new(Arc::clone(&context.clients));

        Ok(Self {
            id: ServiceWorkerId::new(),
            config,
            origin,
            generation,
            context,
            router,
            oracle,
            notifier,
            state: RwLock::new(ServiceWorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
            poller: Mutex::new(None),
        })
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    /// Name of the cache generation this worker owns.
    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Ask to be activated without waiting for old clients to close.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    async fn set_state(&self, next: ServiceWorkerState) -> Result<(), ServiceWorkerError> {
        let mut state = self.state.write().await;
        if !state.can_transition_to(next) {
            return Err(ServiceWorkerError::StateError(format!(
                "{} cannot go from {:?} to {:?}",
                self.id, *state, next
            )));
        }
        *state = next;
        drop(state);

        debug!(worker = %self.id, state = ?next, "State changed");
        let _ = self.context.events.send(ServiceWorkerEvent::StateChange {
            worker_id: self.id,
            new_state: next,
        });
        Ok(())
    }

    // ==================== Install ====================

    /// Populate this build's generation with the navigation shell.
    ///
    /// Every shell resource is fetched before anything is written, so a
    /// failed fetch leaves no entries behind. A failed install makes the
    /// worker redundant.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        self.set_state(ServiceWorkerState::Installing).await?;

        match self.precache().await {
            Ok(count) => {
                info!(worker = %self.id, cache = %self.generation, count, "Installed");
                self.set_state(ServiceWorkerState::Installed).await?;
                if self.config.skip_waiting_on_install {
                    self.skip_waiting();
                }
                Ok(())
            }
            Err(e) => {
                warn!(worker = %self.id, error = %e, "Install failed");
                self.set_state(ServiceWorkerState::Redundant).await?;
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<usize, ServiceWorkerError> {
        let urls = self
            .config
            .precache
            .iter()
            .map(|path| self.origin.join(path))
            .collect::<Result<Vec<Url>, _>>()?;

        let responses = try_join_all(urls.iter().map(|url| self.fetch_shell(url))).await?;

        let existed = self.context.caches.has(&self.generation).await?;
        self.context.caches.open(&self.generation).await?;

        for (url, response) in urls.iter().zip(&responses) {
            let entry = CacheEntry::from_response(RequestKey::get(url), response);
            if let Err(e) = self.context.caches.put(&self.generation, entry).await {
                if !existed {
                    if let Err(cleanup) = self.context.caches.delete(&self.generation).await {
                        warn!(
                            cache = %self.generation,
                            error = %cleanup,
                            "Failed to remove partial generation"
                        );
                    }
                }
                return Err(ServiceWorkerError::InstallFailed(format!("{url}: {e}")));
            }
        }
        Ok(responses.len())
    }

    async fn fetch_shell(&self, url: &Url) -> Result<Response, ServiceWorkerError> {
        let response = self
            .context
            .fetcher
            .fetch(Request::get(url.clone()))
            .await
            .map_err(|e| ServiceWorkerError::InstallFailed(format!("{url}: {e}")))?;
        if !response.ok() {
            return Err(ServiceWorkerError::InstallFailed(format!(
                "{url}: status {}",
                response.status
            )));
        }
        Ok(response)
    }

    // ==================== Activate ====================

    /// Sweep stale generations and check the version concurrently, then
    /// claim open clients and start the periodic poll.
    pub async fn activate(self: &Arc<Self>) -> Result<(), ServiceWorkerError> {
        self.set_state(ServiceWorkerState::Activating).await?;

        let (swept, _) = tokio::join!(self.sweep_generations(), self.check_for_update());
        match swept {
            Ok(removed) if !removed.is_empty() => {
                info!(worker = %self.id, ?removed, "Removed stale caches")
            }
            Ok(_) => {}
            Err(e) => warn!(worker = %self.id, error = %e, "Cache sweep failed"),
        }

        self.claim_clients().await;
        self.set_state(ServiceWorkerState::Activated).await?;
        self.start_polling().await;
        Ok(())
    }

    /// Delete every generation of this application except the current one.
    /// Returns the names deleted by this call.
    pub async fn sweep_generations(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let prefix = self.config.generation_prefix();
        let stale: Vec<String> = self
            .context
            .caches
            .keys()
            .await?
            .into_iter()
            .filter(|name| name.starts_with(&prefix) && *name != self.generation)
            .collect();

        let results = join_all(stale.iter().map(|name| self.context.caches.delete(name))).await;

        let mut removed = Vec::new();
        for (name, result) in stale.into_iter().zip(results) {
            match result {
                Ok(true) => removed.push(name),
                // Already gone: a concurrent sweep got there first.
                Ok(false) => {}
                Err(e) => warn!(cache = %name, error = %e, "Failed to delete stale cache"),
            }
        }
        Ok(removed)
    }

    async fn claim_clients(&self) {
        let claimed = self.context.clients.write().await.claim(self.id);
        for client_id in claimed {
            let _ = self.context.events.send(ServiceWorkerEvent::ControllerChange {
                client_id,
                worker_id: self.id,
            });
        }
    }

    // ==================== Version polling ====================

    /// Run one version check, notifying clients on mismatch. Failures are
    /// logged and yield `None`.
    pub async fn check_for_update(&self) -> Option<VersionDescriptor> {
        match self.oracle.check().await {
            Ok(VersionStatus::Current) => None,
            Ok(VersionStatus::Outdated(remote)) => {
                self.notifier.notify(&remote.version).await;
                Some(remote)
            }
            Err(e) => {
                warn!(worker = %self.id, error = %e, "Version check failed");
                None
            }
        }
    }

    async fn start_polling(self: &Arc<Self>) {
        let period = self.config.poll_interval();
        let worker: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(worker) = worker.upgrade() else {
                    break;
                };
                debug!(worker = %worker.id, "Periodic version check");
                worker.check_for_update().await;
            }
        });

        if let Some(previous) = self.poller.lock().await.replace(handle) {
            previous.abort();
        }
    }

    // ==================== Events ====================

    /// Route an intercepted request.
    pub async fn handle_fetch(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        self.router.route(request).await
    }

    /// Handle a message from a foreground context.
    pub fn handle_message(&self, message: ClientMessage) {
        match message {
            ClientMessage::SkipWaiting => {
                debug!(worker = %self.id, "Skip waiting requested");
                self.skip_waiting();
            }
        }
    }

    /// Turn a push payload into a notification for the host to show.
    pub fn handle_push(
        &self,
        data: Option<&[u8]>,
    ) -> Result<Option<NotificationRequest>, ServiceWorkerError> {
        let Some(data) = data else {
            return Ok(None);
        };
        let payload = PushPayload::parse(data)?;
        let notification = payload.into_notification(&self.config.notifications);
        let _ = self
            .context
            .events
            .send(ServiceWorkerEvent::ShowNotification(notification.clone()));
        Ok(Some(notification))
    }

    /// Open a window on the configured page after a notification click.
    pub async fn handle_notification_click(
        &self,
    ) -> Result<(ClientId, mpsc::UnboundedReceiver<ClientEvent>), ServiceWorkerError> {
        let url = self.origin.join(&self.config.notifications.open_path)?;
        debug!(worker = %self.id, url = %url, "Opening window for notification");
        Ok(self
            .context
            .clients
            .write()
            .await
            .open_window(url, Some(self.id)))
    }

    /// Wait for background cache writes to finish.
    pub async fn settle(&self) {
        self.router.settle().await;
    }

    /// Stop polling, finish pending writes and become redundant.
    pub async fn teardown(&self) {
        if let Some(poller) = self.poller.lock().await.take() {
            poller.abort();
        }
        self.router.settle().await;
        if self.state().await != ServiceWorkerState::Redundant {
            let _ = self.set_state(ServiceWorkerState::Redundant).await;
        }
        info!(worker = %self.id, "Torn down");
    }
}
