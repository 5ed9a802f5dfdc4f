//! Host-side registration: holds the installing, waiting and active workers.

use std::sync::Arc;

use swkit_cache::CacheStore;
use swkit_net::{Fetcher, Request, Response};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};
use url::Url;

use crate::clients::{ClientId, Clients};
use crate::config::WorkerConfig;
use crate::identity::VersionDescriptor;
use crate::lifecycle::{ServiceWorker, WorkerContext};
use crate::message::{ClientEvent, ClientMessage, NotificationRequest, ServiceWorkerEvent};
use crate::ServiceWorkerError;

type Slot<S, F> = RwLock<Option<Arc<ServiceWorker<S, F>>>>;

/// Registration for the application scope.
pub struct Registration<S, F> {
    context: WorkerContext<S, F>,
    scope: RwLock<Option<Url>>,
    installing: Slot<S, F>,
    waiting: Slot<S, F>,
    active: Slot<S, F>,
    /// Serializes register, activate and unregister.
    lifecycle: Mutex<()>,
}

impl<S: CacheStore, F: Fetcher> Registration<S, F> {
    /// Create an empty registration and the receiver for its lifecycle events.
    pub fn new(
        caches: Arc<S>,
        fetcher: Arc<F>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let context = WorkerContext {
            caches,
            fetcher,
            clients: Arc::new(RwLock::new(Clients::new())),
            events,
        };

        (
            Self {
                context,
                scope: RwLock::new(None),
                installing: RwLock::new(None),
                waiting: RwLock::new(None),
                active: RwLock::new(None),
                lifecycle: Mutex::new(()),
            },
            events_rx,
        )
    }

    /// Open page contexts known to this registration.
    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        Arc::clone(&self.context.clients)
    }

    /// Register a page context and return its inbox.
    pub async fn connect(&self, url: Url) -> (ClientId, mpsc::UnboundedReceiver<ClientEvent>) {
        self.context
            .clients
            .write()
            .await
            .connect(url, Default::default())
    }

    /// Forget a page context that has closed.
    pub async fn disconnect(&self, id: &ClientId) -> bool {
        let removed = self.context.clients.write().await.remove(id).is_some();
        if removed {
            debug!(client = %id, "Client disconnected");
        }
        removed
    }

    pub async fn scope(&self) -> Option<Url> {
        self.scope.read().await.clone()
    }

    pub async fn installing(&self) -> Option<Arc<ServiceWorker<S, F>>> {
        self.installing.read().await.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<ServiceWorker<S, F>>> {
        self.waiting.read().await.clone()
    }

    pub async fn active(&self) -> Option<Arc<ServiceWorker<S, F>>> {
        self.active.read().await.clone()
    }

    /// Install a worker for `config`.
    ///
    /// The new worker is activated straight away when it asked to skip
    /// waiting or nothing is active yet; otherwise it waits for
    /// `SKIP_WAITING`.
    pub async fn register(
        &self,
        config: WorkerConfig,
    ) -> Result<Arc<ServiceWorker<S, F>>, ServiceWorkerError> {
        let _guard = self.lifecycle.lock().await;

        let scope = script_scope(&config)?;
        let worker = Arc::new(ServiceWorker::new(config, self.context.clone())?);
        info!(worker = %worker.id(), scope = %scope, cache = %worker.generation(), "Registering");
        *self.scope.write().await = Some(scope);

        *self.installing.write().await = Some(Arc::clone(&worker));
        let _ = self.context.events.send(ServiceWorkerEvent::UpdateFound {
            worker_id: worker.id(),
        });

        let installed = worker.install().await;
        self.installing.write().await.take();
        installed?;

        // A newer install replaces whatever was waiting.
        let replaced = self.waiting.write().await.replace(Arc::clone(&worker));
        if let Some(previous) = replaced {
            previous.teardown().await;
        }

        if worker.skip_waiting_requested() || self.active.read().await.is_none() {
            self.promote_waiting().await?;
        } else {
            debug!(worker = %worker.id(), "Waiting for SKIP_WAITING");
        }
        Ok(worker)
    }

    /// Activate the waiting worker, if any. Returns whether one was promoted.
    pub async fn activate_waiting(&self) -> Result<bool, ServiceWorkerError> {
        let _guard = self.lifecycle.lock().await;
        self.promote_waiting().await
    }

    async fn promote_waiting(&self) -> Result<bool, ServiceWorkerError> {
        let Some(next) = self.waiting.write().await.take() else {
            return Ok(false);
        };

        // Drain the old worker's writes before the new one sweeps its cache.
        let previous = self.active.read().await.clone();
        if let Some(previous) = previous {
            previous.teardown().await;
        }

        next.activate().await?;
        *self.active.write().await = Some(next);
        Ok(true)
    }

    /// Deliver a message from a foreground context.
    pub async fn post_message(&self, message: ClientMessage) -> Result<bool, ServiceWorkerError> {
        match message {
            ClientMessage::SkipWaiting => {
                let _guard = self.lifecycle.lock().await;
                let waiting = self.waiting.read().await.clone();
                match waiting {
                    Some(worker) => {
                        worker.handle_message(message);
                        self.promote_waiting().await
                    }
                    None => {
                        debug!("SKIP_WAITING with no waiting worker");
                        Ok(false)
                    }
                }
            }
        }
    }

    /// Route a request through the active worker. Out-of-scope requests and
    /// requests made before activation go straight to the network.
    pub async fn handle_fetch(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        let in_scope = match self.scope.read().await.as_ref() {
            Some(scope) => request.url.as_str().starts_with(scope.as_str()),
            None => false,
        };
        let active = self.active.read().await.clone();
        match active {
            Some(worker) if in_scope => worker.handle_fetch(request).await,
            _ => Ok(self.context.fetcher.fetch(request).await?),
        }
    }

    /// Ask the active worker to compare versions now.
    pub async fn check_for_updates(&self) -> Option<VersionDescriptor> {
        let active = self.active.read().await.clone()?;
        active.check_for_update().await
    }

    /// Deliver a push message to the active worker.
    pub async fn push(
        &self,
        data: Option<&[u8]>,
    ) -> Result<Option<NotificationRequest>, ServiceWorkerError> {
        self.require_active().await?.handle_push(data)
    }

    /// Handle a click on a shown notification.
    pub async fn notification_click(
        &self,
    ) -> Result<(ClientId, mpsc::UnboundedReceiver<ClientEvent>), ServiceWorkerError> {
        self.require_active().await?.handle_notification_click().await
    }

    async fn require_active(&self) -> Result<Arc<ServiceWorker<S, F>>, ServiceWorkerError> {
        self.active
            .read()
            .await
            .clone()
            .ok_or_else(|| ServiceWorkerError::NotFound("no active worker".to_string()))
    }

    /// Tear down every worker. Returns whether anything was registered.
    pub async fn unregister(&self) -> bool {
        let _guard = self.lifecycle.lock().await;
        let mut found = false;
        for slot in [&self.installing, &self.waiting, &self.active] {
            if let Some(worker) = slot.write().await.take() {
                worker.teardown().await;
                found = true;
            }
        }
        self.scope.write().await.take();
        if found {
            info!("Unregistered");
        }
        found
    }
}

/// Scope is the directory of the worker script.
fn script_scope(config: &WorkerConfig) -> Result<Url, ServiceWorkerError> {
    let origin = config
        .origin_url()
        .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;
    let script = origin
        .join(&config.script_path)
        .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;
    if script.origin() != origin.origin() {
        return Err(ServiceWorkerError::RegistrationFailed(format!(
            "script {script} is not on {}",
            origin.origin().ascii_serialization()
        )));
    }
    script
        .join("./")
        .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))
}
