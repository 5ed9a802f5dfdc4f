//! Foreground update coordination.
//!
//! Runs on the page side: listens for update signals, remembers whether a
//! newer build is ready, and applies it on request by activating the waiting
//! worker and reloading.

use std::sync::Arc;

use swkit_cache::CacheStore;
use swkit_net::Fetcher;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use crate::clients::ClientId;
use crate::identity::VersionDescriptor;
use crate::message::{ClientEvent, ClientMessage, ServiceWorkerEvent, WorkerMessage};
use crate::registration::Registration;
use crate::state::{ServiceWorkerId, ServiceWorkerState};
use crate::ServiceWorkerError;

/// Called when an update becomes available. The version is known when the
/// signal came from the version check, and unknown when a new worker
/// finished installing.
pub type UpdateAvailableHook = Box<dyn Fn(Option<&str>) + Send + Sync>;

/// Called after an update was applied; hosts reload the page here.
pub type UpdateAppliedHook = Box<dyn Fn() + Send + Sync>;

pub struct UpdateCoordinator<S, F> {
    registration: Arc<Registration<S, F>>,
    client_id: ClientId,
    inbox: mpsc::UnboundedReceiver<ClientEvent>,
    controller: Option<ServiceWorkerId>,
    installing: Option<ServiceWorkerId>,
    announced: Option<String>,
    new_version_available: bool,
    on_update_available: Option<UpdateAvailableHook>,
    on_update_applied: Option<UpdateAppliedHook>,
}

impl<S: CacheStore, F: Fetcher> UpdateCoordinator<S, F> {
    /// Connect a page context at `url` to `registration`.
    pub async fn attach(registration: Arc<Registration<S, F>>, url: Url) -> Self {
        let (client_id, inbox) = registration.connect(url).await;
        Self {
            registration,
            client_id,
            inbox,
            controller: None,
            installing: None,
            announced: None,
            new_version_available: false,
            on_update_available: None,
            on_update_applied: None,
        }
    }

    pub fn on_update_available(&mut self, hook: impl Fn(Option<&str>) + Send + Sync + 'static) {
        self.on_update_available = Some(Box::new(hook));
    }

    pub fn on_update_applied(&mut self, hook: impl Fn() + Send + Sync + 'static) {
        self.on_update_applied = Some(Box::new(hook));
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn controller(&self) -> Option<ServiceWorkerId> {
        self.controller
    }

    pub fn new_version_available(&self) -> bool {
        self.new_version_available
    }

    fn announce(&mut self, version: Option<&str>) {
        self.new_version_available = true;
        if let Some(hook) = &self.on_update_available {
            hook(version);
        }
    }

    /// Apply one event from this page's inbox.
    pub fn handle_client_event(&mut self, event: &ClientEvent) {
        match event {
            ClientEvent::Message(WorkerMessage::NewVersionAvailable { version }) => {
                // The poll repeats the signal every hour; prompt once per version.
                if self.announced.as_deref() == Some(version.as_str()) {
                    debug!(version = %version, "Update already announced");
                    return;
                }
                info!(version = %version, "New version available");
                self.announced = Some(version.clone());
                self.announce(Some(version));
            }
            ClientEvent::ControllerChange { worker_id } => {
                debug!(client = %self.client_id, worker = %worker_id, "Controller changed");
                self.controller = Some(*worker_id);
            }
        }
    }

    /// Apply one lifecycle event from the registration.
    ///
    /// A worker that finishes installing while this page is controlled by a
    /// different worker means an update is waiting.
    pub fn handle_lifecycle_event(&mut self, event: &ServiceWorkerEvent) {
        match event {
            ServiceWorkerEvent::UpdateFound { worker_id } => {
                self.installing = Some(*worker_id);
            }
            ServiceWorkerEvent::StateChange {
                worker_id,
                new_state: ServiceWorkerState::Installed,
            } if self.installing == Some(*worker_id) => {
                self.installing = None;
                if self.controller.is_some_and(|c| c != *worker_id) {
                    info!(worker = %worker_id, "Update installed");
                    self.announce(None);
                }
            }
            _ => {}
        }
    }

    /// Handle everything already queued in the inbox. Returns the number of
    /// events handled.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.inbox.try_recv() {
            self.handle_client_event(&event);
            handled += 1;
        }
        handled
    }

    /// Wait for the next inbox event and handle it.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        let event = self.inbox.recv().await?;
        self.handle_client_event(&event);
        Some(event)
    }

    /// Activate the waiting worker and fire the applied hook. Does nothing
    /// unless an update was signalled.
    pub async fn apply_update(&mut self) -> Result<bool, ServiceWorkerError> {
        if !self.new_version_available {
            return Ok(false);
        }
        let promoted = self
            .registration
            .post_message(ClientMessage::SkipWaiting)
            .await?;
        debug!(promoted, "Applying update");

        self.new_version_available = false;
        if let Some(hook) = &self.on_update_applied {
            hook();
        }
        Ok(true)
    }

    /// Run a version check now.
    pub async fn check_for_updates(&mut self) -> Option<VersionDescriptor> {
        let remote = self.registration.check_for_updates().await;
        self.drain();
        remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::testing::{shell_fetcher, worker_config, MockFetcher};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use swkit_cache::MemoryCacheStorage;

    type TestRegistration = Registration<MemoryCacheStorage, MockFetcher>;

    fn setup(
        fetcher: Arc<MockFetcher>,
    ) -> (
        Arc<TestRegistration>,
        mpsc::UnboundedReceiver<ServiceWorkerEvent>,
    ) {
        let (registration, events) = Registration::new(Arc::new(MemoryCacheStorage::new()), fetcher);
        (Arc::new(registration), events)
    }

    fn page() -> Url {
        Url::parse("https://app.example.com/").unwrap()
    }

    fn manual(version: &str) -> WorkerConfig {
        WorkerConfig {
            skip_waiting_on_install: false,
            ..worker_config(version)
        }
    }

    #[tokio::test]
    async fn test_version_signal_is_announced_once() {
        let fetcher = shell_fetcher("v2");
        let (registration, _events) = setup(Arc::clone(&fetcher));
        let mut updater = UpdateCoordinator::attach(Arc::clone(&registration), page()).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        updater.on_update_available(move |v| sink.lock().unwrap().push(v.map(String::from)));

        registration.register(worker_config("v1")).await.unwrap();
        updater.drain();
        updater.check_for_updates().await;

        assert!(updater.new_version_available());
        assert!(updater.controller().is_some());
        assert_eq!(*seen.lock().unwrap(), vec![Some("v2".to_string())]);

        fetcher.publish_version("v3");
        updater.check_for_updates().await;
        assert_eq!(seen.lock().unwrap().len(), 2);
        registration.unregister().await;
    }

    #[tokio::test]
    async fn test_apply_update_promotes_waiting_worker() {
        let (registration, mut events) = setup(shell_fetcher("v1"));
        let mut updater = UpdateCoordinator::attach(Arc::clone(&registration), page()).await;
        let reloads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reloads);
        updater.on_update_applied(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let first = registration.register(manual("v1")).await.unwrap();
        while events.try_recv().is_ok() {}
        updater.drain();
        assert_eq!(updater.controller(), Some(first.id()));
        assert!(!updater.new_version_available());

        let second = registration.register(manual("v2")).await.unwrap();
        while let Ok(event) = events.try_recv() {
            updater.handle_lifecycle_event(&event);
        }
        assert!(updater.new_version_available());

        assert!(updater.apply_update().await.unwrap());
        assert_eq!(reloads.load(Ordering::SeqCst), 1);
        assert_eq!(
            registration.active().await.map(|w| w.id()),
            Some(second.id())
        );

        updater.drain();
        assert_eq!(updater.controller(), Some(second.id()));
        registration.unregister().await;
    }

    #[tokio::test]
    async fn test_first_install_is_not_an_update() {
        let (registration, mut events) = setup(shell_fetcher("v1"));
        let mut updater = UpdateCoordinator::attach(Arc::clone(&registration), page()).await;

        registration.register(manual("v1")).await.unwrap();
        while let Ok(event) = events.try_recv() {
            updater.handle_lifecycle_event(&event);
        }

        assert!(!updater.new_version_available());
        assert!(!updater.apply_update().await.unwrap());
        registration.unregister().await;
    }

    #[tokio::test]
    async fn test_next_event() {
        let (registration, _events) = setup(shell_fetcher("v9"));
        let mut updater = UpdateCoordinator::attach(Arc::clone(&registration), page()).await;

        registration.register(worker_config("v1")).await.unwrap();

        let event = updater.next_event().await.unwrap();
        assert_eq!(
            event,
            ClientEvent::Message(WorkerMessage::NewVersionAvailable {
                version: "v9".to_string()
            })
        );
        assert!(updater.new_version_available());
        registration.unregister().await;
    }
}
