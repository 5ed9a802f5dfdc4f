//! Clients API: the open page contexts the worker can talk to.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use url::Url;

use crate::message::{ClientEvent, WorkerMessage};
use crate::state::ServiceWorkerId;
use crate::ServiceWorkerError;

/// Client identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// A client (open page context).
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub url: Url,
    pub client_type: ClientType,
    pub focused: bool,
    /// Worker currently controlling this client.
    pub controller: Option<ServiceWorkerId>,
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl Client {
    /// Post message to client.
    pub fn post_message(&self, message: WorkerMessage) -> Result<(), ServiceWorkerError> {
        self.tx
            .send(ClientEvent::Message(message))
            .map_err(|_| ServiceWorkerError::NotFound(format!("client {} closed", self.id)))
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Options for `match_all`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

impl ClientMatchOptions {
    /// Every open client of any type.
    pub fn all() -> Self {
        Self {
            include_uncontrolled: true,
            client_type: ClientType::All,
        }
    }
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<ClientId, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open context and return its inbox. Contexts that have
    /// gone away are dropped first.
    pub fn connect(
        &mut self,
        url: Url,
        client_type: ClientType,
    ) -> (ClientId, mpsc::UnboundedReceiver<ClientEvent>) {
        self.prune();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ClientId::new();
        debug!(client = %id, url = %url, "Client connected");
        self.clients.insert(
            id.clone(),
            Client {
                id: id.clone(),
                url,
                client_type,
                focused: false,
                controller: None,
                tx,
            },
        );
        (id, rx)
    }

    /// Get a client by ID.
    pub fn get(&self, id: &ClientId) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &ClientId) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Drop clients whose context has gone away.
    pub fn prune(&mut self) -> usize {
        let before = self.clients.len();
        self.clients.retain(|_, c| !c.is_closed());
        let pruned = before - self.clients.len();
        if pruned > 0 {
            trace!(pruned, "Pruned closed clients");
        }
        pruned
    }

    /// Match all open clients.
    pub fn match_all(&self, options: ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| !c.is_closed())
            .filter(|c| options.include_uncontrolled || c.controller.is_some())
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        matched
    }

    /// Make `worker` the controller of every open client it does not
    /// already control. Returns the newly claimed clients.
    pub fn claim(&mut self, worker: ServiceWorkerId) -> Vec<ClientId> {
        self.prune();
        let mut claimed = Vec::new();
        for client in self.clients.values_mut() {
            if client.controller == Some(worker) {
                continue;
            }
            client.controller = Some(worker);
            let _ = client.tx.send(ClientEvent::ControllerChange { worker_id: worker });
            trace!(client = %client.id, worker = %worker, "Client claimed");
            claimed.push(client.id.clone());
        }
        claimed.sort_by(|a, b| a.0.cmp(&b.0));
        claimed
    }

    /// Open a window.
    pub fn open_window(
        &mut self,
        url: Url,
        controller: Option<ServiceWorkerId>,
    ) -> (ClientId, mpsc::UnboundedReceiver<ClientEvent>) {
        let (id, rx) = self.connect(url, ClientType::Window);
        if let Some(client) = self.clients.get_mut(&id) {
            client.focused = true;
            client.controller = controller;
        }
        (id, rx)
    }

    /// Post a message to one client.
    pub fn post_message(
        &self,
        id: &ClientId,
        message: WorkerMessage,
    ) -> Result<(), ServiceWorkerError> {
        self.clients
            .get(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))?
            .post_message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://app.example.com/").unwrap()
    }

    #[test]
    fn test_connect_and_get() {
        let mut clients = Clients::new();
        let (id, _rx) = clients.connect(url(), ClientType::Window);

        let client = clients.get(&id).unwrap();
        assert_eq!(client.client_type, ClientType::Window);
        assert!(client.controller.is_none());
    }

    #[test]
    fn test_post_message_delivers() {
        let mut clients = Clients::new();
        let (id, mut rx) = clients.connect(url(), ClientType::Window);
        let message = WorkerMessage::NewVersionAvailable {
            version: "2".to_string(),
        };

        clients.post_message(&id, message.clone()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ClientEvent::Message(message));
    }

    #[test]
    fn test_closed_clients_are_skipped_and_pruned() {
        let mut clients = Clients::new();
        let (_open, _rx) = clients.connect(url(), ClientType::Window);
        let (_closed, rx) = clients.connect(url(), ClientType::Window);
        drop(rx);

        assert_eq!(clients.match_all(ClientMatchOptions::all()).len(), 1);
        assert_eq!(clients.prune(), 1);
        assert_eq!(clients.len(), 1);
    }

    #[test]
    fn test_connect_drops_closed_clients() {
        let mut clients = Clients::new();
        for _ in 0..100 {
            let (_id, rx) = clients.connect(url(), ClientType::Window);
            drop(rx);
        }
        assert_eq!(clients.len(), 100);

        let (id, _rx) = clients.connect(url(), ClientType::Window);
        assert_eq!(clients.len(), 1);
        assert!(clients.get(&id).is_some());
    }

    #[test]
    fn test_claim_drops_closed_clients() {
        let mut clients = Clients::new();
        let (open, _rx) = clients.connect(url(), ClientType::Window);
        let (_closed, rx) = clients.connect(url(), ClientType::Window);
        drop(rx);

        assert_eq!(clients.claim(ServiceWorkerId::new()), vec![open]);
        assert_eq!(clients.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut clients = Clients::new();
        let (id, _rx) = clients.connect(url(), ClientType::Window);

        assert!(clients.remove(&id).is_some());
        assert!(clients.is_empty());
        assert!(clients.remove(&id).is_none());
    }

    #[test]
    fn test_match_all_filters_uncontrolled() {
        let mut clients = Clients::new();
        let (_a, _rx_a) = clients.connect(url(), ClientType::Window);
        let (_b, _rx_b) = clients.connect(url(), ClientType::Worker);

        let options = ClientMatchOptions::default();
        assert!(clients.match_all(options).is_empty());
        assert_eq!(clients.match_all(ClientMatchOptions::all()).len(), 2);
    }

    #[test]
    fn test_claim_sets_controller_once() {
        let mut clients = Clients::new();
        let (id, mut rx) = clients.connect(url(), ClientType::Window);
        let worker = ServiceWorkerId::new();

        assert_eq!(clients.claim(worker), vec![id.clone()]);
        assert_eq!(clients.get(&id).unwrap().controller, Some(worker));
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::ControllerChange { worker_id: worker }
        );

        assert!(clients.claim(worker).is_empty());
    }

    #[test]
    fn test_open_window() {
        let mut clients = Clients::new();
        let (id, _rx) = clients.open_window(url(), None);

        let client = clients.get(&id).unwrap();
        assert!(client.focused);
        assert_eq!(client.url, url());
    }
}
