//! Broadcasts update signals to open clients.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::clients::{ClientMatchOptions, Clients};
use crate::message::WorkerMessage;

/// Tells foreground contexts that a newer build exists.
///
/// Never reloads anything itself; the foreground decides when to apply.
pub struct UpdateNotifier {
    clients: Arc<RwLock<Clients>>,
}

impl UpdateNotifier {
    pub fn new(clients: Arc<RwLock<Clients>>) -> Self {
        Self { clients }
    }

    /// Post `NEW_VERSION_AVAILABLE` to every open client. Returns the number
    /// of clients reached. Closed clients are removed from the registry.
    pub async fn notify(&self, version: &str) -> usize {
        let message = WorkerMessage::NewVersionAvailable {
            version: version.to_string(),
        };

        let mut clients = self.clients.write().await;
        clients.prune();
        let mut delivered = 0;
        for client in clients.match_all(ClientMatchOptions::all()) {
            match client.post_message(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(client = %client.id, error = %e, "Update signal not delivered"),
            }
        }
        debug!(version, delivered, "Update signal broadcast");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ClientType;
    use crate::message::ClientEvent;
    use url::Url;

    #[tokio::test]
    async fn test_one_message_per_open_client() {
        let clients = Arc::new(RwLock::new(Clients::new()));
        let url = Url::parse("https://app.example.com/").unwrap();
        let (_a, mut rx_a) = clients.write().await.connect(url.clone(), ClientType::Window);
        let (_b, mut rx_b) = clients.write().await.connect(url.clone(), ClientType::Window);
        let (_c, rx_c) = clients.write().await.connect(url, ClientType::Window);
        drop(rx_c);

        let notifier = UpdateNotifier::new(Arc::clone(&clients));
        assert_eq!(notifier.notify("2.0.0-1").await, 2);

        let expected = ClientEvent::Message(WorkerMessage::NewVersionAvailable {
            version: "2.0.0-1".to_string(),
        });
        assert_eq!(rx_a.try_recv().unwrap(), expected);
        assert_eq!(rx_b.try_recv().unwrap(), expected);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_pages_are_forgotten() {
        let clients = Arc::new(RwLock::new(Clients::new()));
        let url = Url::parse("https://app.example.com/").unwrap();
        {
            let mut registry = clients.write().await;
            for _ in 0..1000 {
                let (_id, rx) = registry.connect(url.clone(), ClientType::Window);
                drop(rx);
            }
        }

        let notifier = UpdateNotifier::new(Arc::clone(&clients));
        assert_eq!(notifier.notify("v2").await, 0);
        assert!(clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_clients() {
        let notifier = UpdateNotifier::new(Arc::new(RwLock::new(Clients::new())));
        assert_eq!(notifier.notify("2.0.0-1").await, 0);
    }
}
