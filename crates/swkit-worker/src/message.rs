//! Messages exchanged between the worker and foreground contexts.
//!
//! Wire format is JSON with a `type` tag, e.g.
//! `{"type":"NEW_VERSION_AVAILABLE","version":"1.2.0-1709294400000"}` and
//! `{"type":"SKIP_WAITING"}`.

use serde::{Deserialize, Serialize};

use crate::clients::ClientId;
use crate::state::{ServiceWorkerId, ServiceWorkerState};
use crate::ServiceWorkerError;

/// Worker → foreground.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// The descriptor on the server names a different build.
    NewVersionAvailable { version: String },
}

/// Foreground → worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Activate the waiting worker now.
    SkipWaiting,
}

impl WorkerMessage {
    pub fn to_json(&self) -> Result<String, ServiceWorkerError> {
        serde_json::to_string(self).map_err(|e| ServiceWorkerError::Message(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, ServiceWorkerError> {
        serde_json::from_str(json).map_err(|e| ServiceWorkerError::Message(e.to_string()))
    }
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, ServiceWorkerError> {
        serde_json::to_string(self).map_err(|e| ServiceWorkerError::Message(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, ServiceWorkerError> {
        serde_json::from_str(json).map_err(|e| ServiceWorkerError::Message(e.to_string()))
    }
}

/// Event delivered to a single client context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Message posted by the worker.
    Message(WorkerMessage),
    /// A worker took control of this client.
    ControllerChange { worker_id: ServiceWorkerId },
}

/// Notification the host should display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
}

/// Lifecycle events observed by the registering context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// A new worker started installing.
    UpdateFound { worker_id: ServiceWorkerId },
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A client is now controlled by `worker_id`.
    ControllerChange {
        client_id: ClientId,
        worker_id: ServiceWorkerId,
    },
    /// Show a notification.
    ShowNotification(NotificationRequest),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_version_wire_format() {
        let message = WorkerMessage::NewVersionAvailable {
            version: "1.2.0-1".to_string(),
        };
        assert_eq!(
            message.to_json().unwrap(),
            r#"{"type":"NEW_VERSION_AVAILABLE","version":"1.2.0-1"}"#
        );
    }

    #[test]
    fn test_skip_waiting_wire_format() {
        assert_eq!(
            ClientMessage::SkipWaiting.to_json().unwrap(),
            r#"{"type":"SKIP_WAITING"}"#
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"SKIP_WAITING"}"#).unwrap(),
            ClientMessage::SkipWaiting
        );
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"RELOAD_ALL"}"#).is_err());
        assert!(WorkerMessage::from_json(r#"{"type":"NEW_VERSION_AVAILABLE"}"#).is_err());
    }
}
