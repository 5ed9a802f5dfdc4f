//! Push message payloads.

use serde::Deserialize;

use crate::config::NotificationConfig;
use crate::message::NotificationRequest;
use crate::ServiceWorkerError;

/// JSON body of a push message. Both fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
}

impl PushPayload {
    pub fn parse(data: &[u8]) -> Result<Self, ServiceWorkerError> {
        serde_json::from_slice(data)
            .map_err(|e| ServiceWorkerError::Message(format!("push payload: {e}")))
    }

    /// Fill missing fields from the notification settings.
    pub fn into_notification(self, config: &NotificationConfig) -> NotificationRequest {
        NotificationRequest {
            title: self.title.unwrap_or_else(|| config.app_name.clone()),
            body: self.body.unwrap_or_else(|| config.default_body.clone()),
            icon: config.icon.clone(),
            badge: config.badge.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = NotificationConfig::default();
        let notification = PushPayload::parse(b"{}").unwrap().into_notification(&config);

        assert_eq!(notification.title, "FunMedia Assistant");
        assert_eq!(notification.body, "You have a new message");
        assert_eq!(notification.icon, config.icon);
        assert_eq!(notification.badge, config.badge);
    }

    #[test]
    fn test_payload_fields_win() {
        let payload = PushPayload::parse(br#"{"title":"Download","body":"Done","extra":1}"#).unwrap();
        let notification = payload.into_notification(&NotificationConfig::default());

        assert_eq!(notification.title, "Download");
        assert_eq!(notification.body, "Done");
    }

    #[test]
    fn test_non_json_payload_is_rejected() {
        assert!(matches!(
            PushPayload::parse(b"plain text"),
            Err(ServiceWorkerError::Message(_))
        ));
    }
}
