//! Worker configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::identity::BuildIdentity;
use crate::ServiceWorkerError;

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin the application is served from
    pub origin: String,

    /// Root-relative path the worker script is registered at
    pub script_path: String,

    /// Prefix shared by every cache generation of this application
    pub cache_prefix: String,

    /// Identity of this build
    pub build: BuildIdentity,

    /// Navigation shell stored at install time
    pub precache: Vec<String>,

    /// URL substring that marks API requests
    pub api_marker: String,

    /// File extensions served cache-first
    pub cacheable_extensions: Vec<String>,

    /// Version descriptor endpoint
    pub version_endpoint: String,

    /// Seconds between version checks
    pub poll_interval_secs: u64,

    /// Activate right after install instead of waiting for `SKIP_WAITING`
    pub skip_waiting_on_install: bool,

    /// Notification settings
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Title used when a push payload has none
    pub app_name: String,

    /// Body used when a push payload has none
    pub default_body: String,

    /// Notification icon path
    pub icon: String,

    /// Notification badge path
    pub badge: String,

    /// Page opened when a notification is clicked
    pub open_path: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost/".to_string(),
            script_path: "/service-worker.js".to_string(),
            cache_prefix: "funmedia-assistant".to_string(),
            build: BuildIdentity::compiled(),
            precache: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/favicon.ico".to_string(),
                "/manifest.json".to_string(),
            ],
            api_marker: "/api/".to_string(),
            cacheable_extensions: [
                "js", "css", "png", "jpg", "jpeg", "gif", "svg", "ico", "woff", "woff2", "ttf",
                "eot",
            ]
            .iter()
            .map(|e| e.to_string())
            .collect(),
            version_endpoint: "/version.json".to_string(),
            poll_interval_secs: 60 * 60, // hourly
            skip_waiting_on_install: true,
            notifications: NotificationConfig::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            app_name: "FunMedia Assistant".to_string(),
            default_body: "You have a new message".to_string(),
            icon: "/img/icons/android-chrome-192x192.png".to_string(),
            badge: "/img/icons/badge-72x72.png".to_string(),
            open_path: "/".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ServiceWorkerError> {
        serde_json::from_str(json).map_err(|e| ServiceWorkerError::Config(e.to_string()))
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServiceWorkerError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ServiceWorkerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Parsed origin.
    pub fn origin_url(&self) -> Result<Url, ServiceWorkerError> {
        Url::parse(&self.origin).map_err(|e| ServiceWorkerError::Config(format!("origin: {e}")))
    }

    /// Name of this build's cache generation.
    pub fn generation_name(&self) -> String {
        self.build.generation_name(&self.cache_prefix)
    }

    /// Prefix every generation name of this application starts with.
    pub fn generation_prefix(&self) -> String {
        format!("{}-", self.cache_prefix)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Check the invariants the worker relies on.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        self.origin_url()?;
        if self.cache_prefix.is_empty() {
            return Err(ServiceWorkerError::Config("cache_prefix is empty".to_string()));
        }
        if self.api_marker.is_empty() {
            return Err(ServiceWorkerError::Config("api_marker is empty".to_string()));
        }
        if !self.script_path.starts_with('/') {
            return Err(ServiceWorkerError::Config(format!(
                "script_path must be root-relative: {}",
                self.script_path
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.precache.len(), 4);
        assert_eq!(config.cacheable_extensions.len(), 12);
        assert_eq!(config.poll_interval(), Duration::from_secs(3600));
        assert!(config.skip_waiting_on_install);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = WorkerConfig::from_json(
            r#"{
                "origin": "https://app.example.com/",
                "cache_prefix": "demo",
                "build": { "build_date": "20240301", "manual_version": "1.0.0-1" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.generation_name(), "demo-20240301-1.0.0-1");
        assert_eq!(config.generation_prefix(), "demo-");
        assert_eq!(config.api_marker, "/api/");
        assert_eq!(config.version_endpoint, "/version.json");
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            WorkerConfig::from_json("{"),
            Err(ServiceWorkerError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_relative_script() {
        let config = WorkerConfig {
            script_path: "service-worker.js".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.json");
        std::fs::write(&path, r#"{"poll_interval_secs": 5}"#).unwrap();

        let config = WorkerConfig::load(&path).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
    }
}
