//! Version skew detection against the published version descriptor.

use std::sync::Arc;

use http::header::{CACHE_CONTROL, PRAGMA};
use http::{HeaderValue, StatusCode};
use swkit_net::{Fetcher, NetError, Request};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::identity::VersionDescriptor;

/// Reasons a version check produced no verdict.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Version request failed: {0}")]
    Network(#[from] NetError),

    #[error("Version endpoint returned {0}")]
    Status(StatusCode),

    #[error("Malformed version descriptor: {0}")]
    Malformed(String),
}

/// Outcome of a version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionStatus {
    /// The server describes this build.
    Current,
    /// The server describes a different build.
    Outdated(VersionDescriptor),
}

/// Compares the remote descriptor with the running build.
pub struct VersionOracle<F> {
    fetcher: Arc<F>,
    endpoint: Url,
    current_version: String,
}

impl<F: Fetcher> VersionOracle<F> {
    pub fn new(fetcher: Arc<F>, endpoint: Url, current_version: impl Into<String>) -> Self {
        Self {
            fetcher,
            endpoint,
            current_version: current_version.into(),
        }
    }

    /// Fetch the descriptor, bypassing every cache, and compare versions.
    ///
    /// Any difference counts as outdated, including a rollback to an older
    /// version string.
    pub async fn check(&self) -> Result<VersionStatus, OracleError> {
        let request = Request::get(self.endpoint.clone())
            .header(
                CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store, must-revalidate"),
            )
            .header(PRAGMA, HeaderValue::from_static("no-cache"));

        let response = self.fetcher.fetch(request).await?;
        if !response.ok() {
            return Err(OracleError::Status(response.status));
        }

        let remote: VersionDescriptor = response
            .json()
            .map_err(|e| OracleError::Malformed(e.to_string()))?;

        if remote.version == self.current_version {
            debug!(version = %remote.version, "Running the published version");
            Ok(VersionStatus::Current)
        } else {
            info!(
                current = %self.current_version,
                remote = %remote.version,
                "New version available"
            );
            Ok(VersionStatus::Outdated(remote))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFetcher;

    const DESCRIPTOR: &str = r#"{
        "version": "1.1.0-1709294400000",
        "buildDate": "20240301",
        "buildTime": "2024-03-01T12:00:00Z",
        "appVersion": "1.1.0"
    }"#;

    fn oracle(fetcher: Arc<MockFetcher>, current: &str) -> VersionOracle<MockFetcher> {
        let endpoint = Url::parse("https://app.example.com/version.json").unwrap();
        VersionOracle::new(fetcher, endpoint, current)
    }

    #[tokio::test]
    async fn test_same_version_is_current() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond("/version.json", 200, "application/json", DESCRIPTOR);

        let status = oracle(fetcher, "1.1.0-1709294400000").check().await.unwrap();
        assert_eq!(status, VersionStatus::Current);
    }

    #[tokio::test]
    async fn test_any_difference_is_outdated() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond("/version.json", 200, "application/json", DESCRIPTOR);

        // Newer local string: the server rolled back.
        let status = oracle(fetcher, "1.2.0-1710000000000").check().await.unwrap();
        match status {
            VersionStatus::Outdated(remote) => assert_eq!(remote.app_version, "1.1.0"),
            other => panic!("Expected outdated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_bypasses_caches() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond("/version.json", 200, "application/json", DESCRIPTOR);

        oracle(Arc::clone(&fetcher), "x").check().await.unwrap();

        let calls = fetcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].headers.get(CACHE_CONTROL).unwrap(),
            "no-cache, no-store, must-revalidate"
        );
        assert_eq!(calls[0].headers.get(PRAGMA).unwrap(), "no-cache");
    }

    #[tokio::test]
    async fn test_failures() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond("/version.json", 503, "text/plain", "down");
        assert!(matches!(
            oracle(Arc::clone(&fetcher), "x").check().await,
            Err(OracleError::Status(StatusCode::SERVICE_UNAVAILABLE))
        ));

        fetcher.respond("/version.json", 200, "application/json", r#"{"version":"2"}"#);
        assert!(matches!(
            oracle(Arc::clone(&fetcher), "x").check().await,
            Err(OracleError::Malformed(_))
        ));

        fetcher.set_offline(true);
        assert!(matches!(
            oracle(fetcher, "x").check().await,
            Err(OracleError::Network(_))
        ));
    }
}
