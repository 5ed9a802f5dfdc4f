//! `reqwest`-backed [`Fetcher`].

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, trace};
use url::Url;

use crate::{Fetcher, NetError, Request, Response, ResponseType};

/// Network loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Origin the worker is serving; responses from it are `basic`.
    pub origin: Url,
    /// User agent string.
    pub user_agent: String,
    /// Transport timeout.
    pub timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl LoaderConfig {
    /// Create a configuration for the given origin.
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            user_agent: format!("swkit/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Fetches requests over HTTP.
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = %config.origin, "HttpFetcher initialized");

        Ok(Self { client, config })
    }

    /// The configured origin.
    pub fn origin(&self) -> &Url {
        &self.config.origin
    }

    fn response_type(&self, url: &Url) -> ResponseType {
        if url.origin() == self.config.origin.origin() {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        }
    }

    fn classify(&self, error: reqwest::Error) -> NetError {
        if error.is_timeout() {
            NetError::Timeout(self.config.timeout)
        } else if error.is_connect() {
            NetError::Unreachable(error.to_string())
        } else {
            NetError::HttpError(error)
        }
    }

    async fn send(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching from network");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let response_type = self.response_type(&url);

        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        trace!(
            url = %url,
            status = %status,
            response_type = ?response_type,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url,
            status,
            headers,
            body,
            response_type,
        })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        self.send(request).await
    }
}
