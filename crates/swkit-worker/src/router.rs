//! Request routing: picks a fetch strategy for every intercepted request.
//!
//! | class  | match                                  | strategy      | stored |
//! |--------|----------------------------------------|---------------|--------|
//! | Api    | URL contains the API marker            | network-first | never  |
//! | Static | last path segment has an allowed ext.  | cache-first   | 200 basic |
//! | Other  | anything else (navigations, ...)       | cache-first   | 200 basic |

use std::sync::Arc;

use hashbrown::HashSet;
use http::{Method, StatusCode};
use swkit_cache::{CacheEntry, CacheStore, RequestKey};
use swkit_net::{Fetcher, Request, Response, ResponseType};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::WorkerConfig;
use crate::ServiceWorkerError;

/// Classification of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Dynamic API call.
    Api,
    /// Script, stylesheet, image or font.
    Static,
    /// Navigations and everything unclassified.
    Other,
}

/// URL classification rules.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    api_marker: String,
    extensions: HashSet<String>,
}

impl RoutePolicy {
    pub fn new(api_marker: impl Into<String>, extensions: &[String]) -> Self {
        Self {
            api_marker: api_marker.into(),
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.api_marker.clone(), &config.cacheable_extensions)
    }

    /// Classify a URL. The API marker wins over the extension.
    pub fn classify(&self, url: &Url) -> RequestClass {
        if url.as_str().contains(&self.api_marker) {
            return RequestClass::Api;
        }
        match extension(url) {
            Some(ext) if self.extensions.contains(&ext) => RequestClass::Static,
            _ => RequestClass::Other,
        }
    }
}

/// Lower-cased extension of the last path segment.
fn extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Whether a network response may be written to the cache.
pub fn is_cacheable(response: &Response) -> bool {
    response.status == StatusCode::OK && response.response_type == ResponseType::Basic
}

/// Serves intercepted requests from the current generation and the network.
pub struct RequestRouter<S, F> {
    caches: Arc<S>,
    fetcher: Arc<F>,
    generation: String,
    policy: RoutePolicy,
    writes: Mutex<JoinSet<()>>,
}

impl<S: CacheStore, F: Fetcher> RequestRouter<S, F> {
    pub fn new(caches: Arc<S>, fetcher: Arc<F>, generation: String, policy: RoutePolicy) -> Self {
        Self {
            caches,
            fetcher,
            generation,
            policy,
            writes: Mutex::new(JoinSet::new()),
        }
    }

    /// Route one request.
    pub async fn route(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        let class = self.policy.classify(&request.url);
        debug!(url = %request.url, method = %request.method, ?class, "Routing request");

        match class {
            RequestClass::Api => self.network_first(request).await,
            RequestClass::Static | RequestClass::Other if request.method == Method::GET => {
                self.cache_first(request).await
            }
            RequestClass::Static | RequestClass::Other => {
                Ok(self.fetcher.fetch(request).await?)
            }
        }
    }

    async fn network_first(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        let key = RequestKey::for_request(&request);
        let error = match self.fetcher.fetch(request).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        // TODO: attach a staleness marker or max-age once product decides
        // how old an API fallback may be.
        match self.lookup(&key).await {
            Some(cached) => {
                debug!(key = %key, error = %error, "Network failed, serving cached API response");
                Ok(cached)
            }
            None => Err(error.into()),
        }
    }

    async fn cache_first(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        let key = RequestKey::for_request(&request);
        if let Some(cached) = self.lookup(&key).await {
            trace!(key = %key, "Cache hit");
            return Ok(cached);
        }

        let response = self.fetcher.fetch(request).await?;
        if !is_cacheable(&response) {
            trace!(key = %key, status = %response.status, "Response not cacheable");
            return Ok(response);
        }

        self.store_in_background(CacheEntry::from_response(key, &response))
            .await;
        Ok(response)
    }

    /// Current-generation lookup. Storage errors count as a miss.
    async fn lookup(&self, key: &RequestKey) -> Option<Response> {
        let entry = match self.caches.get(&self.generation, key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed");
                return None;
            }
        };
        match entry.to_response() {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding unreadable cache entry");
                None
            }
        }
    }

    async fn store_in_background(&self, entry: CacheEntry) {
        let caches = Arc::clone(&self.caches);
        let generation = self.generation.clone();

        let mut writes = self.writes.lock().await;
        while writes.try_join_next().is_some() {}
        writes.spawn(async move {
            let key = entry.key.clone();
            match caches.put(&generation, entry).await {
                Ok(()) => trace!(cache = %generation, key = %key, "Stored response"),
                Err(e) => warn!(cache = %generation, key = %key, error = %e, "Cache write failed"),
            }
        });
    }

    /// Wait for every pending background write.
    pub async fn settle(&self) {
        let mut pending = std::mem::take(&mut *self.writes.lock().await);
        while pending.join_next().await.is_some() {}
    }
}
