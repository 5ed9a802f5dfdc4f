//! Test doubles for the network and cache seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use http::{HeaderValue, StatusCode};
use swkit_cache::{CacheEntry, CacheError, CacheStore, MemoryCacheStorage, RequestKey};
use swkit_net::{Fetcher, NetError, Request, Response, ResponseType};

use crate::config::WorkerConfig;
use crate::identity::BuildIdentity;

/// Config for `https://app.example.com/` with prefix `app` and build
/// date `20240301`.
pub fn worker_config(version: &str) -> WorkerConfig {
    WorkerConfig {
        origin: "https://app.example.com/".to_string(),
        cache_prefix: "app".to_string(),
        build: BuildIdentity {
            build_date: "20240301".to_string(),
            manual_version: version.to_string(),
        },
        ..Default::default()
    }
}

/// Network serving the default shell and a descriptor for `remote_version`.
pub fn shell_fetcher(remote_version: &str) -> Arc<MockFetcher> {
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.respond("/", 200, "text/html", "<html>root</html>");
    fetcher.respond("/index.html", 200, "text/html", "<html>index</html>");
    fetcher.respond("/favicon.ico", 200, "image/x-icon", "ico");
    fetcher.respond("/manifest.json", 200, "application/manifest+json", "{}");
    fetcher.publish_version(remote_version);
    fetcher
}

#[derive(Clone)]
enum Route {
    Respond {
        status: u16,
        content_type: String,
        body: String,
        response_type: ResponseType,
    },
    Fail,
}

/// In-process network keyed by URL path.
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<Request>>,
    offline: AtomicBool,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, path: &str, status: u16, content_type: &str, body: &str) {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route::Respond {
                status,
                content_type: content_type.to_string(),
                body: body.to_string(),
                response_type: ResponseType::Basic,
            },
        );
    }

    pub fn respond_with_type(&self, path: &str, status: u16, response_type: ResponseType) {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route::Respond {
                status,
                content_type: "application/octet-stream".to_string(),
                body: String::new(),
                response_type,
            },
        );
    }

    pub fn fail(&self, path: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Route::Fail);
    }

    /// Serve a version descriptor naming `version`.
    pub fn publish_version(&self, version: &str) {
        self.respond(
            "/version.json",
            200,
            "application/json",
            &format!(
                r#"{{"version":"{version}","buildDate":"20240301","buildTime":"2024-03-01T12:00:00Z","appVersion":"1.0.0"}}"#
            ),
        );
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == path)
            .count()
    }

    fn answer(&self, request: &Request) -> Result<Response, NetError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Unreachable(request.url.to_string()));
        }
        let route = self.routes.lock().unwrap().get(request.url.path()).cloned();
        match route {
            Some(Route::Respond {
                status,
                content_type,
                body,
                response_type,
            }) => Ok(Response::new(
                request.url.clone(),
                StatusCode::from_u16(status).unwrap(),
                body,
            )
            .with_header(
                http::header::CONTENT_TYPE,
                HeaderValue::from_str(&content_type).unwrap(),
            )
            .with_type(response_type)),
            Some(Route::Fail) => Err(NetError::RequestFailed(request.url.to_string())),
            None => Ok(Response::new(request.url.clone(), StatusCode::NOT_FOUND, "")),
        }
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let result = self.answer(&request);
        self.calls.lock().unwrap().push(request);
        result
    }
}

/// Memory store whose writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryCacheStorage,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

impl CacheStore for FlakyStore {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        self.inner.has(name).await
    }

    async fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError> {
        self.inner.get(name, key).await
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(CacheError::Io(std::io::Error::other("disk full")));
        }
        self.inner.put(name, entry).await
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(CacheError::Io(std::io::Error::other("read-only")));
        }
        self.inner.delete(name).await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.inner.keys().await
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<RequestKey>, CacheError> {
        self.inner.entry_keys(name).await
    }
}
