//! # swkit Cache
//!
//! Named cache storage for the swkit offline worker.
//!
//! ## Architecture
//!
//! ```text
//! CacheStore (trait)
//!     ├── MemoryCacheStorage
//!     └── DiskCacheStorage
//!             └── <generation name>/
//!                     └── <sha256(key)>.json → CacheEntry
//! ```
//!
//! Each generation is an isolated namespace of `RequestKey → CacheEntry`.
//! A `put` replaces the whole entry for its key and is atomic: readers see
//! either the old entry or the new one, never a mix.

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use swkit_net::{Request, Response, ResponseType};
use thiserror::Error;
use url::Url;

pub mod disk;
pub mod memory;

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

// ==================== Errors ====================

/// Errors that can occur in cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid cache name: {0}")]
    InvalidName(String),

    #[error("Invalid cache entry: {0}")]
    InvalidEntry(String),

    #[error("Unsupported request: {0}")]
    Unsupported(String),
}

// ==================== Keys and Entries ====================

/// Normalized request identity: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    /// Build the key for a URL and method.
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_string(),
            url: url.to_string(),
        }
    }

    /// Build the key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    /// Build the key for an intercepted request.
    pub fn for_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }

    /// Whether the key may be stored.
    pub fn is_storable(&self) -> bool {
        self.method == Method::GET.as_str()
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request identity.
    pub key: RequestKey,

    /// Response status.
    pub status: u16,

    /// Response headers, in order, duplicates preserved.
    pub headers: Vec<StoredHeader>,

    /// Response body.
    #[serde(with = "bytes_base64")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a response for storage under `key`.
    pub fn from_response(key: RequestKey, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| StoredHeader::new(name.as_str(), value.as_bytes()))
            .collect();

        Self {
            key,
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: swkit_common::now_millis(),
        }
    }

    /// Rebuild the stored response.
    pub fn to_response(&self) -> Result<Response, CacheError> {
        let url = Url::parse(&self.key.url)
            .map_err(|e| CacheError::InvalidEntry(format!("{}: {e}", self.key)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| CacheError::InvalidEntry(format!("{}: {e}", self.key)))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for header in &self.headers {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|e| CacheError::InvalidEntry(format!("header {}: {e}", header.name)))?;
            let value = HeaderValue::from_bytes(&header.value)
                .map_err(|e| CacheError::InvalidEntry(format!("header {name}: {e}")))?;
            headers.append(name, value);
        }

        Ok(Response {
            url,
            status,
            headers,
            body: Bytes::from(self.body.clone()),
            response_type: ResponseType::Basic,
        })
    }
}

/// One stored header. Values are kept as raw bytes since HTTP allows
/// non-UTF-8 octets (obs-text) in header values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHeader {
    pub name: String,
    #[serde(with = "bytes_base64")]
    pub value: Vec<u8>,
}

impl StoredHeader {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

mod bytes_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ==================== Store ====================

/// Named-cache primitive the worker runs on.
///
/// All operations are asynchronous. No ordering is guaranteed between
/// concurrent puts to different keys.
pub trait CacheStore: Send + Sync + 'static {
    /// Open a cache, creating it if absent.
    fn open(&self, name: &str) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Check if a cache exists.
    fn has(&self, name: &str) -> impl Future<Output = Result<bool, CacheError>> + Send;

    /// Look up an entry.
    fn get(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> impl Future<Output = Result<Option<CacheEntry>, CacheError>> + Send;

    /// Store an entry, replacing any entry with the same key. Opens the
    /// cache if needed.
    fn put(&self, name: &str, entry: CacheEntry) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Delete a cache. Returns whether it existed.
    fn delete(&self, name: &str) -> impl Future<Output = Result<bool, CacheError>> + Send;

    /// Names of all caches.
    fn keys(&self) -> impl Future<Output = Result<Vec<String>, CacheError>> + Send;

    /// Keys of all entries in a cache.
    fn entry_keys(&self, name: &str) -> impl Future<Output = Result<Vec<RequestKey>, CacheError>> + Send;
}
