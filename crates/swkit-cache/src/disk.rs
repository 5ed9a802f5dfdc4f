//! On-disk cache storage.
//!
//! One directory per cache, one JSON file per entry. Entry files are named by
//! the SHA-256 of the request key and written through a temporary file plus
//! rename, so an interrupted put leaves either the previous entry or none.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, trace, warn};

use crate::{CacheEntry, CacheError, CacheStore, RequestKey};

const ENTRY_EXT: &str = "json";

/// Cache storage persisted under a root directory.
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    /// Create storage rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn cache_dir(&self, name: &str) -> Result<PathBuf, CacheError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(CacheError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    fn entry_file(key: &RequestKey) -> String {
        let digest = Sha256::digest(key.to_string().as_bytes());
        format!("{}.{ENTRY_EXT}", hex::encode(digest))
    }

    async fn read_entry(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl CacheStore for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        fs::create_dir_all(self.cache_dir(name)?).await?;
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(fs::try_exists(self.cache_dir(name)?).await?)
    }

    async fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.cache_dir(name)?.join(Self::entry_file(key));
        let entry = Self::read_entry(&path).await?;
        // A digest collision must not serve another request's response.
        Ok(entry.filter(|e| &e.key == key))
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        if !entry.key.is_storable() {
            return Err(CacheError::Unsupported(entry.key.to_string()));
        }

        let dir = self.cache_dir(name)?;
        fs::create_dir_all(&dir).await?;

        let file = Self::entry_file(&entry.key);
        let target = dir.join(&file);
        let temp = dir.join(format!(".{file}.{}.tmp", next_temp_id()));

        let bytes = serde_json::to_vec(&entry)?;
        fs::write(&temp, &bytes).await?;
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        trace!(cache = name, key = %entry.key, bytes = bytes.len(), "Cache put");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        match fs::remove_dir_all(self.cache_dir(name)?).await {
            Ok(()) => {
                debug!(cache = name, "Cache directory removed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = item.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<RequestKey>, CacheError> {
        let mut dir = match fs::read_dir(self.cache_dir(name)?).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            match Self::read_entry(&path).await {
                Ok(Some(entry)) => keys.push(entry.key),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable entry"),
            }
        }
        Ok(keys)
    }
}

fn next_temp_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
