//! Named caches of request/response pairs.
//!
//! ```text
//! CacheBackend
//!     ├── covasol-static-v1
//!     │       └── URL → CacheEntry
//!     └── covasol-dynamic-v1
//!             └── URL → CacheEntry
//! ```
//!
//! Entries are keyed by absolute request URL (method GET). Writes to the same
//! key replace the previous entry.

use chrono::Utc;
use covasol_net::{Response, Url};
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

use crate::ServiceWorkerError;

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a network response for the given request URL.
    pub fn from_response(url: &Url, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: url.to_string(),
            method: "GET".to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: Utc::now().timestamp_millis().max(0) as u64,
        }
    }

    /// Rebuild a response from the snapshot.
    pub fn to_response(&self) -> Result<Response, ServiceWorkerError> {
        let url = Url::parse(&self.url)
            .map_err(|e| ServiceWorkerError::CacheError(format!("{}: {}", self.url, e)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| ServiceWorkerError::CacheError(format!("{}: {}", self.url, e)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(n, v);
            }
        }

        Ok(Response {
            url,
            status,
            headers,
            body: self.body.clone().into(),
        })
    }
}

/// Storage for named caches.
///
/// Implementations guarantee atomic per-key `put` and an all-or-nothing
/// `put_all`; callers serialize access through one lock.
pub trait CacheBackend: Send {
    /// Create the cache if it does not exist.
    fn open(&mut self, name: &str) -> Result<(), ServiceWorkerError>;

    /// Check if a cache exists.
    fn has(&self, name: &str) -> Result<bool, ServiceWorkerError>;

    /// Delete a cache and all of its entries. Returns whether it existed.
    fn delete_cache(&mut self, name: &str) -> Result<bool, ServiceWorkerError>;

    /// All cache names, oldest first.
    fn cache_names(&self) -> Result<Vec<String>, ServiceWorkerError>;

    /// Store one entry, opening the cache if needed.
    fn put(&mut self, cache: &str, entry: CacheEntry) -> Result<(), ServiceWorkerError>;

    /// Store a batch of entries: either all are stored or none are.
    fn put_all(&mut self, cache: &str, entries: Vec<CacheEntry>) -> Result<(), ServiceWorkerError>;

    /// Exact-URL lookup in one cache.
    fn match_in(&self, cache: &str, url: &str) -> Result<Option<CacheEntry>, ServiceWorkerError>;

    /// Exact-URL lookup across every cache, oldest cache first.
    fn match_any(&self, url: &str) -> Result<Option<CacheEntry>, ServiceWorkerError>;

    /// URLs stored in a cache.
    fn keys(&self, cache: &str) -> Result<Vec<String>, ServiceWorkerError>;
}

/// A cache instance.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Add entry.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.url.clone(), entry);
    }

    /// Get all keys (URLs).
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }
}

/// In-memory cache storage.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    /// Creation order, for `match_any`.
    order: Vec<String>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn open_mut(&mut self, name: &str) -> &mut Cache {
        if !self.caches.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Borrow a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }
}

impl CacheBackend for CacheStorage {
    fn open(&mut self, name: &str) -> Result<(), ServiceWorkerError> {
        self.open_mut(name);
        Ok(())
    }

    fn has(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        Ok(self.caches.contains_key(name))
    }

    fn delete_cache(&mut self, name: &str) -> Result<bool, ServiceWorkerError> {
        self.order.retain(|n| n != name);
        Ok(self.caches.remove(name).is_some())
    }

    fn cache_names(&self) -> Result<Vec<String>, ServiceWorkerError> {
        Ok(self.order.clone())
    }

    fn put(&mut self, cache: &str, entry: CacheEntry) -> Result<(), ServiceWorkerError> {
        self.open_mut(cache).put(entry);
        Ok(())
    }

    fn put_all(&mut self, cache: &str, entries: Vec<CacheEntry>) -> Result<(), ServiceWorkerError> {
        // Nothing here can fail halfway.
        let cache = self.open_mut(cache);
        for entry in entries {
            cache.put(entry);
        }
        Ok(())
    }

    fn match_in(&self, cache: &str, url: &str) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        Ok(self
            .caches
            .get(cache)
            .and_then(|c| c.match_request(url))
            .cloned())
    }

    fn match_any(&self, url: &str) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        Ok(self
            .order
            .iter()
            .filter_map(|name| self.caches.get(name))
            .find_map(|cache| cache.match_request(url))
            .cloned())
    }

    fn keys(&self, cache: &str) -> Result<Vec<String>, ServiceWorkerError> {
        Ok(self
            .caches
            .get(cache)
            .map(|c| c.keys().into_iter().map(str::to_string).collect())
            .unwrap_or_default())
    }
}
