//! Versioned request → response stores.
//!
//! ```text
//! CacheStorage (one per origin)
//!     ├── app-shell-v2   (retired on next activation)
//!     └── app-shell-v3
//!             └── CacheKey (GET + URL) → CacheEntry (snapshot)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hashbrown::HashMap;
use http::{HeaderName, HeaderValue, Method, StatusCode};
use offkit_net::{Request, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

/// Errors raised by a [`CacheStorage`] backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("No such store: {0}")]
    NoSuchStore(StoreId),

    #[error("Quota exceeded in {store}: limit of {limit} entries")]
    QuotaExceeded { store: StoreId, limit: usize },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Name of one cache generation, e.g. `app-shell-v3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(String);

impl StoreId {
    /// Build the identifier for a deployment version.
    pub fn versioned(prefix: &str, version: &str) -> Self {
        Self(format!("{prefix}-{version}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StoreId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical lookup key: method plus absolute URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    url: Url,
}

impl CacheKey {
    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: Method::GET,
            url,
        }
    }

    /// Key for a request, or `None` if the request is not storable.
    pub fn for_request(request: &Request) -> Option<Self> {
        (request.method == Method::GET).then(|| Self::get(&request.url))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A captured response. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Final URL of the response.
    pub url: Url,

    /// Response status.
    pub status: u16,

    /// Response headers, in arrival order.
    pub headers: Vec<(String, String)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response.
    pub fn capture(response: &Response) -> Self {
        Self {
            url: response.url.clone(),
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect(),
            body: response.body().to_vec(),
            cached_at: offkit_common::now_millis(),
        }
    }

    /// Rebuild a response from the snapshot.
    pub fn to_response(&self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        self.headers
            .iter()
            .filter_map(|(name, value)| {
                Some((
                    HeaderName::from_bytes(name.as_bytes()).ok()?,
                    HeaderValue::from_str(value).ok()?,
                ))
            })
            .fold(
                Response::new(self.url.clone(), status, self.body.clone()),
                |response, (name, value)| response.with_header(name, value),
            )
    }
}

/// Origin-wide cache storage.
///
/// Writes are atomic per key and readers never observe a partial entry.
/// Only the lifecycle manager calls `open` and `delete_store`.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the store if it does not exist yet.
    async fn open(&self, id: &StoreId) -> Result<(), StoreError>;

    /// Look up an entry. A missing store reads as a miss.
    async fn get(&self, id: &StoreId, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or overwrite an entry in an existing store.
    async fn put(&self, id: &StoreId, key: CacheKey, entry: CacheEntry) -> Result<(), StoreError>;

    /// Drop a whole store. Returns whether it existed.
    async fn delete_store(&self, id: &StoreId) -> Result<bool, StoreError>;

    /// All store identifiers of this origin.
    async fn list_store_ids(&self) -> Result<Vec<StoreId>, StoreError>;

    /// Keys of one store.
    async fn keys(&self, id: &StoreId) -> Result<Vec<CacheKey>, StoreError>;
}

/// In-process [`CacheStorage`].
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    stores: RwLock<HashMap<StoreId, HashMap<CacheKey, CacheEntry>>>,
    max_entries: Option<usize>,
    writes: AtomicU64,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap each store at `limit` entries. Writes of new keys beyond the cap
    /// fail with [`StoreError::QuotaExceeded`]; overwrites always succeed.
    pub fn with_max_entries(mut self, limit: usize) -> Self {
        self.max_entries = Some(limit);
        self
    }

    /// Number of successful `put` calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, id: &StoreId) -> Result<(), StoreError> {
        self.stores.write().await.entry(id.clone()).or_default();
        Ok(())
    }

    async fn get(&self, id: &StoreId, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let stores = self.stores.read().await;
        Ok(stores.get(id).and_then(|store| store.get(key)).cloned())
    }

    async fn put(&self, id: &StoreId, key: CacheKey, entry: CacheEntry) -> Result<(), StoreError> {
        let mut stores = self.stores.write().await;
        let store = stores
            .get_mut(id)
            .ok_or_else(|| StoreError::NoSuchStore(id.clone()))?;

        if let Some(limit) = self.max_entries {
            if store.len() >= limit && !store.contains_key(&key) {
                return Err(StoreError::QuotaExceeded {
                    store: id.clone(),
                    limit,
                });
            }
        }

        store.insert(key, entry);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete_store(&self, id: &StoreId) -> Result<bool, StoreError> {
        Ok(self.stores.write().await.remove(id).is_some())
    }

    async fn list_store_ids(&self) -> Result<Vec<StoreId>, StoreError> {
        let mut ids: Vec<StoreId> = self.stores.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn keys(&self, id: &StoreId) -> Result<Vec<CacheKey>, StoreError> {
        let stores = self.stores.read().await;
        let store = stores
            .get(id)
            .ok_or_else(|| StoreError::NoSuchStore(id.clone()))?;
        Ok(store.keys().cloned().collect())
    }
}
