//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::StatusCode;
use offkit_common::{init_logging, LogConfig};
use offkit_net::{Fetcher, NetError, Request, Response};
use offkit_sw::{
    CacheEntry, CacheKey, CacheStorage, CacheWorker, MemoryCacheStorage, StoreError, StoreId,
    WorkerConfig,
};
use tokio::sync::watch;
use url::Url;

pub const ORIGIN: &str = "https://app.test/";

pub fn init() {
    let _ = init_logging(LogConfig::test());
}

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Scriptable network keyed by path.
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, (StatusCode, String)>>,
    calls: Mutex<Vec<String>>,
    online: AtomicBool,
    gate: watch::Sender<bool>,
}

impl FakeNetwork {
    /// Online, with the default shell routes.
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        let network = Self {
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            online: AtomicBool::new(true),
            gate,
        };
        network.route("/", "<html>root</html>");
        network.route("/index.html", "<html>shell</html>");
        network.route("/manifest.json", r#"{"name":"dashboard"}"#);
        Arc::new(network)
    }

    pub fn route(&self, path: &str, body: &str) {
        self.route_status(path, StatusCode::OK, body);
    }

    pub fn route_status(&self, path: &str, status: StatusCode, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_string()));
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Park every fetch until [`FakeNetwork::release`].
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|p| *p == path).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let path = request.url.path().to_string();
        self.calls.lock().unwrap().push(path.clone());

        let mut gate = self.gate.subscribe();
        let released = gate.wait_for(|open| *open).await.is_ok();
        if !released || !self.online.load(Ordering::SeqCst) {
            return Err(NetError::Offline(format!("{} unreachable", request.url)));
        }

        let route = self.routes.lock().unwrap().get(&path).cloned();
        Ok(match route {
            Some((status, body)) => Response::new(request.url.clone(), status, body),
            None => Response::new(request.url.clone(), StatusCode::NOT_FOUND, "not found"),
        })
    }
}

/// Storage wrapper that counts reads and writes.
#[derive(Default)]
pub struct RecordingStorage {
    inner: MemoryCacheStorage,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RecordingStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_max_entries(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCacheStorage::new().with_max_entries(limit),
            ..Self::default()
        })
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Body stored under `path` in `store`, as text.
    pub async fn body(&self, store: &StoreId, path: &str) -> Option<String> {
        self.inner
            .get(store, &CacheKey::get(&url(path)))
            .await
            .unwrap()
            .map(|entry| String::from_utf8(entry.body).unwrap())
    }
}

#[async_trait]
impl CacheStorage for RecordingStorage {
    async fn open(&self, id: &StoreId) -> Result<(), StoreError> {
        self.inner.open(id).await
    }

    async fn get(&self, id: &StoreId, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(id, key).await
    }

    async fn put(&self, id: &StoreId, key: CacheKey, entry: CacheEntry) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.put(id, key, entry).await
    }

    async fn delete_store(&self, id: &StoreId) -> Result<bool, StoreError> {
        self.inner.delete_store(id).await
    }

    async fn list_store_ids(&self) -> Result<Vec<StoreId>, StoreError> {
        self.inner.list_store_ids().await
    }

    async fn keys(&self, id: &StoreId) -> Result<Vec<CacheKey>, StoreError> {
        self.inner.keys(id).await
    }
}

pub fn worker(
    version: &str,
    storage: &Arc<RecordingStorage>,
    network: &Arc<FakeNetwork>,
) -> CacheWorker {
    let config = WorkerConfig::new(Url::parse(ORIGIN).unwrap(), version);
    CacheWorker::new(config, storage.clone(), network.clone()).unwrap()
}
