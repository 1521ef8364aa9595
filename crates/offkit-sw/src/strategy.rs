//! The three caching strategies.
//!
//! | Route | Strategy | Network failure |
//! |---|---|---|
//! | immutable asset | cache first | propagates on a miss |
//! | navigation | network first | served from the shell document |
//! | other | stale while revalidate | propagates on a miss |

use std::future::Future;
use std::sync::Arc;

use offkit_net::{Fetcher, NetError, Request, Response};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::classify::RouteClass;
use crate::store::{CacheEntry, CacheKey, CacheStorage, StoreId};

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    /// Entry stored under the request's own key.
    Cache,
    /// Shell document served in place of a failed navigation.
    Fallback,
}

/// A response handed back to the page.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub response: Response,
    pub source: ResponseSource,
}

impl FetchResponse {
    fn network(response: Response) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
        }
    }

    fn cached(entry: &CacheEntry, source: ResponseSource) -> Self {
        Self {
            response: entry.to_response(),
            source,
        }
    }

    pub fn from_cache(&self) -> bool {
        self.source != ResponseSource::Network
    }
}

/// A caching strategy, selected per route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst { fallback: CacheKey },
    StaleWhileRevalidate,
}

impl Strategy {
    pub fn for_route(class: RouteClass, fallback: &CacheKey) -> Self {
        match class {
            RouteClass::ImmutableAsset => Self::CacheFirst,
            RouteClass::Navigation => Self::NetworkFirst {
                fallback: fallback.clone(),
            },
            RouteClass::Other => Self::StaleWhileRevalidate,
        }
    }
}

/// Work that outlives the response it was started for.
///
/// Plays the role of `event.waitUntil`: background revalidations run as
/// detached tasks and are counted here so a host can wait for them.
/// Waiting never cancels anything.
#[derive(Debug, Clone)]
pub struct WaitUntil {
    pending: Arc<watch::Sender<usize>>,
}

/// Decrements the pending count when a task ends, however it ends.
struct PendingGuard(Arc<watch::Sender<usize>>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!("Background task panicked");
        }
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl Default for WaitUntil {
    fn default() -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            pending: Arc::new(pending),
        }
    }
}

impl WaitUntil {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` on the current runtime.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pending.send_modify(|n| *n += 1);
        let guard = PendingGuard(Arc::clone(&self.pending));
        tokio::spawn(async move {
            let _guard = guard;
            task.await;
        });
    }

    /// Number of tasks still running.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until no task is running, including tasks spawned meanwhile.
    ///
    /// Any number of callers may wait at once, and dropping the future
    /// leaves the tasks running.
    pub async fn settle(&self) {
        let mut pending = self.pending.subscribe();
        // the sender lives in `self`, so this only returns once the count is zero
        let _ = pending.wait_for(|n| *n == 0).await;
    }
}

/// Best-effort writes into the current store.
#[derive(Clone)]
struct CacheWriter {
    storage: Arc<dyn CacheStorage>,
    store_id: StoreId,
}

impl CacheWriter {
    /// Store a copy of `response`. Failures are logged and swallowed, and
    /// non-2xx responses are never stored.
    async fn write(&self, key: CacheKey, response: &Response) {
        if !response.ok() {
            trace!(%key, status = %response.status, "Not caching unsuccessful response");
            return;
        }

        let entry = CacheEntry::capture(response);
        match self.storage.put(&self.store_id, key.clone(), entry).await {
            Ok(()) => trace!(%key, store = %self.store_id, "Cached response"),
            Err(err) => warn!(%key, store = %self.store_id, error = %err, "Cache write failed"),
        }
    }
}

/// Executes a [`Strategy`] against the current store and the network.
#[derive(Clone)]
pub struct StrategyEngine {
    writer: CacheWriter,
    fetcher: Arc<dyn Fetcher>,
    background: WaitUntil,
}

impl StrategyEngine {
    pub fn new(storage: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>, store_id: StoreId) -> Self {
        Self {
            writer: CacheWriter { storage, store_id },
            fetcher,
            background: WaitUntil::new(),
        }
    }

    /// Background work started by this engine.
    pub fn background(&self) -> &WaitUntil {
        &self.background
    }

    /// Produce the response for `request`.
    ///
    /// Requests without a cache key (non-GET) are forwarded to the network
    /// and never touch the store.
    pub async fn execute(
        &self,
        strategy: &Strategy,
        request: Request,
    ) -> Result<FetchResponse, NetError> {
        let Some(key) = CacheKey::for_request(&request) else {
            return self.fetcher.fetch(&request).await.map(FetchResponse::network);
        };

        match strategy {
            Strategy::CacheFirst => self.cache_first(key, &request).await,
            Strategy::NetworkFirst { fallback } => self.network_first(key, fallback, &request).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(key, request).await,
        }
    }

    /// A failed read is reported as a miss.
    async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.writer.storage.get(&self.writer.store_id, key).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(%key, error = %err, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn cache_first(&self, key: CacheKey, request: &Request) -> Result<FetchResponse, NetError> {
        if let Some(entry) = self.lookup(&key).await {
            debug!(%key, "Cache hit");
            return Ok(FetchResponse::cached(&entry, ResponseSource::Cache));
        }

        let response = self.fetcher.fetch(request).await?;
        self.writer.write(key, &response).await;
        Ok(FetchResponse::network(response))
    }

    async fn network_first(
        &self,
        key: CacheKey,
        fallback: &CacheKey,
        request: &Request,
    ) -> Result<FetchResponse, NetError> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.writer.write(key, &response).await;
                Ok(FetchResponse::network(response))
            }
            Err(err) => match self.lookup(fallback).await {
                Some(entry) => {
                    debug!(%key, %fallback, error = %err, "Network failed, serving shell");
                    Ok(FetchResponse::cached(&entry, ResponseSource::Fallback))
                }
                None => {
                    warn!(%key, error = %err, "Network failed and no shell is cached");
                    Err(err)
                }
            },
        }
    }

    async fn stale_while_revalidate(
        &self,
        key: CacheKey,
        request: Request,
    ) -> Result<FetchResponse, NetError> {
        let Some(entry) = self.lookup(&key).await else {
            // a miss is answered by this task's own fetch, never by background work
            let response = self.fetcher.fetch(&request).await?;
            self.writer.write(key, &response).await;
            return Ok(FetchResponse::network(response));
        };

        debug!(%key, "Serving cached entry while revalidating");
        let fetcher = Arc::clone(&self.fetcher);
        let writer = self.writer.clone();
        self.background.spawn(async move {
            match fetcher.fetch(&request).await {
                Ok(response) => writer.write(key, &response).await,
                Err(err) => debug!(%key, error = %err, "Revalidation failed, keeping cached entry"),
            }
        });

        Ok(FetchResponse::cached(&entry, ResponseSource::Cache))
    }
}
