//! One deployed generation of the offline worker.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use offkit_net::{Fetcher, NetError, Request, RequestId};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::classify::RequestClassifier;
use crate::config::WorkerConfig;
use crate::lifecycle::{ActivationReport, Clients, LifecycleManager, WorkerState};
use crate::store::{CacheKey, CacheStorage, StoreId};
use crate::strategy::{FetchResponse, Strategy, StrategyEngine};
use crate::ServiceWorkerError;

/// What the worker does with an intercepted request.
#[derive(Debug)]
pub enum FetchDisposition {
    /// Not ours; the host sends it to the network unmodified.
    Passthrough,
    /// The worker will answer; the response arrives through the future.
    RespondWith(ResponseFuture),
}

impl FetchDisposition {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough)
    }
}

/// Pending response for one request.
///
/// The work runs on its own task, so dropping this future does not stop it;
/// call [`ResponseFuture::abort`] to cancel.
#[derive(Debug)]
pub struct ResponseFuture {
    request_id: RequestId,
    handle: JoinHandle<Result<FetchResponse, NetError>>,
}

impl ResponseFuture {
    /// Id of the request this response answers.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Future for ResponseFuture {
    type Output = Result<FetchResponse, ServiceWorkerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result.map_err(ServiceWorkerError::from),
            Err(err) => Err(ServiceWorkerError::Aborted(err.to_string())),
        })
    }
}

/// A worker generation: lifecycle handlers plus fetch routing.
pub struct CacheWorker {
    config: WorkerConfig,
    classifier: RequestClassifier,
    fallback: CacheKey,
    lifecycle: LifecycleManager,
    engine: StrategyEngine,
}

impl CacheWorker {
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ServiceWorkerError> {
        config.validate()?;

        let store_id = config.store_id();
        let lifecycle = LifecycleManager::new(
            store_id.clone(),
            config.shell_urls()?,
            Arc::clone(&storage),
            Arc::clone(&fetcher),
        );

        Ok(Self {
            classifier: RequestClassifier::new(&config.origin, &config.asset_prefix),
            fallback: config.fallback_key()?,
            engine: StrategyEngine::new(storage, fetcher, store_id),
            lifecycle,
            config,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store_id(&self) -> &StoreId {
        self.lifecycle.store_id()
    }

    pub async fn state(&self) -> WorkerState {
        self.lifecycle.state().await
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.lifecycle.skip_waiting_requested()
    }

    /// `install` event.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        self.lifecycle.install().await
    }

    /// `activate` event.
    pub async fn activate(&self, clients: &mut Clients) -> Result<ActivationReport, ServiceWorkerError> {
        self.lifecycle.activate(clients).await
    }

    pub(crate) async fn retire(&self) {
        self.lifecycle.retire().await;
    }

    /// `fetch` event.
    ///
    /// Returns immediately. Must be called from within a tokio runtime.
    pub fn handle_fetch(&self, request: Request) -> FetchDisposition {
        let Some(class) = self.classifier.classify(&request) else {
            trace!(id = request.id.raw(), %request, "Passing through");
            return FetchDisposition::Passthrough;
        };

        let strategy = Strategy::for_route(class, &self.fallback);
        let request_id = request.id;
        trace!(id = request_id.raw(), %request, ?class, "Intercepted");

        let engine = self.engine.clone();
        let handle = tokio::spawn(async move { engine.execute(&strategy, request).await });
        FetchDisposition::RespondWith(ResponseFuture { request_id, handle })
    }

    /// Wait for background revalidations to finish writing.
    pub async fn settle(&self) {
        self.engine.background().settle().await;
    }

    /// Background revalidations still running.
    pub fn pending_background(&self) -> usize {
        self.engine.background().pending()
    }
}
