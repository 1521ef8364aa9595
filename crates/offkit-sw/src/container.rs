//! Host-side bookkeeping: which generation is waiting or active,
//! and which pages it controls.
//!
//! ```text
//! ServiceWorkerContainer
//!     ├── waiting (CacheWorker)
//!     ├── active  (CacheWorker)  ← receives fetch events
//!     └── clients (open pages)
//! ```

use std::sync::Arc;

use offkit_net::Request;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use url::Url;

use crate::lifecycle::{Clients, WorkerState};
use crate::store::StoreId;
use crate::worker::{CacheWorker, FetchDisposition};
use crate::ServiceWorkerError;

/// Lifecycle notifications for pages and tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// A generation changed state.
    StateChange {
        store_id: StoreId,
        new_state: WorkerState,
    },
    /// A page is now served by a different generation.
    ControllerChange {
        client_id: String,
        store_id: StoreId,
    },
}

#[derive(Default)]
struct Registration {
    waiting: Option<Arc<CacheWorker>>,
    active: Option<Arc<CacheWorker>>,
}

/// Runs generations through install and activate and routes fetch events
/// to the active one.
pub struct ServiceWorkerContainer {
    registration: RwLock<Registration>,

    /// Open pages of the origin.
    pub clients: Arc<RwLock<Clients>>,

    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registration: RwLock::new(Registration::default()),
                clients: Arc::new(RwLock::new(Clients::new())),
                event_tx,
            },
            event_rx,
        )
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        // receivers are optional
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, worker: &CacheWorker, new_state: WorkerState) {
        self.emit(ServiceWorkerEvent::StateChange {
            store_id: worker.store_id().clone(),
            new_state,
        });
    }

    /// Install a new generation and activate it when allowed.
    ///
    /// On install failure the new generation is discarded and the active
    /// one keeps serving.
    pub async fn register(&self, worker: Arc<CacheWorker>) -> Result<(), ServiceWorkerError> {
        self.emit_state(&worker, WorkerState::Installing);

        if let Err(err) = worker.install().await {
            self.emit_state(&worker, WorkerState::Redundant);
            return Err(err);
        }

        {
            let mut registration = self.registration.write().await;
            if let Some(previous) = registration.waiting.replace(Arc::clone(&worker)) {
                previous.retire().await;
                self.emit_state(&previous, WorkerState::Redundant);
            }
        }
        self.emit_state(&worker, WorkerState::Installed);

        if worker.skip_waiting_requested() {
            self.activate_waiting().await?;
        } else {
            info!(store = %worker.store_id(), "Installed generation is waiting");
        }
        Ok(())
    }

    /// Activate the waiting generation, if any.
    pub async fn activate_waiting(&self) -> Result<(), ServiceWorkerError> {
        let mut registration = self.registration.write().await;
        let Some(worker) = registration.waiting.take() else {
            return Ok(());
        };

        self.emit_state(&worker, WorkerState::Activating);
        let report = {
            let mut clients = self.clients.write().await;
            match worker.activate(&mut clients).await {
                Ok(report) => report,
                Err(err) => {
                    registration.waiting = Some(worker);
                    return Err(err);
                }
            }
        };

        if let Some(previous) = registration.active.replace(Arc::clone(&worker)) {
            previous.retire().await;
            self.emit_state(&previous, WorkerState::Redundant);
        }
        self.emit_state(&worker, WorkerState::Activated);

        for client_id in report.claimed {
            self.emit(ServiceWorkerEvent::ControllerChange {
                client_id,
                store_id: report.store_id.clone(),
            });
        }
        Ok(())
    }

    /// A page opened. It is controlled by the active generation, if any.
    pub async fn open_client(&self, url: Url) -> String {
        let controller = self.active_store().await;
        let mut clients = self.clients.write().await;
        let client = clients.open_window(url);
        clients.set_controller(&client.id, controller);
        client.id
    }

    /// A page closed.
    pub async fn close_client(&self, id: &str) -> bool {
        let removed = self.clients.write().await.remove(id).is_some();
        debug!(client = id, removed, "Page closed");
        removed
    }

    /// Route a fetch event to the active generation.
    pub async fn handle_fetch(&self, request: Request) -> FetchDisposition {
        match self.active_worker().await {
            Some(worker) => worker.handle_fetch(request),
            None => FetchDisposition::Passthrough,
        }
    }

    pub async fn active_worker(&self) -> Option<Arc<CacheWorker>> {
        self.registration.read().await.active.clone()
    }

    pub async fn active_store(&self) -> Option<StoreId> {
        self.active_worker()
            .await
            .map(|worker| worker.store_id().clone())
    }
}

impl Default for ServiceWorkerContainer {
    fn default() -> Self {
        Self::new().0
    }
}
