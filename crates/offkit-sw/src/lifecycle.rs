//! Install and activate handling for one cache generation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use offkit_net::{Fetcher, Request};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::store::{CacheEntry, CacheKey, CacheStorage, StoreId};
use crate::ServiceWorkerError;

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Seeding the shell.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Deleting stale stores.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install failed, or replaced by a newer generation.
    Redundant,
}

/// An open page session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub url: Url,
    /// Store of the generation serving this page, if any.
    pub controller: Option<StoreId>,
}

/// Open page sessions of the origin, in the order they were opened.
#[derive(Debug, Default)]
pub struct Clients {
    clients: Vec<Client>,
    next_id: u64,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly opened page. Pages start uncontrolled.
    pub fn open_window(&mut self, url: Url) -> Client {
        self.next_id += 1;
        let client = Client {
            id: format!("client-{}", self.next_id),
            url,
            controller: None,
        };
        self.clients.push(client.clone());
        client
    }

    /// Set the controller of a page, e.g. when it loads under an active generation.
    pub fn set_controller(&mut self, id: &str, controller: Option<StoreId>) -> bool {
        match self.clients.iter_mut().find(|c| c.id == id) {
            Some(client) => {
                client.controller = controller;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Client> {
        let index = self.clients.iter().position(|c| c.id == id)?;
        Some(self.clients.remove(index))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Number of pages served by the generation owning `store`.
    pub fn controlled_by(&self, store: &StoreId) -> usize {
        self.clients
            .iter()
            .filter(|c| c.controller.as_ref() == Some(store))
            .count()
    }

    /// Take control of every open page. Returns the ids whose controller
    /// changed, oldest page first.
    pub fn claim(&mut self, store: &StoreId) -> Vec<String> {
        self.clients
            .iter_mut()
            .filter(|c| c.controller.as_ref() != Some(store))
            .map(|c| {
                c.controller = Some(store.clone());
                c.id.clone()
            })
            .collect()
    }
}

/// Outcome of a successful activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub store_id: StoreId,
    /// Stores of older generations that were removed.
    pub deleted: Vec<StoreId>,
    /// Pages that switched to this generation.
    pub claimed: Vec<String>,
}

/// Owns the store of one generation: creates it on install, retires every
/// other store on activate.
pub struct LifecycleManager {
    store_id: StoreId,
    shell: Vec<Url>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    state: RwLock<WorkerState>,
    skip_waiting: AtomicBool,
}

impl LifecycleManager {
    pub fn new(
        store_id: StoreId,
        shell: Vec<Url>,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            store_id,
            shell,
            storage,
            fetcher,
            state: RwLock::new(WorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
        }
    }

    pub fn store_id(&self) -> &StoreId {
        &self.store_id
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Whether install asked the host to activate without waiting for old pages.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    /// Move from `expected` to `next`, failing if the state is anything else.
    async fn transition(&self, expected: WorkerState, next: WorkerState) -> Result<(), ServiceWorkerError> {
        let mut state = self.state.write().await;
        if *state != expected {
            return Err(ServiceWorkerError::StateError(format!(
                "{} cannot go from {:?} to {:?}",
                self.store_id, *state, next
            )));
        }
        *state = next;
        Ok(())
    }

    async fn set_state(&self, next: WorkerState) {
        *self.state.write().await = next;
    }

    /// Mark this generation as replaced.
    pub async fn retire(&self) {
        self.set_state(WorkerState::Redundant).await;
        info!(store = %self.store_id, "Generation retired");
    }

    /// Seed the store with the shell resources.
    ///
    /// All-or-nothing: if any seed fetch fails or returns a non-2xx status,
    /// the generation becomes redundant and no other store is touched.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        self.transition(WorkerState::Parsed, WorkerState::Installing)
            .await?;
        info!(store = %self.store_id, resources = self.shell.len(), "Installing");

        match self.seed().await {
            Ok(()) => {
                self.set_state(WorkerState::Installed).await;
                self.skip_waiting.store(true, Ordering::Release);
                info!(store = %self.store_id, "Installed");
                Ok(())
            }
            Err(err) => {
                self.set_state(WorkerState::Redundant).await;
                warn!(store = %self.store_id, error = %err, "Install failed");
                Err(err)
            }
        }
    }

    async fn seed(&self) -> Result<(), ServiceWorkerError> {
        let fetches = self.shell.iter().map(|url| async move {
            let request = Request::get(url.clone());
            let response = self
                .fetcher
                .fetch(&request)
                .await
                .map_err(|e| ServiceWorkerError::InstallFailed(format!("{url}: {e}")))?;
            if !response.ok() {
                return Err(ServiceWorkerError::InstallFailed(format!(
                    "{url}: status {}",
                    response.status
                )));
            }
            debug!(%url, "Fetched shell resource");
            Ok::<_, ServiceWorkerError>((CacheKey::get(url), CacheEntry::capture(&response)))
        });
        let entries = try_join_all(fetches).await?;

        let existed = self
            .storage
            .list_store_ids()
            .await?
            .contains(&self.store_id);
        self.storage.open(&self.store_id).await?;

        for (key, entry) in entries {
            if let Err(err) = self.storage.put(&self.store_id, key, entry).await {
                if !existed {
                    // leave nothing half-seeded behind
                    let _ = self.storage.delete_store(&self.store_id).await;
                }
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Delete every store except this generation's, then claim all pages.
    pub async fn activate(&self, clients: &mut Clients) -> Result<ActivationReport, ServiceWorkerError> {
        self.transition(WorkerState::Installed, WorkerState::Activating)
            .await?;

        let deleted = match self.purge_stale_stores().await {
            Ok(deleted) => deleted,
            Err(err) => {
                self.set_state(WorkerState::Installed).await;
                warn!(store = %self.store_id, error = %err, "Activation failed");
                return Err(err);
            }
        };

        let claimed = clients.claim(&self.store_id);
        self.set_state(WorkerState::Activated).await;
        info!(
            store = %self.store_id,
            deleted = deleted.len(),
            claimed = claimed.len(),
            "Activated"
        );

        Ok(ActivationReport {
            store_id: self.store_id.clone(),
            deleted,
            claimed,
        })
    }

    async fn purge_stale_stores(&self) -> Result<Vec<StoreId>, ServiceWorkerError> {
        let mut deleted = Vec::new();
        for id in self.storage.list_store_ids().await? {
            if id != self.store_id && self.storage.delete_store(&id).await? {
                debug!(store = %id, "Deleted stale store");
                deleted.push(id);
            }
        }
        Ok(deleted)
    }
}
