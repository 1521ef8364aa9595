//! # Offkit Service Worker
//!
//! Request interception and versioned caching that keeps a single-page app
//! usable offline and makes repeat loads of static assets cheap.
//!
//! ## Features
//!
//! - **Lifecycle**: install seeds the shell, activate deletes stale stores and
//!   claims open pages
//! - **Classification**: immutable assets, navigations, everything else
//! - **Strategies**: cache first, network first with shell fallback,
//!   stale while revalidate
//! - **Injected storage and network**: [`CacheStorage`] and
//!   [`offkit_net::Fetcher`] are traits, with an in-memory store included
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (host runtime)
//!     │
//!     └── CacheWorker (one per deployed version)
//!             ├── LifecycleManager   install / activate
//!             ├── RequestClassifier  Request → RouteClass
//!             └── StrategyEngine     RouteClass → Strategy → FetchResponse
//!
//! CacheStorage
//!     └── StoreId ("app-shell-v3")
//!             └── CacheKey → CacheEntry
//! ```

use offkit_net::NetError;
use thiserror::Error;

pub mod classify;
pub mod config;
pub mod container;
pub mod lifecycle;
pub mod store;
pub mod strategy;
pub mod worker;

pub use classify::{RequestClassifier, RouteClass};
pub use config::WorkerConfig;
pub use container::{ServiceWorkerContainer, ServiceWorkerEvent};
pub use lifecycle::{ActivationReport, Client, Clients, LifecycleManager, WorkerState};
pub use store::{CacheEntry, CacheKey, CacheStorage, MemoryCacheStorage, StoreError, StoreId};
pub use strategy::{FetchResponse, ResponseSource, Strategy, StrategyEngine, WaitUntil};
pub use worker::{CacheWorker, FetchDisposition, ResponseFuture};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Cache(#[from] StoreError),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Response task aborted: {0}")]
    Aborted(String),
}
