//! Build-time constants of a deployed worker.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::store::{CacheKey, StoreId};
use crate::ServiceWorkerError;

/// Everything a generation needs to know about the app it serves.
///
/// The build pipeline emits this as JSON next to the hashed assets; a new
/// `version` on every deployment is what rolls the cache over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Origin of the application, e.g. `https://app.example.com/`.
    pub origin: Url,

    /// Deployment version tag.
    pub version: String,

    /// Prefix shared by every store identifier of this app.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Paths seeded into the store at install time.
    #[serde(default = "default_shell_resources")]
    pub shell_resources: Vec<String>,

    /// Path prefix of content-addressed assets.
    #[serde(default = "default_asset_prefix")]
    pub asset_prefix: String,

    /// Document served when a navigation fails.
    #[serde(default = "default_offline_fallback")]
    pub offline_fallback: String,
}

fn default_cache_prefix() -> String {
    "app-shell".to_string()
}

fn default_shell_resources() -> Vec<String> {
    vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
    ]
}

fn default_asset_prefix() -> String {
    "/assets/".to_string()
}

fn default_offline_fallback() -> String {
    "/index.html".to_string()
}

impl WorkerConfig {
    /// Configuration with the default shell, asset prefix and fallback.
    pub fn new(origin: Url, version: impl Into<String>) -> Self {
        Self {
            origin,
            version: version.into(),
            cache_prefix: default_cache_prefix(),
            shell_resources: default_shell_resources(),
            asset_prefix: default_asset_prefix(),
            offline_fallback: default_offline_fallback(),
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ServiceWorkerError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ServiceWorkerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.version.trim().is_empty() {
            return Err(ServiceWorkerError::Config("version must not be empty".to_string()));
        }
        if !self.origin.origin().is_tuple() {
            return Err(ServiceWorkerError::Config(format!(
                "origin {} has no host",
                self.origin
            )));
        }

        let paths = self
            .shell_resources
            .iter()
            .chain([&self.asset_prefix, &self.offline_fallback]);
        for path in paths {
            if !path.starts_with('/') {
                return Err(ServiceWorkerError::Config(format!(
                    "path {path:?} must start with '/'"
                )));
            }
        }

        if !self.shell_resources.contains(&self.offline_fallback) {
            return Err(ServiceWorkerError::Config(format!(
                "offline fallback {} is not part of the shell",
                self.offline_fallback
            )));
        }
        Ok(())
    }

    pub fn store_id(&self) -> StoreId {
        StoreId::versioned(&self.cache_prefix, &self.version)
    }

    /// Absolute URL of an app path.
    pub fn resolve(&self, path: &str) -> Result<Url, ServiceWorkerError> {
        self.origin
            .join(path)
            .map_err(|e| ServiceWorkerError::Config(format!("{path}: {e}")))
    }

    pub fn shell_urls(&self) -> Result<Vec<Url>, ServiceWorkerError> {
        self.shell_resources.iter().map(|p| self.resolve(p)).collect()
    }

    pub fn fallback_key(&self) -> Result<CacheKey, ServiceWorkerError> {
        Ok(CacheKey::get(&self.resolve(&self.offline_fallback)?))
    }
}
