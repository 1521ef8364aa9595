//! Route classification for intercepted requests.

use http::Method;
use offkit_net::Request;
use serde::{Deserialize, Serialize};
use url::{Origin, Url};

/// Which caching strategy a request is served with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteClass {
    /// Content-addressed build output under the asset prefix.
    ImmutableAsset,
    /// Top-level document load.
    Navigation,
    /// Any other same-origin GET.
    Other,
}

/// Assigns requests to a [`RouteClass`].
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    origin: Origin,
    asset_prefix: String,
}

impl RequestClassifier {
    /// `asset_prefix` is a path such as `/assets/`; a missing trailing slash
    /// is added so the prefix only matches whole path segments.
    pub fn new(origin: &Url, asset_prefix: &str) -> Self {
        let mut asset_prefix = asset_prefix.to_string();
        if !asset_prefix.ends_with('/') {
            asset_prefix.push('/');
        }
        Self {
            origin: origin.origin(),
            asset_prefix,
        }
    }

    /// Classify a request.
    ///
    /// `None` means the request is not ours: non-GET or cross-origin traffic
    /// goes to the network untouched.
    pub fn classify(&self, request: &Request) -> Option<RouteClass> {
        if request.method != Method::GET || request.url.origin() != self.origin {
            return None;
        }

        if request.url.path().starts_with(&self.asset_prefix) {
            Some(RouteClass::ImmutableAsset)
        } else if request.is_navigation() {
            Some(RouteClass::Navigation)
        } else {
            Some(RouteClass::Other)
        }
    }
}
