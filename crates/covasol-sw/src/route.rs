//! Per-request routing decision.

use covasol_net::Request;
use http::Method;
use tracing::trace;

use crate::config::WorkerConfig;

/// Why a request is left to the default network handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    /// Only GET requests are cached.
    NonGet,
    /// Data calls under the API prefix.
    Api,
    /// Authenticated admin pages.
    Admin,
    /// The worker is not active, so it controls nothing yet.
    Inactive,
}

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Not intercepted.
    Passthrough(PassthroughReason),
    /// Static assets: cache, then network.
    CacheFirst,
    /// Pages and everything else: network, then cache.
    NetworkFirst,
}

/// Classifies requests using the path contract from [`WorkerConfig`].
#[derive(Debug, Clone)]
pub struct Router {
    api_prefix: String,
    admin_prefix: String,
    static_extensions: Vec<String>,
    static_dirs: Vec<String>,
}

impl Router {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            api_prefix: config.api_prefix.clone(),
            admin_prefix: config.admin_prefix.clone(),
            static_extensions: config
                .static_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            static_dirs: config.static_dirs.clone(),
        }
    }

    /// Decide how to answer `request`.
    pub fn classify(&self, request: &Request) -> Route {
        let path = request.url.path();

        let route = if request.method != Method::GET {
            Route::Passthrough(PassthroughReason::NonGet)
        } else if path.starts_with(&self.api_prefix) {
            Route::Passthrough(PassthroughReason::Api)
        } else if path.starts_with(&self.admin_prefix) {
            Route::Passthrough(PassthroughReason::Admin)
        } else if self.is_static_asset(path) {
            Route::CacheFirst
        } else {
            Route::NetworkFirst
        };

        trace!(url = %request.url, ?route, "Classified request");
        route
    }

    /// Extension in the static set, or path under a static directory.
    pub fn is_static_asset(&self, path: &str) -> bool {
        if self.static_dirs.iter().any(|dir| path.starts_with(dir.as_str())) {
            return true;
        }

        let file_name = path.rsplit('/').next().unwrap_or_default();
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.static_extensions.iter().any(|e| *e == ext)
            }
            _ => false,
        }
    }
}
