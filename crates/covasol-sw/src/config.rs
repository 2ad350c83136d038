//! Worker configuration.
//!
//! Cache names, the precache manifest, and the path contract with the rest of
//! the site are plain values here, so two worker versions can be built side by
//! side in tests.

use std::path::Path;
use std::time::Duration;

use covasol_common::retry::millis;
use covasol_common::RetryConfig;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::ServiceWorkerError;

/// Network timeouts per strategy. `None` waits for the network indefinitely.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategyTimeouts {
    #[serde(rename = "cache_first_ms", with = "millis::option")]
    pub cache_first: Option<Duration>,
    #[serde(rename = "network_first_ms", with = "millis::option")]
    pub network_first: Option<Duration>,
    #[serde(rename = "install_ms", with = "millis::option")]
    pub install: Option<Duration>,
}

impl Default for StrategyTimeouts {
    fn default() -> Self {
        Self {
            cache_first: Some(Duration::from_secs(10)),
            network_first: Some(Duration::from_secs(5)),
            install: Some(Duration::from_secs(30)),
        }
    }
}

impl StrategyTimeouts {
    /// No timeouts anywhere.
    pub fn disabled() -> Self {
        Self {
            cache_first: None,
            network_first: None,
            install: None,
        }
    }
}

/// Values used when a push payload leaves a field out.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub url: String,
    pub icon: String,
    pub badge: String,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "COVASOL".to_string(),
            body: "Bạn có thông báo mới từ COVASOL".to_string(),
            url: "/".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/badge-72x72.png".to_string(),
        }
    }
}

/// Offline worker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin (and path) the worker controls. Manifest paths resolve against it.
    pub scope: Url,
    /// Name of the cache holding static assets.
    pub static_cache: String,
    /// Name of the cache holding visited pages.
    pub dynamic_cache: String,
    /// Paths stored in the static cache at install, in order.
    pub precache: Vec<String>,
    /// Requests under this prefix are never intercepted.
    pub api_prefix: String,
    /// Requests under this prefix are never intercepted.
    pub admin_prefix: String,
    /// Extensions (without the dot) that mark a static asset.
    pub static_extensions: Vec<String>,
    /// Directories whose contents are static assets.
    pub static_dirs: Vec<String>,
    /// Page served to navigations when neither network nor cache can answer.
    pub offline_page: String,
    /// Image served to image requests when neither network nor cache can answer.
    pub offline_image: String,
    pub timeouts: StrategyTimeouts,
    /// Per-URL retries while precaching.
    pub install_retry: RetryConfig,
    /// Activate right after install instead of waiting for old pages to close.
    pub skip_waiting: bool,
    /// Take control of open pages on activation.
    pub claim_clients: bool,
    pub notification: NotificationDefaults,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scope: Url::parse("https://covasol.com.vn/").expect("static url"),
            static_cache: "covasol-static-v1".to_string(),
            dynamic_cache: "covasol-dynamic-v1".to_string(),
            precache: [
                "/",
                "/offline",
                "/assets/css/base.css",
                "/assets/css/components.css",
                "/assets/img/offline.png",
                "/icons/icon-192x192.png",
                "/icons/icon-512x512.png",
                "/favicon.ico",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            api_prefix: "/api/".to_string(),
            admin_prefix: "/admin".to_string(),
            static_extensions: [
                "css", "js", "mjs", "png", "jpg", "jpeg", "gif", "svg", "webp", "avif", "ico",
                "woff", "woff2", "ttf", "otf", "eot",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            static_dirs: vec!["/assets/".to_string(), "/_next/static/".to_string()],
            offline_page: "/offline".to_string(),
            offline_image: "/assets/img/offline.png".to_string(),
            timeouts: StrategyTimeouts::default(),
            install_retry: RetryConfig::none(),
            skip_waiting: true,
            claim_clients: true,
            notification: NotificationDefaults::default(),
        }
    }
}

impl WorkerConfig {
    /// Default configuration for a different origin.
    pub fn for_scope(scope: Url) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }

    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ServiceWorkerError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ServiceWorkerError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            ServiceWorkerError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        debug!(path = %path.display(), scope = %config.scope, "Loaded worker config");
        Ok(config)
    }

    /// Check the invariants the controller relies on.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.static_cache.trim().is_empty() || self.dynamic_cache.trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "cache names must not be empty".to_string(),
            ));
        }
        if self.static_cache == self.dynamic_cache {
            return Err(ServiceWorkerError::Config(format!(
                "static and dynamic caches share the name '{}'",
                self.static_cache
            )));
        }
        for (field, prefix) in [
            ("api_prefix", &self.api_prefix),
            ("admin_prefix", &self.admin_prefix),
        ] {
            if !prefix.starts_with('/') {
                return Err(ServiceWorkerError::Config(format!(
                    "{} must start with '/': {}",
                    field, prefix
                )));
            }
        }
        if !self.precache.contains(&self.offline_page) {
            return Err(ServiceWorkerError::Config(format!(
                "offline_page '{}' is not in the precache manifest",
                self.offline_page
            )));
        }
        if !self.precache.contains(&self.offline_image) {
            // Image requests that miss everywhere will fail instead of
            // getting the placeholder.
            warn!(
                offline_image = %self.offline_image,
                "Offline image is not in the precache manifest"
            );
        }
        Ok(())
    }

    /// Whether `name` is one of the two caches of this version.
    pub fn is_current_cache(&self, name: &str) -> bool {
        name == self.static_cache || name == self.dynamic_cache
    }

    /// Resolve a site path (or absolute URL) against the scope.
    pub fn resolve(&self, path: &str) -> Result<Url, ServiceWorkerError> {
        self.scope
            .join(path)
            .map_err(|e| ServiceWorkerError::Config(format!("bad path '{}': {}", path, e)))
    }

    /// The precache manifest as absolute URLs, in manifest order.
    pub fn precache_urls(&self) -> Result<Vec<Url>, ServiceWorkerError> {
        self.precache.iter().map(|p| self.resolve(p)).collect()
    }
}
