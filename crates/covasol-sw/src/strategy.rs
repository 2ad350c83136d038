//! Cache-First and Network-First answering strategies.
//!
//! Neither strategy holds the cache lock across a network call; concurrent
//! requests for different URLs proceed independently, and concurrent writes to
//! the same URL are last-write-wins.

use std::time::Duration;

use covasol_common::{with_timeout, CovasolError};
use covasol_net::{Fetcher, NetError, Request, Response};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cache::{CacheBackend, CacheEntry};
use crate::config::WorkerConfig;
use crate::route::PassthroughReason;
use crate::ServiceWorkerError;

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// One of the reserved offline assets.
    OfflineFallback,
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

    fn cached(entry: &CacheEntry, source: ResponseSource) -> Result<Self, ServiceWorkerError> {
        Ok(Self {
            response: entry.to_response()?,
            source,
        })
    }

    pub fn from_cache(&self) -> bool {
        self.source != ResponseSource::Network
    }
}

/// Result of handling a fetch event.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not intercepted; the page talks to the network directly.
    Passthrough(PassthroughReason),
    Respond(FetchResponse),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&FetchResponse> {
        match self {
            FetchOutcome::Respond(r) => Some(r),
            FetchOutcome::Passthrough(_) => None,
        }
    }
}

/// What a strategy needs from the controller.
pub(crate) struct StrategyContext<'a> {
    pub config: &'a WorkerConfig,
    pub fetcher: &'a dyn Fetcher,
    pub caches: &'a Mutex<Box<dyn CacheBackend>>,
}

impl StrategyContext<'_> {
    async fn lookup(&self, url: &str) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        self.caches.lock().await.match_any(url)
    }

    /// Store a copy of a successful response. Failures are logged, not returned.
    async fn store(&self, cache: &str, request: &Request, response: &Response) {
        let entry = CacheEntry::from_response(&request.url, response);
        if let Err(e) = self.caches.lock().await.put(cache, entry) {
            warn!(url = %request.url, cache, error = %e, "Failed to cache response");
        }
    }

    async fn offline_asset(
        &self,
        path: &str,
    ) -> Result<Option<FetchResponse>, ServiceWorkerError> {
        let url = self.config.resolve(path)?;
        match self.lookup(url.as_str()).await? {
            Some(entry) => Ok(Some(FetchResponse::cached(
                &entry,
                ResponseSource::OfflineFallback,
            )?)),
            None => Ok(None),
        }
    }
}

/// Fetch from the network, giving up after `timeout`.
pub(crate) async fn fetch_with_timeout(
    fetcher: &dyn Fetcher,
    request: &Request,
    timeout: Option<Duration>,
) -> Result<Response, NetError> {
    match timeout {
        Some(timeout) => match with_timeout(timeout, || fetcher.fetch(request)).await {
            Ok(result) => result,
            Err(CovasolError::Timeout(after)) => Err(NetError::Timeout(after)),
            Err(other) => Err(NetError::RequestFailed(other.to_string())),
        },
        None => fetcher.fetch(request).await,
    }
}

/// Serve from any cache; on a miss go to the network and keep a copy.
pub(crate) async fn cache_first(
    ctx: &StrategyContext<'_>,
    request: &Request,
) -> Result<FetchResponse, ServiceWorkerError> {
    if let Some(entry) = ctx.lookup(request.url.as_str()).await? {
        debug!(url = %request.url, "Cache hit");
        return FetchResponse::cached(&entry, ResponseSource::Cache);
    }

    match fetch_with_timeout(ctx.fetcher, request, ctx.config.timeouts.cache_first).await {
        Ok(response) => {
            if response.ok() {
                ctx.store(&ctx.config.static_cache, request, &response).await;
            }
            Ok(FetchResponse::network(response))
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Cache miss and network failed");
            if request.is_image() {
                if let Some(placeholder) = ctx.offline_asset(&ctx.config.offline_image).await? {
                    return Ok(placeholder);
                }
            }
            Err(e.into())
        }
    }
}

/// Try the network first and keep a copy; fall back to the cache when offline.
pub(crate) async fn network_first(
    ctx: &StrategyContext<'_>,
    request: &Request,
) -> Result<FetchResponse, ServiceWorkerError> {
    match fetch_with_timeout(ctx.fetcher, request, ctx.config.timeouts.network_first).await {
        Ok(response) => {
            if response.ok() {
                ctx.store(&ctx.config.dynamic_cache, request, &response).await;
            }
            Ok(FetchResponse::network(response))
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Network failed, trying cache");
            if let Some(entry) = ctx.lookup(request.url.as_str()).await? {
                return FetchResponse::cached(&entry, ResponseSource::Cache);
            }
            if request.is_navigation() {
                if let Some(page) = ctx.offline_asset(&ctx.config.offline_page).await? {
                    return Ok(page);
                }
            }
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStorage;
    use crate::config::StrategyTimeouts;
    use covasol_net::RequestDestination;
    use covasol_test_utils::{test_scope, test_url, MockFetcher};
    use http::StatusCode;

    fn config() -> WorkerConfig {
        WorkerConfig {
            timeouts: StrategyTimeouts::disabled(),
            ..WorkerConfig::for_scope(test_scope())
        }
    }

    fn caches() -> Mutex<Box<dyn CacheBackend>> {
        Mutex::new(Box::new(CacheStorage::new()))
    }

    #[tokio::test]
    async fn test_cache_first_stores_then_serves_from_cache() {
        let config = config();
        let net = MockFetcher::new();
        net.asset("/assets/css/base.css", "text/css", b"body{}");
        let caches = caches();
        let ctx = StrategyContext {
            config: &config,
            fetcher: &net,
            caches: &caches,
        };
        let request = Request::get(test_url("/assets/css/base.css"));

        let first = cache_first(&ctx, &request).await.unwrap();
        assert_eq!(first.source, ResponseSource::Network);

        let second = cache_first(&ctx, &request).await.unwrap();
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.response.text(), "body{}");
        assert_eq!(net.calls("/assets/css/base.css"), 1);

        let stored = caches
            .lock()
            .await
            .match_in("covasol-static-v1", request.url.as_str())
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_cache_first_does_not_store_errors() {
        let config = config();
        let net = MockFetcher::new();
        let caches = caches();
        let ctx = StrategyContext {
            config: &config,
            fetcher: &net,
            caches: &caches,
        };
        let request = Request::get(test_url("/assets/js/missing.js"));

        let response = cache_first(&ctx, &request).await.unwrap();
        assert_eq!(response.response.status, StatusCode::NOT_FOUND);
        assert!(caches.lock().await.match_any(request.url.as_str()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_first_non_image_failure_propagates() {
        let config = config();
        let net = MockFetcher::new();
        net.set_offline(true);
        let caches = caches();
        let ctx = StrategyContext {
            config: &config,
            fetcher: &net,
            caches: &caches,
        };

        let request = Request::get(test_url("/assets/js/app.js"))
            .destination(RequestDestination::Script);
        assert!(matches!(
            cache_first(&ctx, &request).await,
            Err(ServiceWorkerError::Network(NetError::Offline))
        ));
    }

    #[tokio::test]
    async fn test_network_first_prefers_live_response() {
        let config = config();
        let net = MockFetcher::new();
        net.page("/blog", "<h1>v1</h1>");
        let caches = caches();
        let ctx = StrategyContext {
            config: &config,
            fetcher: &net,
            caches: &caches,
        };
        let request = Request::navigate(test_url("/blog"));

        network_first(&ctx, &request).await.unwrap();
        net.page("/blog", "<h1>v2</h1>");
        let live = network_first(&ctx, &request).await.unwrap();

        assert_eq!(live.source, ResponseSource::Network);
        assert_eq!(live.response.text(), "<h1>v2</h1>");
        let stored = caches
            .lock()
            .await
            .match_in("covasol-dynamic-v1", request.url.as_str())
            .unwrap()
            .unwrap();
        assert_eq!(stored.body, b"<h1>v2</h1>");
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let config = config();
        let net = MockFetcher::new();
        net.page("/san-pham", "<h1>Products</h1>");
        let caches = caches();
        let ctx = StrategyContext {
            config: &config,
            fetcher: &net,
            caches: &caches,
        };
        let request = Request::navigate(test_url("/san-pham"));

        network_first(&ctx, &request).await.unwrap();
        net.set_offline(true);

        let offline = network_first(&ctx, &request).await.unwrap();
        assert_eq!(offline.source, ResponseSource::Cache);
        assert_eq!(offline.response.text(), "<h1>Products</h1>");
    }

    #[tokio::test]
    async fn test_network_first_non_navigation_failure_propagates() {
        let config = config();
        let net = MockFetcher::new();
        net.set_offline(true);
        let caches = caches();
        caches
            .lock()
            .await
            .put(
                "covasol-static-v1",
                CacheEntry::from_response(
                    &test_url("/offline"),
                    &Response::new(test_url("/offline"), StatusCode::OK, "offline"),
                ),
            )
            .unwrap();
        let ctx = StrategyContext {
            config: &config,
            fetcher: &net,
            caches: &caches,
        };

        let request = Request::get(test_url("/sitemap.xml"));
        assert!(network_first(&ctx, &request).await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_counts_as_network_failure() {
        let config = WorkerConfig {
            timeouts: StrategyTimeouts {
                network_first: Some(Duration::from_millis(20)),
                ..StrategyTimeouts::disabled()
            },
            ..WorkerConfig::for_scope(test_scope())
        };
        let net = MockFetcher::new();
        net.page("/gioi-thieu", "<h1>About</h1>");
        let caches = caches();
        let ctx = StrategyContext {
            config: &config,
            fetcher: &net,
            caches: &caches,
        };
        let request = Request::navigate(test_url("/gioi-thieu"));
        network_first(&ctx, &request).await.unwrap();

        net.set_delay(Some(Duration::from_millis(500)));
        let slow = network_first(&ctx, &request).await.unwrap();
        assert_eq!(slow.source, ResponseSource::Cache);
    }
}
