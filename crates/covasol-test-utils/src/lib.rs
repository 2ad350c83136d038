//! Testing utilities for the Covasol offline worker.
//!
//! Shared network doubles and fixtures.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use covasol_net::{Fetcher, NetError, Request, Response, Url};
use http::{header, HeaderValue, StatusCode};

/// Origin used by fixtures.
pub const TEST_ORIGIN: &str = "https://covasol.test/";

pub fn test_scope() -> Url {
    Url::parse(TEST_ORIGIN).unwrap()
}

/// Absolute URL for a path under [`TEST_ORIGIN`].
pub fn test_url(path: &str) -> Url {
    test_scope().join(path).unwrap()
}

#[derive(Debug, Clone)]
struct MockRoute {
    status: StatusCode,
    body: Vec<u8>,
    content_type: Option<&'static str>,
}

/// Scripted network: known URLs answer with their route, everything else 404s.
///
/// Going offline makes every fetch fail with [`NetError::Offline`]. Every
/// call is counted, whether it succeeds or not.
#[derive(Debug, Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, MockRoute>>,
    calls: Mutex<HashMap<String, usize>>,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with `status` for the path under the test origin.
    pub fn route(&self, path: &str, status: u16, body: &str) -> &Self {
        self.insert(path, status, body.as_bytes().to_vec(), None);
        self
    }

    /// Serve a page with an HTML content type.
    pub fn page(&self, path: &str, body: &str) -> &Self {
        self.insert(path, 200, body.as_bytes().to_vec(), Some("text/html; charset=utf-8"));
        self
    }

    /// Serve a binary asset with the given content type.
    pub fn asset(&self, path: &str, content_type: &'static str, body: &[u8]) -> &Self {
        self.insert(path, 200, body.to_vec(), Some(content_type));
        self
    }

    fn insert(&self, path: &str, status: u16, body: Vec<u8>, content_type: Option<&'static str>) {
        let route = MockRoute {
            status: StatusCode::from_u16(status).unwrap(),
            body,
            content_type,
        };
        self.routes
            .lock()
            .unwrap()
            .insert(test_url(path).to_string(), route);
    }

    pub fn remove_route(&self, path: &str) {
        self.routes.lock().unwrap().remove(test_url(path).as_str());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Hold every fetch for `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Number of fetches seen for the path under the test origin.
    pub fn calls(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(test_url(path).as_str())
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let key = request.url.to_string();
        *self.calls.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Offline);
        }

        let route = self.routes.lock().unwrap().get(&key).cloned();
        let response = match route {
            Some(route) => {
                let mut response = Response::new(request.url.clone(), route.status, route.body);
                if let Some(content_type) = route.content_type {
                    response = response.header(
                        header::CONTENT_TYPE,
                        HeaderValue::from_static(content_type),
                    );
                }
                response
            }
            None => Response::new(request.url.clone(), StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }
}
