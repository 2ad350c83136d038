//! End-to-end behaviour of the offline worker against a scripted network.

use std::sync::Arc;

use covasol_net::{Request, RequestDestination, Response};
use covasol_sw::{
    CacheBackend, CacheEntry, CacheStorage, ClickOutcome, Client, FetchOutcome,
    OfflineController, PassthroughReason, ResponseSource, ServiceWorkerState, SqliteCacheStorage,
    StrategyTimeouts, SyncOutcome, WorkerConfig, CONTACT_FORM_SYNC,
};
use covasol_test_utils::{test_scope, test_url, MockFetcher};
use http::{Method, StatusCode};

const STATIC: &str = "covasol-static-v1";
const DYNAMIC: &str = "covasol-dynamic-v1";

fn config() -> WorkerConfig {
    WorkerConfig {
        timeouts: StrategyTimeouts::disabled(),
        ..WorkerConfig::for_scope(test_scope())
    }
}

/// The network as it looks when the site is up.
fn site() -> Arc<MockFetcher> {
    let net = Arc::new(MockFetcher::new());
    net.page("/", "<h1>Trang chủ</h1>")
        .page("/offline", "<h1>Bạn đang ngoại tuyến</h1>")
        .asset("/assets/css/base.css", "text/css", b"body{margin:0}")
        .asset("/assets/css/components.css", "text/css", b".btn{}")
        .asset("/assets/img/offline.png", "image/png", b"\x89PNG-offline")
        .asset("/icons/icon-192x192.png", "image/png", b"\x89PNG-192")
        .asset("/icons/icon-512x512.png", "image/png", b"\x89PNG-512")
        .asset("/favicon.ico", "image/x-icon", b"ico");
    net
}

async fn installed(config: WorkerConfig, net: &Arc<MockFetcher>) -> OfflineController {
    let (controller, _events) = OfflineController::in_memory(config, net.clone()).unwrap();
    controller.install().await.unwrap();
    controller
}

#[tokio::test]
async fn install_precaches_exactly_the_manifest() {
    let config = WorkerConfig {
        precache: vec![
            "/".to_string(),
            "/offline".to_string(),
            "/assets/css/base.css".to_string(),
        ],
        ..config()
    };
    let net = site();
    let controller = installed(config, &net).await;

    let mut keys = controller.cache_keys(STATIC).await.unwrap();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            test_url("/").to_string(),
            test_url("/assets/css/base.css").to_string(),
            test_url("/offline").to_string(),
        ]
    );
    assert_eq!(controller.state().await, ServiceWorkerState::Activated);
}

#[tokio::test]
async fn failed_install_stores_nothing() {
    let net = site();
    net.route("/favicon.ico", 500, "boom");
    let (controller, _events) = OfflineController::in_memory(config(), net.clone()).unwrap();

    assert!(controller.install().await.is_err());
    assert_eq!(controller.state().await, ServiceWorkerState::Redundant);
    assert!(controller.cache_keys(STATIC).await.unwrap().is_empty());

    let outcome = controller
        .handle_fetch(&Request::navigate(test_url("/")))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        FetchOutcome::Passthrough(PassthroughReason::Inactive)
    ));
}

#[tokio::test]
async fn push_then_click_focuses_or_opens_promo() {
    let net = site();
    let controller = installed(config(), &net).await;

    let payload = r#"{"title":"Khuyến mãi","url":"/promo"}"#.as_bytes();
    let first = controller.handle_push(Some(payload)).await.unwrap();
    {
        let notifications = controller.notifications().read().await;
        let shown = notifications.get(first).unwrap();
        assert_eq!(shown.title, "Khuyến mãi");
        assert_eq!(shown.body, "Bạn có thông báo mới từ COVASOL");
        assert_eq!(shown.data.url, "/promo");
    }

    // No window at /promo yet.
    let opened = match controller.handle_notification_click(first).await.unwrap() {
        ClickOutcome::Opened(id) => id,
        other => panic!("expected a new window, got {:?}", other),
    };

    // A second click finds the window opened above.
    controller
        .clients()
        .write()
        .await
        .add(Client::window(test_url("/blog")));
    let second = controller.handle_push(Some(payload)).await.unwrap();
    let outcome = controller.handle_notification_click(second).await.unwrap();
    assert_eq!(outcome, ClickOutcome::Focused(opened.clone()));

    let clients = controller.clients().read().await;
    assert_eq!(clients.len(), 2);
    assert!(clients.get(&opened).unwrap().focused);
}

#[tokio::test]
async fn missing_image_offline_gets_placeholder() {
    let net = site();
    let controller = installed(config(), &net).await;
    net.set_offline(true);

    let request =
        Request::get(test_url("/assets/img/logo.png")).destination(RequestDestination::Image);
    let outcome = controller.handle_fetch(&request).await.unwrap();
    let response = outcome.response().unwrap();

    assert_eq!(response.source, ResponseSource::OfflineFallback);
    assert_eq!(response.response.body.as_ref(), b"\x89PNG-offline");
}

#[tokio::test]
async fn passthrough_requests_touch_nothing() {
    let net = site();
    let controller = installed(config(), &net).await;
    let calls_after_install = net.total_calls();
    let keys_after_install = controller.cache_keys(STATIC).await.unwrap().len();

    let requests = [
        (
            Request::get(test_url("/lien-he")).with_method(Method::POST),
            PassthroughReason::NonGet,
        ),
        (Request::get(test_url("/api/contact")), PassthroughReason::Api),
        (Request::navigate(test_url("/admin/login")), PassthroughReason::Admin),
        (Request::navigate(test_url("/admin")), PassthroughReason::Admin),
    ];
    for (request, reason) in requests {
        let outcome = controller.handle_fetch(&request).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Passthrough(r) if r == reason));
    }

    assert_eq!(net.total_calls(), calls_after_install);
    assert_eq!(
        controller.cache_keys(STATIC).await.unwrap().len(),
        keys_after_install
    );
    assert!(controller.cache_keys(DYNAMIC).await.unwrap().is_empty());
}

#[tokio::test]
async fn cached_asset_skips_network() {
    let net = site();
    let controller = installed(config(), &net).await;
    assert_eq!(net.calls("/assets/css/base.css"), 1);

    let request = Request::get(test_url("/assets/css/base.css"));
    let outcome = controller.handle_fetch(&request).await.unwrap();

    assert_eq!(outcome.response().unwrap().source, ResponseSource::Cache);
    assert_eq!(net.calls("/assets/css/base.css"), 1);
}

#[tokio::test]
async fn navigation_online_updates_cache_and_offline_falls_back() {
    let net = site();
    let controller = installed(config(), &net).await;
    net.page("/dich-vu", "<h1>Dịch vụ</h1>");

    let request = Request::navigate(test_url("/dich-vu"));
    let live = controller.handle_fetch(&request).await.unwrap();
    assert_eq!(live.response().unwrap().source, ResponseSource::Network);
    assert!(controller
        .cache_keys(DYNAMIC)
        .await
        .unwrap()
        .contains(&test_url("/dich-vu").to_string()));

    net.set_offline(true);
    let cached = controller.handle_fetch(&request).await.unwrap();
    assert_eq!(cached.response().unwrap().source, ResponseSource::Cache);
    assert_eq!(cached.response().unwrap().response.text(), "<h1>Dịch vụ</h1>");

    let unknown = controller
        .handle_fetch(&Request::navigate(test_url("/tuyen-dung")))
        .await
        .unwrap();
    let fallback = unknown.response().unwrap();
    assert_eq!(fallback.source, ResponseSource::OfflineFallback);
    assert_eq!(fallback.response.text(), "<h1>Bạn đang ngoại tuyến</h1>");
}

#[tokio::test]
async fn activation_purges_previous_versions() {
    let net = site();
    let storage = SqliteCacheStorage::open_in_memory().unwrap();
    let old_config = WorkerConfig {
        static_cache: "covasol-static-v0".to_string(),
        dynamic_cache: "covasol-dynamic-v0".to_string(),
        ..config()
    };
    let (old, _events) = OfflineController::new(old_config, net.clone(), Box::new(storage)).unwrap();
    old.install().await.unwrap();
    old.handle_fetch(&Request::navigate(test_url("/")))
        .await
        .unwrap();
    old.clients()
        .write()
        .await
        .add(Client::window(test_url("/")));

    let (new, _events) = old.successor(config(), net.clone()).unwrap();
    new.install().await.unwrap();
    old.retire().await.unwrap();
    assert_eq!(new.cache_names().await.unwrap(), vec![STATIC.to_string()]);

    new.handle_fetch(&Request::navigate(test_url("/")))
        .await
        .unwrap();
    let mut names = new.cache_names().await.unwrap();
    names.sort();
    assert_eq!(names, vec![DYNAMIC.to_string(), STATIC.to_string()]);

    assert_eq!(old.state().await, ServiceWorkerState::Redundant);
    let clients = new.clients().read().await;
    assert_eq!(clients.len(), 1);
    assert_eq!(clients.match_all(&Default::default()).len(), 1);
}

#[tokio::test]
async fn activation_keeps_both_current_caches() {
    let entry = |path: &str, body: &str| {
        let url = test_url(path);
        CacheEntry::from_response(&url, &Response::new(url.clone(), StatusCode::OK, body.to_string()))
    };
    let mut storage = CacheStorage::new();
    storage.put("covasol-v1", entry("/", "legacy")).unwrap();
    storage.put(DYNAMIC, entry("/dich-vu", "dynamic")).unwrap();
    storage.put(STATIC, entry("/assets/js/app.js", "static")).unwrap();

    let config = WorkerConfig {
        skip_waiting: false,
        ..config()
    };
    let (controller, _events) =
        OfflineController::new(config, site(), Box::new(storage)).unwrap();
    controller.install().await.unwrap();
    let report = controller.activate().await.unwrap();

    assert_eq!(report.deleted_caches, vec!["covasol-v1".to_string()]);
    let mut names = controller.cache_names().await.unwrap();
    names.sort();
    assert_eq!(names, vec![DYNAMIC.to_string(), STATIC.to_string()]);

    assert_eq!(
        controller.cache_keys(DYNAMIC).await.unwrap(),
        vec![test_url("/dich-vu").to_string()]
    );
    let static_keys = controller.cache_keys(STATIC).await.unwrap();
    assert!(static_keys.contains(&test_url("/assets/js/app.js").to_string()));
    assert!(static_keys.contains(&test_url("/assets/css/base.css").to_string()));
    assert!(controller
        .cache_match(test_url("/").as_str())
        .await
        .unwrap()
        .is_some_and(|e| e.body != b"legacy"));
}

#[tokio::test]
async fn reopened_database_serves_cached_page_offline() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("caches.db");
    let net = site();
    net.page("/dich-vu", "<h1>Dịch vụ</h1>");
    let request = Request::navigate(test_url("/dich-vu"));

    {
        let storage = SqliteCacheStorage::open(&db).unwrap();
        let (first, _events) =
            OfflineController::new(config(), net.clone(), Box::new(storage)).unwrap();
        assert!(!first.resume().await.unwrap());
        first.install().await.unwrap();
        first.handle_fetch(&request).await.unwrap();
    }

    net.set_offline(true);
    let storage = SqliteCacheStorage::open(&db).unwrap();
    let (second, _events) =
        OfflineController::new(config(), net.clone(), Box::new(storage)).unwrap();
    assert!(second.resume().await.unwrap());

    let outcome = second.handle_fetch(&request).await.unwrap();
    let answer = outcome.response().unwrap();
    assert_eq!(answer.source, ResponseSource::Cache);
    assert_eq!(answer.response.text(), "<h1>Dịch vụ</h1>");
}

#[tokio::test]
async fn contact_form_sync_is_acknowledged() {
    let net = site();
    let controller = installed(config(), &net).await;
    controller.register_sync(CONTACT_FORM_SYNC).await;

    assert_eq!(controller.handle_sync(CONTACT_FORM_SYNC).await, SyncOutcome::NoOp);
    assert_eq!(net.total_calls(), config().precache.len());
}
