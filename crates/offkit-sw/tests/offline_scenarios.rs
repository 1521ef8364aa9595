//! Fetch handling against a scripted network.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{init, url, worker, FakeNetwork, RecordingStorage};
use http::StatusCode;
use offkit_net::Request;
use offkit_sw::{
    CacheWorker, FetchDisposition, FetchResponse, ResponseSource, ServiceWorkerError,
};

async fn respond(worker: &CacheWorker, request: Request) -> Result<FetchResponse, ServiceWorkerError> {
    match worker.handle_fetch(request) {
        FetchDisposition::RespondWith(future) => future.await,
        FetchDisposition::Passthrough => panic!("request was not intercepted"),
    }
}

async fn installed(
    storage: &Arc<RecordingStorage>,
    network: &Arc<FakeNetwork>,
) -> CacheWorker {
    init();
    let worker = worker("v1", storage, network);
    worker.install().await.unwrap();
    worker
}

#[tokio::test]
async fn immutable_asset_is_fetched_once() {
    let storage = RecordingStorage::new();
    let network = FakeNetwork::new();
    network.route("/assets/app.ab12cd.js", "console.log(1)");
    let worker = installed(&storage, &network).await;

    let first = respond(&worker, Request::get(url("/assets/app.ab12cd.js")))
        .await
        .unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    let writes_after_first = storage.writes();

    let second = respond(&worker, Request::get(url("/assets/app.ab12cd.js")))
        .await
        .unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.text().unwrap(), "console.log(1)");

    assert_eq!(network.calls_to("/assets/app.ab12cd.js"), 1);
    assert_eq!(storage.writes(), writes_after_first);
}

#[tokio::test]
async fn cached_asset_is_served_offline() {
    let storage = RecordingStorage::new();
    let network = FakeNetwork::new();
    network.route("/assets/logo.9f8e.svg", "<svg/>");
    let worker = installed(&storage, &network).await;

    respond(&worker, Request::get(url("/assets/logo.9f8e.svg")))
        .await
        .unwrap();
    network.set_online(false);

    let response = respond(&worker, Request::get(url("/assets/logo.9f8e.svg")))
        .await
        .unwrap();
    assert_eq!(response.response.text().unwrap(), "<svg/>");
}

#[tokio::test]
async fn unseen_asset_fails_offline() {
    let storage = RecordingStorage::new();
    let network = FakeNetwork::new();
    let worker = installed(&storage, &network).await;
    network.set_online(false);

    let err = respond(&worker, Request::get(url("/assets/chart.77aa.js")))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceWorkerError::Network(_)));
}

#[tokio::test]
async fn offline_navigation_serves_shell() {
    let storage = RecordingStorage::new();
    let network = FakeNetwork::new();
    let worker = installed(&storage, &network).await;
    network.set_online(false);

    let response = respond(&worker, Request::navigate(url("/")))
        .await
        .unwrap();
    assert_eq!(response.source, ResponseSource::Fallback);
    assert_eq!(response.response.status, StatusCode::OK);
    assert_eq!(response.response.text().unwrap(), "<html>shell</html>");

    let deep_link = respond(&worker, Request::navigate(url("/reports/q3")))
        .await
        .unwrap();
    assert_eq!(deep_link.response.text().unwrap(), "<html>shell</html>");
}

#[tokio::test]
async fn online_navigation_is_fresh_and_cached() {
    let storage = RecordingStorage::new();
    let network = FakeNetwork::new();
    network.route("/reports", "<html>reports v1</html>");
    let worker = installed(&storage, &network).await;

    network.route("/reports", "<html>reports v2</html>");
    let response = respond(&worker, Request::navigate(url("/reports")))
        .await
        .unwrap();

    assert_eq!(response.source, ResponseSource::Network);
    assert_eq!(response.response.text().unwrap(), "<html>reports v2</html>");
    assert_eq!(
        storage.body(worker.store_id(), "/reports").await.as_deref(),
        Some("<html>reports v2</html>")
    );
}

#[tokio::test]
async fn navigation_error_status_is_not_a_network_failure() {
    let storage = RecordingStorage::new();
    let network = FakeNetwork::new();
    network.route_status("/broken", StatusCode::INTERNAL_SERVER_ERROR, "oops");
    let worker = installed(&storage, &network).await;

    let response = respond(&worker, Request::navigate(url("/broken")))
        .await
        .unwrap();

    assert_eq!(response.source, ResponseSource::Network);
    assert_eq!(response.response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(storage.body(worker.store_id(), "/broken").await.is_none());
}

#[tokio::test]
async fn stale_while_revalidate_serves_old_payload_then_updates() {
    let storage = RecordingStorage::new();
    let network = FakeNetwork::new();
    network.route("/api/widgets", r#"[{"id":1}]"#);
    let worker = installed(&storage, &network).await;

    let first = respond(&worker, Request::get(url("/api/widgets")))
        .await
        .unwrap();
    assert_eq!(first.source, ResponseSource::Network);

    network.route("/api/widgets", r#"[{"id":1},{"id":2}]"#);
    network.hold();

    let second = respond(&worker, Request::get(url("/api/widgets")))
        .await
        .unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.text().unwrap(), r#"[{"id":1}]"#);
    assert_eq!(
        storage.body(worker.store_id(), "/api/widgets").await.as_deref(),
        Some(r#"[{"id":1}]"#)
    );

    network.release();
    worker.settle().await;

    assert_eq!(
        storage.body(worker.store_id(), "/api/widgets").await.as_deref(),
        Some(r#"[{"id":1},{"id":2}]"#)
    );
    assert_eq!(network.calls_to("/api/widgets"), 2);
}

#[tokio::test]
async fn stale_while_revalidate_hit_survives_offline() {
    let storage = RecordingStorage::new();
    let network = FakeNetwork::new();
    network.route("/api/profile", r#"{"name":"ada"}"#);
    let worker = installed(&storage, &network).await;

    respond(&worker, Request::get(url("/api/profile")))
        .await
        .unwrap();
    network.set_online(false);

    let response = respond(&worker, Request::get(url("/api/profile")))
        .await
        .unwrap();
    worker.settle().await;

    assert_eq!(response.response.text().unwrap(), r#"{"name":"ada"}"#);
    assert_eq!(
        storage.body(worker.store_id(), "/api/profile").await.as_deref(),
        Some(r#"{"name":"ada"}"#)
    );
}

#[tokio::test]
async fn stale_while_revalidate_miss_waits_for_network() {
    let storage = RecordingStorage::new();
    let network = FakeNetwork::new();
    network.route("/api/stats", "42");
    let worker = installed(&storage, &network).await;

    let response = respond(&worker, Request::get(url("/api/stats")))
        .await
        .unwrap();
    assert_eq!(response.source, ResponseSource::Network);
    assert_eq!(response.response.text().unwrap(), "42");

    network.set_online(false);
    let err = respond(&worker, Request::get(url("/api/other")))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceWorkerError::Network(_)));
}

#[tokio::test]
async fn concurrent_requests_for_one_key_all_resolve() {
    let storage = RecordingStorage::new();
    let network = FakeNetwork::new();
    network.route("/api/widgets", "[]");
    let worker = Arc::new(installed(&storage, &network).await);

    let mut pending = Vec::new();
    for _ in 0..8 {
        let worker = Arc::clone(&worker);
        pending.push(tokio::spawn(async move {
            respond(&worker, Request::get(url("/api/widgets"))).await
        }));
    }
    for handle in pending {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.response.text().unwrap(), "[]");
    }
    worker.settle().await;

    assert_eq!(
        storage.body(worker.store_id(), "/api/widgets").await.as_deref(),
        Some("[]")
    );
}

#[tokio::test]
async fn excluded_requests_never_touch_the_store() {
    let storage = RecordingStorage::new();
    let network = FakeNetwork::new();
    let worker = installed(&storage, &network).await;
    let (reads, writes) = (storage.reads(), storage.writes());

    let post = Request::post(url("/api/widgets"), r#"{"name":"new"}"#);
    let foreign_asset =
        Request::get(url::Url::parse("https://cdn.other.test/assets/lib.js").unwrap());
    let foreign_page = Request::navigate(url::Url::parse("https://docs.other.test/").unwrap());

    for request in [post, foreign_asset, foreign_page] {
        assert!(worker.handle_fetch(request).is_passthrough());
    }

    assert_eq!(storage.reads(), reads);
    assert_eq!(storage.writes(), writes);
}

#[tokio::test]
async fn write_failure_does_not_fail_the_response() {
    init();
    // the shell fills the store to its quota
    let storage = RecordingStorage::with_max_entries(3);
    let network = FakeNetwork::new();
    network.route("/assets/app.ab12cd.js", "console.log(1)");
    let worker = worker("v1", &storage, &network);
    worker.install().await.unwrap();

    let response = respond(&worker, Request::get(url("/assets/app.ab12cd.js")))
        .await
        .unwrap();

    assert_eq!(response.response.text().unwrap(), "console.log(1)");
    assert!(storage.body(worker.store_id(), "/assets/app.ab12cd.js").await.is_none());
}

#[tokio::test]
async fn aborted_response_reports_cancellation() {
    let storage = RecordingStorage::new();
    let network = FakeNetwork::new();
    let worker = installed(&storage, &network).await;
    network.hold();

    let FetchDisposition::RespondWith(future) =
        worker.handle_fetch(Request::navigate(url("/settings")))
    else {
        panic!("navigation was not intercepted");
    };
    future.abort();

    assert!(matches!(future.await, Err(ServiceWorkerError::Aborted(_))));
    network.release();
}

#[tokio::test]
async fn abandoned_settle_does_not_cancel_a_pending_response() {
    let storage = RecordingStorage::new();
    let network = FakeNetwork::new();
    network.route("/api/stats", "42");
    let worker = installed(&storage, &network).await;
    network.hold();

    let FetchDisposition::RespondWith(future) =
        worker.handle_fetch(Request::get(url("/api/stats")))
    else {
        panic!("request was not intercepted");
    };
    let pending = tokio::spawn(future);

    let settled = tokio::time::timeout(Duration::from_millis(20), worker.settle()).await;
    assert!(settled.is_ok());
    network.release();

    let response = pending.await.unwrap().unwrap();
    assert_eq!(response.source, ResponseSource::Network);
    assert_eq!(response.response.text().unwrap(), "42");
}

#[tokio::test]
async fn every_settle_caller_waits_for_revalidation() {
    let storage = RecordingStorage::new();
    let network = FakeNetwork::new();
    network.route("/api/widgets", "old");
    let worker = Arc::new(installed(&storage, &network).await);

    respond(&worker, Request::get(url("/api/widgets")))
        .await
        .unwrap();
    network.route("/api/widgets", "new");
    network.hold();
    let stale = respond(&worker, Request::get(url("/api/widgets")))
        .await
        .unwrap();
    assert_eq!(stale.response.text().unwrap(), "old");

    let first = tokio::spawn({
        let worker = Arc::clone(&worker);
        async move { worker.settle().await }
    });
    let second = tokio::time::timeout(Duration::from_millis(50), worker.settle()).await;
    assert!(second.is_err());

    network.release();
    first.await.unwrap();
    worker.settle().await;

    assert_eq!(
        storage.body(worker.store_id(), "/api/widgets").await.as_deref(),
        Some("new")
    );
}
