//! HTTP-over-UDS server and client integration tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::task::JoinHandle;

use secure_net::http::{UdsClient, UdsOptions, UdsServer};
use secure_net::lifecycle::Shutdown;
use secure_net::sync::Semaphore;
use secure_net::tcp::ServerError;

mod common;

fn status_router() -> Router {
    Router::new().route("/health", get(|| async { "ok" }))
}

#[derive(Default)]
struct Concurrency {
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// `/health` plus a `/slow` route that holds each request for `hold`.
fn slow_router(stats: Arc<Concurrency>, hold: Duration) -> Router {
    status_router().route(
        "/slow",
        get(move || {
            let stats = Arc::clone(&stats);
            async move {
                let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
                stats.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(hold).await;
                stats.active.fetch_sub(1, Ordering::SeqCst);
                "done"
            }
        }),
    )
}

async fn start_uds(
    options: UdsOptions,
    shutdown: &Shutdown,
) -> (UdsClient, JoinHandle<Result<(), ServerError>>) {
    start_uds_with(options, status_router(), shutdown).await
}

async fn start_uds_with(
    options: UdsOptions,
    router: Router,
    shutdown: &Shutdown,
) -> (UdsClient, JoinHandle<Result<(), ServerError>>) {
    common::init_test_logging();
    let path = options.path.clone();
    let server = UdsServer::new(options, router);
    let signal = shutdown.subscribe();
    let task = tokio::spawn(async move { server.serve(signal).await });

    let client = UdsClient::new(&path);
    wait_until_serving(&client).await;
    (client, task)
}

async fn wait_until_serving(client: &UdsClient) {
    for _ in 0..100 {
        if client.get("/health").await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("UDS server did not come up");
}

fn socket_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("server.sock")
}

async fn body_text(res: axum::http::Response<axum::body::Body>) -> String {
    let bytes = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn serves_over_unix_socket_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir);
    let shutdown = Shutdown::new();

    let (client, server) = start_uds(UdsOptions::new(&path), &shutdown).await;

    let res = client.get("/health").await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_text(res).await, "ok");

    let missing = client.get("/missing").await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    shutdown.trigger();
    common::join_within(server, Duration::from_secs(2))
        .await
        .unwrap();
    assert!(!path.exists(), "socket file removed on exit");
    assert!(client.get("/health").await.is_err());
}

#[tokio::test]
async fn applies_socket_permissions() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir);
    let shutdown = Shutdown::new();

    let options = UdsOptions {
        mode: Some(0o600),
        ..UdsOptions::new(&path)
    };
    let (_client, server) = start_uds(options, &shutdown).await;

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    shutdown.trigger();
    common::join_within(server, Duration::from_secs(2))
        .await
        .unwrap();
}

#[tokio::test]
async fn replaces_stale_socket_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir);
    std::fs::write(&path, b"left over").unwrap();

    let shutdown = Shutdown::new();
    let (client, server) = start_uds(UdsOptions::new(&path), &shutdown).await;
    assert_eq!(client.get("/health").await.unwrap().status(), StatusCode::OK);

    shutdown.trigger();
    common::join_within(server, Duration::from_secs(2))
        .await
        .unwrap();
}

#[tokio::test]
async fn bind_failure_is_reported() {
    let shutdown = Shutdown::new();
    let server = UdsServer::new(
        UdsOptions::new(Path::new("/nonexistent-dir/for/sure/server.sock")),
        status_router(),
    );
    let err = server.serve(shutdown.subscribe()).await.unwrap_err();
    assert!(matches!(err, ServerError::Bind { .. }), "got {err:?}");
}

#[tokio::test]
async fn client_reports_missing_socket() {
    let dir = tempfile::tempdir().unwrap();
    let client = UdsClient::new(socket_path(&dir));
    assert!(matches!(
        client.get("/health").await,
        Err(secure_net::http::UdsClientError::Connect { .. })
    ));
}

#[tokio::test]
async fn limiter_serializes_requests() {
    let dir = tempfile::tempdir().unwrap();
    let shutdown = Shutdown::new();
    let stats = Arc::new(Concurrency::default());
    let options = UdsOptions {
        limiter: Some(Arc::new(Semaphore::new(1))),
        ..UdsOptions::new(socket_path(&dir))
    };
    let (client, server) = start_uds_with(
        options,
        slow_router(Arc::clone(&stats), Duration::from_millis(100)),
        &shutdown,
    )
    .await;

    let requests = (0..3).map(|_| {
        let client = client.clone();
        tokio::spawn(async move { client.get("/slow").await.unwrap().status() })
    });
    for status in futures_util::future::join_all(requests).await {
        assert_eq!(status.unwrap(), StatusCode::OK);
    }
    assert_eq!(stats.peak.load(Ordering::SeqCst), 1);

    shutdown.trigger();
    common::join_within(server, Duration::from_secs(2))
        .await
        .unwrap();
}

#[tokio::test]
async fn drain_bound_leaves_slow_handlers_running() {
    let dir = tempfile::tempdir().unwrap();
    let shutdown = Shutdown::new();
    let stats = Arc::new(Concurrency::default());
    let options = UdsOptions {
        shutdown_timeout: Duration::from_millis(100),
        ..UdsOptions::new(socket_path(&dir))
    };
    let (client, server) = start_uds_with(
        options,
        slow_router(Arc::clone(&stats), Duration::from_millis(400)),
        &shutdown,
    )
    .await;

    let request = {
        let client = client.clone();
        tokio::spawn(async move { client.get("/slow").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stats.active.load(Ordering::SeqCst), 1);

    let started = std::time::Instant::now();
    shutdown.trigger();
    common::join_within(server, Duration::from_secs(2))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(300));
    assert_eq!(stats.active.load(Ordering::SeqCst), 1, "handler still running");

    let res = request.await.unwrap().unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_text(res).await, "done");
    assert_eq!(stats.active.load(Ordering::SeqCst), 0);
}
