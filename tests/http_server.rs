//! HTTP-over-TCP server integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use reqwest::StatusCode;
use tokio::task::JoinHandle;

use secure_net::config::ClientAuthMode;
use secure_net::http::{HttpOptions, HttpServer};
use secure_net::lifecycle::Shutdown;
use secure_net::sync::Semaphore;
use secure_net::tcp::ServerError;

mod common;

async fn start_http(
    options: HttpOptions,
    router: Router,
    shutdown: &Shutdown,
) -> (SocketAddr, JoinHandle<Result<(), ServerError>>) {
    common::init_test_logging();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    let server = HttpServer::new(options, router);
    let signal = shutdown.subscribe();
    let task = tokio::spawn(async move { server.serve_on(listener, signal).await });
    (addr, task)
}

fn hello_router() -> Router {
    Router::new().route("/hello", get(|| async { "world" }))
}

#[tokio::test]
async fn serves_plain_http() {
    let shutdown = Shutdown::new();
    let (addr, server) = start_http(HttpOptions::default(), hello_router(), &shutdown).await;

    let res = reqwest::get(format!("http://{}/hello", addr)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "world");

    let missing = reqwest::get(format!("http://{}/nope", addr)).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    shutdown.trigger();
    common::join_within(server, Duration::from_secs(2))
        .await
        .unwrap();
}

#[tokio::test]
async fn serves_https() {
    let shutdown = Shutdown::new();
    let options = HttpOptions {
        tls: Some(common::server_tls(ClientAuthMode::None)),
        ..Default::default()
    };
    let (addr, server) = start_http(options, hello_router(), &shutdown).await;

    let ca = std::fs::read(common::testdata("ca.crt")).unwrap();
    let client = reqwest::Client::builder()
        .add_root_certificate(reqwest::Certificate::from_pem(&ca).unwrap())
        .build()
        .unwrap();

    let res = client
        .get(format!("https://localhost:{}/hello", addr.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "world");

    shutdown.trigger();
    common::join_within(server, Duration::from_secs(2))
        .await
        .unwrap();
}

#[derive(Default)]
struct Concurrency {
    active: AtomicUsize,
    peak: AtomicUsize,
}

fn slow_router(stats: Arc<Concurrency>, hold: Duration) -> Router {
    Router::new().route(
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

#[tokio::test]
async fn limiter_serializes_requests() {
    let shutdown = Shutdown::new();
    let stats = Arc::new(Concurrency::default());
    let options = HttpOptions {
        limiter: Some(Arc::new(Semaphore::new(1))),
        ..Default::default()
    };
    let (addr, server) = start_http(
        options,
        slow_router(Arc::clone(&stats), Duration::from_millis(100)),
        &shutdown,
    )
    .await;

    let url = format!("http://{}/slow", addr);
    let requests = (0..3).map(|_| {
        let url = url.clone();
        tokio::spawn(async move { reqwest::get(url).await.unwrap().status() })
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
async fn waiting_request_gets_503_on_shutdown() {
    let shutdown = Shutdown::new();
    let stats = Arc::new(Concurrency::default());
    let limiter = Arc::new(Semaphore::new(1));
    let options = HttpOptions {
        limiter: Some(Arc::clone(&limiter)),
        shutdown_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let (addr, server) = start_http(
        options,
        slow_router(Arc::clone(&stats), Duration::from_millis(300)),
        &shutdown,
    )
    .await;

    let url = format!("http://{}/slow", addr);
    let first = tokio::spawn(reqwest::get(url.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = tokio::spawn(reqwest::get(url));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(limiter.available(), 0);

    shutdown.trigger();

    let second = second.await.unwrap().unwrap();
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(second.bytes().await.unwrap().is_empty());

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    common::join_within(server, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(stats.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn drain_bound_leaves_slow_handlers_running() {
    let shutdown = Shutdown::new();
    let stats = Arc::new(Concurrency::default());
    let options = HttpOptions {
        shutdown_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let (addr, server) = start_http(
        options,
        slow_router(Arc::clone(&stats), Duration::from_millis(400)),
        &shutdown,
    )
    .await;

    let request = tokio::spawn(reqwest::get(format!("http://{}/slow", addr)));
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
    assert_eq!(res.text().await.unwrap(), "done");
    assert_eq!(stats.active.load(Ordering::SeqCst), 0);
}
