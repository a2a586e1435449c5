//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use secure_net::config::{ClientAuthMode, TlsConfig};
use secure_net::lifecycle::ShutdownSignal;
use secure_net::net::tls::{build_server_config, load_certs, load_private_key};
use secure_net::net::BoxStream;
use secure_net::tcp::{ConnContext, ConnHandler, ServerError, ServerOptions, TcpServer};

/// Route server logs to the test harness. Safe to call from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secure_net=debug".into()),
        )
        .try_init();
}

pub fn testdata(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/testdata")
        .join(name)
}

/// Server TLS config for `DM-S`, verifying clients against the test CA.
pub fn server_tls(client_auth: ClientAuthMode) -> Arc<rustls::ServerConfig> {
    let ca = (client_auth != ClientAuthMode::None).then(|| testdata("ca.crt"));
    build_server_config(&TlsConfig {
        cert_path: testdata("server.crt"),
        key_path: testdata("server.key"),
        client_auth,
        client_ca_path: ca,
    })
    .expect("server TLS config")
}

/// Client TLS connector trusting the test CA, presenting `identity`
/// (`"client"` or `"rogue-client"`) when given.
pub fn client_tls(identity: Option<&str>) -> TlsConnector {
    let mut roots = RootCertStore::empty();
    for ca in load_certs(&testdata("ca.crt")).unwrap() {
        roots.add(ca).unwrap();
    }

    let builder = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots);

    let config = match identity {
        Some(name) => {
            let certs = load_certs(&testdata(&format!("{}.crt", name))).unwrap();
            let key = load_private_key(&testdata(&format!("{}.key", name))).unwrap();
            builder.with_client_auth_cert(certs, key).unwrap()
        }
        None => builder.with_no_client_auth(),
    };
    TlsConnector::from(Arc::new(config))
}

pub async fn connect_tls(
    connector: &TlsConnector,
    addr: SocketAddr,
) -> std::io::Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect(addr).await?;
    let name = ServerName::try_from("localhost").unwrap();
    connector.connect(name, tcp).await
}

/// Start a TCP server on an ephemeral port.
pub async fn start_tcp(
    options: ServerOptions,
    handler: impl ConnHandler,
    shutdown: ShutdownSignal,
) -> (SocketAddr, JoinHandle<Result<(), ServerError>>) {
    init_test_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = TcpServer::new(options, handler);
    let task = tokio::spawn(async move { server.serve_on(listener, shutdown).await });
    (addr, task)
}

/// Echo until the client closes.
pub async fn echo(_ctx: ConnContext, mut conn: BoxStream) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        conn.write_all(&buf[..n]).await?;
    }
}

/// Send `msg` and read the same number of bytes back.
pub async fn round_trip<S>(conn: &mut S, msg: &[u8]) -> std::io::Result<Vec<u8>>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    conn.write_all(msg).await?;
    let mut buf = vec![0u8; msg.len()];
    conn.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Wait for `task` with a deadline, failing the test if it does not finish.
pub async fn join_within<T>(task: JoinHandle<T>, limit: Duration) -> T {
    tokio::time::timeout(limit, task)
        .await
        .expect("task did not finish in time")
        .expect("task panicked")
}
