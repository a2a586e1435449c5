//! HTTP server and client over Unix domain sockets.
//!
//! # Responsibilities
//! - Remove a stale socket file, bind, and apply permission bits
//! - Serve the caller's router with the same admission control as TCP
//! - Drain on shutdown, bounded by `shutdown_timeout`, then remove the socket file
//! - Issue HTTP/1.1 requests to a socket path, one connection per request

use std::future::IntoFuture;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use hyper_util::rt::TokioIo;
use tokio::net::{UnixListener, UnixStream};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::UdsServerConfig;
use crate::http::limit::apply_limit;
use crate::lifecycle::ShutdownSignal;
use crate::resilience::run_with_timeout;
use crate::sync::Semaphore;
use crate::tcp::ServerError;

/// Runtime options for a [`UdsServer`].
#[derive(Debug, Clone)]
pub struct UdsOptions {
    /// Socket file path.
    pub path: PathBuf,
    /// Permission bits applied after binding.
    pub mode: Option<u32>,
    pub limiter: Option<Arc<Semaphore>>,
    /// Drain bound on shutdown. Zero waits for every request.
    pub shutdown_timeout: Duration,
    pub tag: String,
}

impl UdsOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: None,
            limiter: None,
            shutdown_timeout: Duration::ZERO,
            tag: "uds".to_string(),
        }
    }

    pub fn from_config(config: &UdsServerConfig) -> Self {
        Self {
            path: config.path.clone(),
            mode: config.mode,
            limiter: (config.limit > 0).then(|| Arc::new(Semaphore::new(config.limit))),
            shutdown_timeout: config.shutdown_timeout(),
            tag: config.tag.clone(),
        }
    }
}

/// HTTP server on a Unix domain socket.
#[derive(Clone)]
pub struct UdsServer {
    options: UdsOptions,
    router: Router,
}

impl UdsServer {
    pub fn new(options: UdsOptions, router: Router) -> Self {
        Self { options, router }
    }

    /// Bind the socket and serve until `shutdown` fires.
    pub async fn serve(&self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let span = tracing::info_span!("uds_server", tag = %self.options.tag);
        self.run(shutdown).instrument(span).await
    }

    async fn run(&self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let path = &self.options.path;
        remove_stale(path);

        let listener = UnixListener::bind(path).map_err(|source| ServerError::Bind {
            addr: path.display().to_string(),
            source,
        })?;
        let _socket_file = SocketFile(path.clone());

        if let Some(mode) = self.options.mode {
            apply_mode(path, mode);
        }
        tracing::info!(path = %path.display(), "UDS server started");

        let app = apply_limit(
            self.router.clone(),
            self.options.limiter.clone(),
            shutdown.clone(),
        )
        .layer(TraceLayer::new_for_http());

        let signal = shutdown.clone();
        let serve = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .into_future();
        tokio::pin!(serve);

        tokio::select! {
            res = &mut serve => res?,
            _ = shutdown.cancelled() => {
                tracing::info!("UDS server shutting down");
                match run_with_timeout(self.options.shutdown_timeout, &mut serve).await {
                    Ok(res) => res?,
                    Err(_) => tracing::warn!(
                        timeout = ?self.options.shutdown_timeout,
                        "Shutdown timed out with requests still in flight"
                    ),
                }
            }
        }

        tracing::info!("UDS server stopped");
        Ok(())
    }
}

/// Set permission bits on the socket file. Failure is logged, not fatal.
fn apply_mode(path: &Path, mode: u32) -> bool {
    match std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                error = %e,
                mode = %format!("{:o}", mode),
                "Failed to set socket permissions"
            );
            false
        }
    }
}

fn remove_stale(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed stale socket file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "Failed to remove stale socket file"),
    }
}

/// Removes the socket file when the server exits.
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Errors from [`UdsClient`].
#[derive(Debug, thiserror::Error)]
pub enum UdsClientError {
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] axum::http::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),
}

/// HTTP/1.1 client for a Unix domain socket. Opens one connection per request.
#[derive(Debug, Clone)]
pub struct UdsClient {
    path: PathBuf,
}

impl UdsClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn send(&self, req: Request<Body>) -> Result<Response<Body>, UdsClientError> {
        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(|source| UdsClientError::Connect {
                path: self.path.clone(),
                source,
            })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "UDS client connection closed with error");
            }
        });

        let res = sender.send_request(req).await?;
        Ok(res.map(Body::new))
    }

    /// `GET` a path (e.g., "/health").
    pub async fn get(&self, path: &str) -> Result<Response<Body>, UdsClientError> {
        let req = Request::builder()
            .uri(path)
            .header(axum::http::header::HOST, "localhost")
            .body(Body::empty())?;
        self.send(req).await
    }
}
