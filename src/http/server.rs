//! HTTP server over TCP.
//!
//! # Responsibilities
//! - Wrap the caller's Axum Router with admission control and request tracing
//! - Serve HTTP/1.1 and HTTP/2, optionally over rustls
//! - On shutdown stop accepting and drain in-flight requests, waiting at most
//!   `shutdown_timeout`. Requests still running after it are left to finish
//!   on their own; they are never aborted.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::HttpServerConfig;
use crate::http::limit::apply_limit;
use crate::lifecycle::ShutdownSignal;
use crate::net::listener;
use crate::net::tls::{self, TlsError};
use crate::resilience::run_with_timeout;
use crate::sync::Semaphore;
use crate::tcp::ServerError;

/// Runtime options for an [`HttpServer`].
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Listen address, `host:port`.
    pub addr: String,
    pub tls: Option<Arc<rustls::ServerConfig>>,
    /// At most `capacity` requests reach the router at once.
    pub limiter: Option<Arc<Semaphore>>,
    /// Drain bound on shutdown. Zero waits for every request.
    pub shutdown_timeout: Duration,
    pub tag: String,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:0".to_string(),
            tls: None,
            limiter: None,
            shutdown_timeout: Duration::ZERO,
            tag: "http".to_string(),
        }
    }
}

impl HttpOptions {
    pub fn from_config(config: &HttpServerConfig) -> Result<Self, TlsError> {
        let tls = config
            .tls
            .as_ref()
            .map(tls::build_server_config)
            .transpose()?;
        Ok(Self {
            addr: config.bind_address.clone(),
            tls,
            limiter: (config.limit > 0).then(|| Arc::new(Semaphore::new(config.limit))),
            shutdown_timeout: config.shutdown_timeout(),
            tag: config.tag.clone(),
        })
    }
}

/// HTTP server for a caller-supplied router.
#[derive(Clone)]
pub struct HttpServer {
    options: HttpOptions,
    router: Router,
}

impl HttpServer {
    pub fn new(options: HttpOptions, router: Router) -> Self {
        Self { options, router }
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn serve(&self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let listener = listener::bind_std(&self.options.addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve an already bound, non-blocking listener until `shutdown` fires.
    pub async fn serve_on(
        &self,
        listener: std::net::TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let span = tracing::info_span!("http_server", tag = %self.options.tag);
        self.run(listener, shutdown).instrument(span).await
    }

    async fn run(
        &self,
        listener: std::net::TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        let app = apply_limit(
            self.router.clone(),
            self.options.limiter.clone(),
            shutdown.clone(),
        )
        .layer(TraceLayer::new_for_http())
        .into_make_service_with_connect_info::<SocketAddr>();

        let handle = Handle::new();

        tracing::info!(
            address = %local_addr,
            tls = self.options.tls.is_some(),
            "HTTP server started"
        );

        let tls = self.options.tls.clone();
        let serve_handle = handle.clone();
        let serve = async move {
            match tls {
                Some(config) => {
                    let mut config = rustls::ServerConfig::clone(&config);
                    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
                    axum_server::from_tcp_rustls(listener, RustlsConfig::from_config(Arc::new(config)))
                        .handle(serve_handle)
                        .serve(app)
                        .await
                }
                None => axum_server::from_tcp(listener).handle(serve_handle).serve(app).await,
            }
        };
        tokio::pin!(serve);

        let served = tokio::select! {
            res = &mut serve => res,
            _ = shutdown.cancelled() => {
                tracing::info!(
                    in_flight = handle.connection_count(),
                    "HTTP server shutting down"
                );
                handle.graceful_shutdown(None);
                match run_with_timeout(self.options.shutdown_timeout, &mut serve).await {
                    Ok(res) => res,
                    Err(_) => {
                        tracing::warn!(
                            timeout = ?self.options.shutdown_timeout,
                            in_flight = handle.connection_count(),
                            "Shutdown timed out with requests still in flight"
                        );
                        Ok(())
                    }
                }
            }
        };
        served?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
