//! TCP server: accept loop, per-connection pipeline and graceful shutdown.
//!
//! # Responsibilities
//! - Bind (or adopt) a listener and accept until shutdown
//! - Run each connection through idle wrap → TLS → identity → admission
//! - Hand the connection to the handler in its own tracked task
//! - Stop accepting on shutdown and wait, bounded, for in-flight handlers

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tower::BoxError;
use tracing::Instrument;

use crate::config::TcpServerConfig;
use crate::lifecycle::ShutdownSignal;
use crate::net::listener::{self, ListenerError};
use crate::net::tls::{self, HandshakeError, TlsError};
use crate::net::{is_idle_timeout, wrap_idle, BoxStream, ConnectionId, ConnectionTracker};
use crate::observability::metrics::{self, HandlerOutcome};
use crate::sync::Semaphore;
use crate::tcp::context::{ConnContext, PeerIdentity};

/// Errors that end a `serve` call.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid listen address {addr}: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shutdown timed out after {0:?} with connections still in flight")]
    ShutdownTimeout(Duration),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ListenerError> for ServerError {
    fn from(e: ListenerError) -> Self {
        match e {
            ListenerError::InvalidAddress { addr, source } => {
                ServerError::InvalidAddress { addr, source }
            }
            ListenerError::Bind { addr, source } => ServerError::Bind { addr, source },
        }
    }
}

/// Serves one accepted connection.
///
/// The handler owns the stream; dropping it closes the connection. It must
/// return promptly once [`ConnContext::cancelled`] resolves.
pub trait ConnHandler: Send + Sync + 'static {
    fn handle(&self, ctx: ConnContext, conn: BoxStream) -> BoxFuture<'static, Result<(), BoxError>>;
}

impl<F, Fut, E> ConnHandler for F
where
    F: Fn(ConnContext, BoxStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
    fn handle(&self, ctx: ConnContext, conn: BoxStream) -> BoxFuture<'static, Result<(), BoxError>> {
        let fut = self(ctx, conn);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}

/// Runtime options for a [`TcpServer`]. Zero durations disable the
/// corresponding timeout.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Listen address, `host:port`.
    pub addr: String,
    /// Serve TLS with this config when set.
    pub tls: Option<Arc<rustls::ServerConfig>>,
    /// Admission control: at most `capacity` handlers run at once.
    pub limiter: Option<Arc<Semaphore>>,
    pub idle_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Put the connection id into each handler's context.
    pub ctx_conn_id: bool,
    /// Put the TLS peer identity into each handler's context.
    pub ctx_tls_peer: bool,
    /// Tag attached to log events and metrics.
    pub tag: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:0".to_string(),
            tls: None,
            limiter: None,
            idle_timeout: Duration::ZERO,
            tls_handshake_timeout: Duration::ZERO,
            shutdown_timeout: Duration::ZERO,
            ctx_conn_id: false,
            ctx_tls_peer: false,
            tag: "tcp".to_string(),
        }
    }
}

impl ServerOptions {
    /// Build runtime options from configuration, loading TLS material.
    pub fn from_config(config: &TcpServerConfig) -> Result<Self, TlsError> {
        let tls = config
            .tls
            .as_ref()
            .map(tls::build_server_config)
            .transpose()?;
        let limiter = (config.limit > 0).then(|| Arc::new(Semaphore::new(config.limit)));

        Ok(Self {
            addr: config.bind_address.clone(),
            tls,
            limiter,
            idle_timeout: config.idle_timeout(),
            tls_handshake_timeout: config.tls_handshake_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            ctx_conn_id: config.ctx_conn_id,
            ctx_tls_peer: config.ctx_tls_peer,
            tag: config.tag.clone(),
        })
    }
}

/// A TCP (optionally TLS) server. Cheap to clone; clones share options and handler.
#[derive(Clone)]
pub struct TcpServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    options: ServerOptions,
    acceptor: Option<TlsAcceptor>,
    handler: Box<dyn ConnHandler>,
}

impl TcpServer {
    pub fn new(options: ServerOptions, handler: impl ConnHandler) -> Self {
        let acceptor = options.tls.clone().map(TlsAcceptor::from);
        Self {
            inner: Arc::new(ServerInner {
                options,
                acceptor,
                handler: Box::new(handler),
            }),
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.inner.options
    }

    /// Bind the configured address and serve until `shutdown` fires.
    ///
    /// Bind failures are returned immediately; the caller decides whether to
    /// retry (see [`crate::resilience::with_guard`]).
    pub async fn serve(&self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let listener = listener::bind(&self.inner.options.addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve an already bound listener until `shutdown` fires.
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let span = tracing::info_span!("tcp_server", tag = %self.inner.options.tag);
        self.accept_loop(listener, shutdown).instrument(span).await
    }

    async fn accept_loop(
        &self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        tracing::info!(
            address = %local_addr,
            tls = self.inner.acceptor.is_some(),
            "TCP server started"
        );

        let tracker = ConnectionTracker::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer, &tracker, &shutdown),
                    Err(e) => {
                        if !listener::pause_after_accept_error(&e, &shutdown).await {
                            break;
                        }
                    }
                },
            }
        }

        drop(listener);
        tracing::info!(in_flight = tracker.active_count(), "TCP server shutting down");
        self.wait_for_connections(&tracker).await
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        tracker: &ConnectionTracker,
        shutdown: &ShutdownSignal,
    ) {
        let guard = tracker.track();
        let conn_id = ConnectionId::new();
        let span = tracing::info_span!("conn", id = %conn_id, peer = %peer);
        let inner = Arc::clone(&self.inner);
        let shutdown = shutdown.clone();

        tokio::spawn(
            async move {
                inner.serve_connection(stream, peer, conn_id, shutdown).await;
                drop(guard);
            }
            .instrument(span),
        );
    }

    async fn wait_for_connections(&self, tracker: &ConnectionTracker) -> Result<(), ServerError> {
        let timeout = self.inner.options.shutdown_timeout;
        if timeout.is_zero() {
            tracker.wait_idle().await;
        } else if tokio::time::timeout(timeout, tracker.wait_idle()).await.is_err() {
            tracing::warn!(
                in_flight = tracker.active_count(),
                timeout = ?timeout,
                "Shutdown timed out"
            );
            return Err(ServerError::ShutdownTimeout(timeout));
        }

        tracing::info!("TCP server stopped");
        Ok(())
    }
}

impl ServerInner {
    async fn serve_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        conn_id: ConnectionId,
        shutdown: ShutdownSignal,
    ) {
        let opts = &self.options;
        metrics::record_connection_accepted(&opts.tag);
        tracing::debug!("Connection accepted");

        let conn = wrap_idle(Box::new(stream), opts.idle_timeout);

        let mut tls_peer = None;
        let conn: BoxStream = match &self.acceptor {
            None => conn,
            Some(acceptor) => {
                match tls::accept(acceptor, conn, opts.tls_handshake_timeout, &shutdown).await {
                    Ok(tls_stream) => {
                        if opts.ctx_tls_peer {
                            let names = tls_stream
                                .get_ref()
                                .1
                                .peer_certificates()
                                .map(|certs| tls::peer_names(certs))
                                .unwrap_or_default();
                            if !names.is_empty() {
                                tls_peer = Some(PeerIdentity::new(names));
                            }
                        }
                        Box::new(tls_stream)
                    }
                    Err(HandshakeError::Cancelled) => {
                        tracing::debug!("TLS handshake abandoned on shutdown");
                        return;
                    }
                    Err(e) => {
                        metrics::record_tls_handshake_failure(&opts.tag);
                        tracing::error!(error = %e, "TLS handshake failed");
                        return;
                    }
                }
            }
        };

        let ctx = ConnContext::new(
            shutdown.clone(),
            peer,
            opts.ctx_conn_id.then_some(conn_id),
            tls_peer,
        );

        let _permit = match &opts.limiter {
            None => None,
            Some(limiter) => match Arc::clone(limiter).acquire_owned(&shutdown).await {
                Ok(permit) => Some(permit),
                Err(e) => {
                    metrics::record_admission_cancelled(&opts.tag);
                    tracing::debug!(error = %e, "Connection dropped while waiting for admission");
                    return;
                }
            },
        };

        metrics::record_connection_opened(&opts.tag);
        let res = self.handler.handle(ctx, conn).await;
        metrics::record_connection_closed(&opts.tag);

        match res {
            Ok(()) => {
                metrics::record_handler_outcome(&opts.tag, HandlerOutcome::Ok);
                tracing::info!("Connection closed");
            }
            Err(e) if is_idle_timeout(e.as_ref()) => {
                metrics::record_handler_outcome(&opts.tag, HandlerOutcome::IdleTimeout);
                tracing::warn!(error = %e, "Connection idle timeout");
            }
            Err(e) => {
                metrics::record_handler_outcome(&opts.tag, HandlerOutcome::Error);
                tracing::error!(error = %e, "Connection handler failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn echo(_ctx: ConnContext, mut conn: BoxStream) -> std::io::Result<()> {
        let mut buf = [0u8; 64];
        loop {
            let n = conn.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            conn.write_all(&buf[..n]).await?;
        }
    }

    #[tokio::test]
    async fn serves_until_shutdown() {
        let shutdown = Shutdown::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = TcpServer::new(ServerOptions::default(), echo);
        let task = tokio::spawn({
            let signal = shutdown.subscribe();
            async move { server.serve_on(listener, signal).await }
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        drop(client);

        shutdown.trigger();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bind_failure_is_returned() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let options = ServerOptions {
            addr: taken.local_addr().unwrap().to_string(),
            ..Default::default()
        };

        let shutdown = Shutdown::new();
        let err = TcpServer::new(options, echo)
            .serve(shutdown.subscribe())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[test]
    fn options_from_default_config() {
        let options = ServerOptions::from_config(&TcpServerConfig::default()).unwrap();
        assert!(options.tls.is_none());
        assert!(options.limiter.is_none());
        assert_eq!(options.shutdown_timeout, Duration::from_secs(30));

        let limited = TcpServerConfig {
            limit: 3,
            ..Default::default()
        };
        let options = ServerOptions::from_config(&limited).unwrap();
        assert_eq!(options.limiter.map(|l| l.capacity()), Some(3));
    }
}
