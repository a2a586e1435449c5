//! TCP readiness endpoint.
//!
//! Answers connectivity checks only: every accepted connection is closed
//! immediately, nothing is read or written.

use tokio::net::TcpListener;
use tracing::Instrument;

use crate::config::ReadinessConfig;
use crate::lifecycle::ShutdownSignal;
use crate::net::listener;
use crate::tcp::ServerError;

/// Runtime options for a [`ReadinessServer`].
#[derive(Debug, Clone)]
pub struct ReadinessOptions {
    /// Listen address, `host:port`.
    pub addr: String,
    pub tag: String,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:0".to_string(),
            tag: "readiness".to_string(),
        }
    }
}

impl ReadinessOptions {
    pub fn from_config(config: &ReadinessConfig) -> Self {
        Self {
            addr: config.bind_address.clone(),
            tag: config.tag.clone(),
        }
    }
}

/// Accept-and-close server for load balancer and orchestrator health checks.
#[derive(Debug, Clone)]
pub struct ReadinessServer {
    options: ReadinessOptions,
}

impl ReadinessServer {
    pub fn new(options: ReadinessOptions) -> Self {
        Self { options }
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn serve(&self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let listener = listener::bind(&self.options.addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve an already bound listener until `shutdown` fires.
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let span = tracing::info_span!("readiness", tag = %self.options.tag);
        accept_and_close(listener, shutdown).instrument(span).await
    }
}

async fn accept_and_close(listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), ServerError> {
    tracing::info!(address = %listener.local_addr()?, "Readiness server started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::trace!(peer = %peer, "Readiness check");
                    drop(stream);
                }
                Err(e) => {
                    if !listener::pause_after_accept_error(&e, &shutdown).await {
                        break;
                    }
                }
            },
        }
    }

    tracing::info!("Readiness server stopped");
    Ok(())
}
