//! Listener binding.
//!
//! # Responsibilities
//! - Resolve the configured listen address
//! - Bind a TCP listener and report the bound address
//! - Hand out a std listener for servers driven by `axum-server`
//! - Pause accept loops after a failed accept

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::lifecycle::ShutdownSignal;

/// Pause after a failed accept, so persistent errors such as EMFILE do not
/// spin the accept loop.
pub const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(50);

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Address did not resolve to any socket address.
    InvalidAddress { addr: String, source: std::io::Error },
    /// Failed to bind to address.
    Bind { addr: String, source: std::io::Error },
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::InvalidAddress { addr, source } => {
                write!(f, "Invalid listen address {}: {}", addr, source)
            }
            ListenerError::Bind { addr, source } => write!(f, "Failed to bind {}: {}", addr, source),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::InvalidAddress { source, .. } | ListenerError::Bind { source, .. } => {
                Some(source)
            }
        }
    }
}

/// Resolve `addr` (`host:port`, port 0 picks a free port) and bind to the
/// first address that accepts.
pub async fn bind(addr: &str) -> Result<TcpListener, ListenerError> {
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host(addr)
        .await
        .map_err(|source| ListenerError::InvalidAddress {
            addr: addr.to_string(),
            source,
        })?
        .collect();

    let mut last_err = None;
    for candidate in candidates {
        match TcpListener::bind(candidate).await {
            Ok(listener) => {
                if let Ok(local) = listener.local_addr() {
                    tracing::info!(address = %local, "Listener bound");
                }
                return Ok(listener);
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(ListenerError::Bind {
        addr: addr.to_string(),
        source: last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no address resolved")
        }),
    })
}

/// Bind and convert to a non-blocking std listener.
pub async fn bind_std(addr: &str) -> Result<std::net::TcpListener, ListenerError> {
    let listener = bind(addr).await?;
    listener.into_std().map_err(|source| ListenerError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Log a failed accept and pause for [`ACCEPT_ERROR_DELAY`].
///
/// Returns `false` when shutdown fired during the pause.
pub async fn pause_after_accept_error(error: &std::io::Error, shutdown: &ShutdownSignal) -> bool {
    tracing::error!(error = %error, "Accept failed");
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_ERROR_DELAY) => true,
    }
}
