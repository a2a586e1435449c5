//! Per-connection context handed to connection handlers.

use std::collections::BTreeSet;
use std::net::SocketAddr;

use crate::lifecycle::ShutdownSignal;
use crate::net::ConnectionId;

/// Identity of a TLS peer: the CommonName and DNS SANs of its certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity(BTreeSet<String>);

impl PeerIdentity {
    pub fn new(names: BTreeSet<String>) -> Self {
        Self(names)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn names(&self) -> &BTreeSet<String> {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn into_names(self) -> BTreeSet<String> {
        self.0
    }
}

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.iter().collect();
        write!(f, "{}", names.join(","))
    }
}

/// What a handler knows about the connection it serves.
///
/// `conn_id` and `tls_peer` are only present when the server was configured
/// to inject them (and, for `tls_peer`, when the client presented a
/// certificate carrying a name).
#[derive(Debug, Clone)]
pub struct ConnContext {
    shutdown: ShutdownSignal,
    peer_addr: SocketAddr,
    conn_id: Option<ConnectionId>,
    tls_peer: Option<PeerIdentity>,
}

impl ConnContext {
    pub fn new(
        shutdown: ShutdownSignal,
        peer_addr: SocketAddr,
        conn_id: Option<ConnectionId>,
        tls_peer: Option<PeerIdentity>,
    ) -> Self {
        Self {
            shutdown,
            peer_addr,
            conn_id,
            tls_peer,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn conn_id(&self) -> Option<ConnectionId> {
        self.conn_id
    }

    pub fn tls_peer(&self) -> Option<&PeerIdentity> {
        self.tls_peer.as_ref()
    }

    /// The server's shutdown signal.
    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Resolves once the server is shutting down. Handlers should return
    /// promptly after this fires.
    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
