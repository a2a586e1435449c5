//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, accept)
//!     → idle.rs (optional rolling read deadline)
//!     → tls.rs (optional handshake, peer identity)
//!     → connection.rs (id, in-flight tracking)
//!     → Hand off to the connection handler
//!
//! Outgoing connections:
//!     pool.rs (reuse idle connections, health-check before handing out)
//! ```
//!
//! # Design Decisions
//! - Decorated streams are type-erased into `BoxStream` before reaching handlers
//! - Each connection tracked for graceful shutdown
//! - TLS is optional and handled transparently

pub mod connection;
pub mod idle;
pub mod listener;
pub mod pool;
pub mod tls;

pub use connection::{AsyncStream, BoxStream, ConnectionGuard, ConnectionId, ConnectionTracker};
pub use idle::{is_idle_timeout, wrap_idle, IdleTimeout, IdleTimeoutStream};
pub use listener::ListenerError;
pub use pool::{ConnectionPool, PoolConfig, PoolError};
pub use tls::{HandshakeError, TlsError};
