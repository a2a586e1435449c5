//! Raw TCP/TLS connection server.
//!
//! # Data Flow
//! ```text
//! listener.accept()
//!     → ConnectionId, tracked task, `conn` span
//!     → idle wrap (idle_timeout > 0)
//!     → TLS handshake (tls configured; bounded by tls_handshake_timeout)
//!     → identity injection (ctx_conn_id / ctx_tls_peer) into ConnContext
//!     → admission (limiter permit; abandoned on shutdown)
//!     → handler(ctx, conn)
//!     → conn closed, permit released
//!
//! Shutdown:
//!     stop accepting → close listener → wait for tracked tasks (bounded)
//!
//! Readiness:
//!     listener.accept() → close (no data either way)
//! ```
//!
//! # Design Decisions
//! - Per-connection metadata is an explicit `ConnContext` value
//! - Admission is acquired after the TLS handshake
//! - A failing connection is logged and isolated; only bind errors and the
//!   shutdown timeout reach the caller

pub mod context;
pub mod readiness;
pub mod server;

pub use context::{ConnContext, PeerIdentity};
pub use readiness::{ReadinessOptions, ReadinessServer};
pub use server::{ConnHandler, ServerError, ServerOptions, TcpServer};
