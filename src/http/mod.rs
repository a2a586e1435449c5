//! HTTP serving over TCP and Unix domain sockets.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection (axum-server)      UDS connection (axum::serve)
//!     → server.rs                           → uds.rs
//!              ↘                           ↙
//!               limit.rs (admission permit, 503 on shutdown)
//!               → TraceLayer
//!               → caller's Router
//! ```
//!
//! # Design Decisions
//! - The caller owns routing; these servers only add admission, tracing and
//!   lifecycle
//! - A permit is held until the router returns its response
//! - Shutdown drains in-flight requests, bounded by `shutdown_timeout`

pub mod limit;
pub mod server;
pub mod uds;

pub use limit::{apply_limit, LimitState};
pub use server::{HttpOptions, HttpServer};
pub use uds::{UdsClient, UdsClientError, UdsOptions, UdsServer};
