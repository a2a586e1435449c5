//! Secure connection-oriented server framework.
//!
//! TCP and TLS servers with admission control, idle timeouts, connection
//! identity and graceful shutdown; HTTP serving over TCP and Unix domain
//! sockets with the same admission control; plus the concurrency and
//! resilience primitives they are built from.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod sync;
pub mod tcp;

pub use config::schema::AppConfig;
pub use http::{HttpServer, UdsClient, UdsServer};
pub use lifecycle::{Shutdown, ShutdownSignal};
pub use sync::{KeyedSemaphore, Semaphore};
pub use tcp::{ConnContext, ServerError, ServerOptions, TcpServer};
