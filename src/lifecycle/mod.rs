//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → every ShutdownSignal resolves
//!             → accept loops stop, listeners close
//!             → pending admission waits abort
//!             → handlers observe ConnContext::cancelled
//!             → servers drain in-flight work (bounded)
//! ```
//!
//! # Design Decisions
//! - One coordinator per server tree, never a process-wide singleton
//! - Level-triggered: late subscribers still see a past trigger
//! - Servers bound the drain, they never kill handlers

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
