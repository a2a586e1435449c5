//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call (pool factory / health check):
//!     → timeouts.rs (abandon the call after a deadline)
//!
//! Fatal server error (bind failure):
//!     → guard.rs (re-run serve)
//!     → backoff.rs (delay between runs)
//! ```
//!
//! # Design Decisions
//! - One timeout combinator over a single canonical function shape
//! - Timeout errors are distinct from other errors
//! - Retry is the host's choice; servers never restart themselves

pub mod backoff;
pub mod guard;
pub mod timeouts;

pub use backoff::{Backoff, BackoffConfig, Strategy};
pub use guard::{with_guard, GuardConfig};
pub use timeouts::{run_with_timeout, AsyncFn, TimedOut};
