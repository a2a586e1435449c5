//! Admission-control primitives.
//!
//! # Data Flow
//! ```text
//! Server (per connection / per request):
//!     → Semaphore::acquire (wait for a permit or shutdown)
//!     → handler runs
//!     → OwnedPermit dropped → permit back to the pool
//!
//! Per-key caps (keyed.rs):
//!     key → KeyedSemaphore::get → Semaphore (created on demand)
//! ```
//!
//! # Design Decisions
//! - Permits are plain counts, release is decoupled from acquire
//! - Release on an empty semaphore is a no-op, never a capacity leak
//! - Keyed semaphores reclaim idle keys once a soft size hint is reached

pub mod keyed;
pub mod semaphore;

pub use keyed::KeyedSemaphore;
pub use semaphore::{AcquireCancelled, OwnedPermit, Semaphore};
