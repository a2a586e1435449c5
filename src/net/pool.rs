//! Client-side connection pool.
//!
//! # Responsibilities
//! - Retain up to `capacity` idle connections for reuse
//! - Health-check a connection before handing it out
//! - Fall through to the factory when nothing healthy is idle
//!
//! Closing a connection means dropping it. `capacity` bounds idle retention
//! only; `get` never waits for a slot, so the number of connections checked
//! out at once is unbounded.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;

use crate::resilience::timeouts::{with_timeout_io, with_timeout_o, AsyncFn};

/// Pool construction failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("invalid pool config: {0}")]
    InvalidConfig(&'static str),
}

/// Pool configuration.
pub struct PoolConfig<C> {
    /// Connections created in the background at construction.
    pub init: usize,
    /// Maximum idle connections retained. Values below 1 become 1.
    pub capacity: usize,
    /// Creates a new connection.
    pub factory: Option<AsyncFn<(), C, io::Error>>,
    /// Checks a connection, handing it back when it is still usable.
    /// An error drops (closes) the connection.
    pub health_check: Option<AsyncFn<C, C, io::Error>>,
    /// Bound applied to every `factory` and `health_check` call. Zero disables it.
    pub call_timeout: Duration,
}

impl<C> Default for PoolConfig<C> {
    fn default() -> Self {
        Self {
            init: 0,
            capacity: 1,
            factory: None,
            health_check: None,
            call_timeout: Duration::ZERO,
        }
    }
}

impl<C> Clone for PoolConfig<C> {
    fn clone(&self) -> Self {
        Self {
            init: self.init,
            capacity: self.capacity,
            factory: self.factory.clone(),
            health_check: self.health_check.clone(),
            call_timeout: self.call_timeout,
        }
    }
}

/// A concurrency-safe connection pool. Cloning shares the pool.
pub struct ConnectionPool<C> {
    inner: Arc<PoolInner<C>>,
}

struct PoolInner<C> {
    free: ArrayQueue<C>,
    factory: AsyncFn<(), C, io::Error>,
    health_check: AsyncFn<C, C, io::Error>,
}

impl<C> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Send + 'static> ConnectionPool<C> {
    /// Create a pool. Returns immediately; `init` connections are created on
    /// a background task and construction failures are dropped silently.
    ///
    /// Must be called from within a Tokio runtime when `init > 0`.
    pub fn new(config: PoolConfig<C>) -> Result<Self, PoolError> {
        let capacity = config.capacity.max(1);
        if config.init > capacity {
            return Err(PoolError::InvalidConfig("init exceeds capacity"));
        }
        let factory = config
            .factory
            .ok_or(PoolError::InvalidConfig("factory is required"))?;
        let health_check = config
            .health_check
            .ok_or(PoolError::InvalidConfig("health_check is required"))?;

        let factory = with_timeout_o(config.call_timeout, factory);
        let health_check = with_timeout_io(config.call_timeout, health_check);

        let pool = Self {
            inner: Arc::new(PoolInner {
                free: ArrayQueue::new(capacity),
                factory,
                health_check,
            }),
        };

        if config.init > 0 {
            let prefill = pool.clone();
            let init = config.init;
            tokio::spawn(async move {
                for _ in 0..init {
                    match (prefill.inner.factory)(()).await {
                        Ok(conn) => prefill.put(Some(conn)),
                        Err(e) => tracing::debug!(error = %e, "Pool prefill connection failed"),
                    }
                }
            });
        }

        Ok(pool)
    }

    /// Get a healthy idle connection, or a new one from the factory.
    ///
    /// Unhealthy idle connections are closed and skipped. A connection built
    /// by the factory is returned without a health check.
    pub async fn get(&self) -> io::Result<C> {
        loop {
            let Some(conn) = self.inner.free.pop() else {
                return (self.inner.factory)(()).await;
            };

            match (self.inner.health_check)(conn).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping unhealthy pooled connection");
                }
            }
        }
    }

    /// Return a connection. `None` is ignored; a full pool closes the surplus.
    pub fn put(&self, conn: Option<C>) {
        let Some(conn) = conn else {
            return;
        };

        if let Err(surplus) = self.inner.free.push(conn) {
            tracing::trace!("Pool full, closing returned connection");
            drop(surplus);
        }
    }

    /// Close every idle connection. Checked-out connections are unaffected.
    pub fn close(&self) {
        let mut closed = 0;
        while let Some(conn) = self.inner.free.pop() {
            drop(conn);
            closed += 1;
        }
        tracing::debug!(closed, "Pool closed");
    }

    /// Number of idle connections.
    pub fn idle_len(&self) -> usize {
        self.inner.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.free.capacity()
    }
}
