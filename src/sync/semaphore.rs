//! Counting semaphore used for admission control.
//!
//! Unlike a bare [`tokio::sync::Semaphore`], permits are not tied to a guard
//! value: `acquire` and `release` may happen on different handles or tasks,
//! and releasing with nothing held is a no-op rather than a capacity leak.
//! [`OwnedPermit`] restores RAII release for callers that want it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::lifecycle::ShutdownSignal;

/// Capacity used when a non-positive one is requested.
pub const DEFAULT_CAPACITY: usize = 1;

/// Returned when an acquire is abandoned because shutdown was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("acquire cancelled by shutdown")]
pub struct AcquireCancelled;

/// A bounded permit pool.
#[derive(Debug)]
pub struct Semaphore {
    permits: tokio::sync::Semaphore,
    capacity: usize,
    /// Outstanding permits. Only ever decremented when positive.
    held: AtomicUsize,
}

impl Semaphore {
    /// Create a semaphore. A capacity below 1 is raised to [`DEFAULT_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(DEFAULT_CAPACITY);
        Self {
            permits: tokio::sync::Semaphore::new(capacity),
            capacity,
            held: AtomicUsize::new(0),
        }
    }

    /// Acquire a permit, waiting until one is free or `shutdown` fires.
    ///
    /// When both happen together exactly one outcome is reported: a permit
    /// is either handed to the caller or never taken.
    pub async fn acquire(&self, shutdown: &ShutdownSignal) -> Result<(), AcquireCancelled> {
        tokio::select! {
            permit = self.permits.acquire() => {
                permit.map_err(|_| AcquireCancelled)?.forget();
                self.held.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            _ = shutdown.cancelled() => Err(AcquireCancelled),
        }
    }

    /// Acquire a permit that is released when the returned guard drops.
    pub async fn acquire_owned(
        self: Arc<Self>,
        shutdown: &ShutdownSignal,
    ) -> Result<OwnedPermit, AcquireCancelled> {
        self.acquire(shutdown).await?;
        Ok(OwnedPermit { sem: self })
    }

    /// Take a permit if one is free. Never blocks.
    pub fn try_acquire(&self) -> bool {
        match self.permits.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.held.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(_) => false,
        }
    }

    /// Return a permit. Does nothing when no permit is held.
    pub fn release(&self) {
        let released = self
            .held
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |held| held.checked_sub(1))
            .is_ok();
        if released {
            self.permits.add_permits(1);
        }
    }

    /// Number of free permits at the time of the call.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A held permit that goes back to its [`Semaphore`] on drop.
#[derive(Debug)]
pub struct OwnedPermit {
    sem: Arc<Semaphore>,
}

impl Drop for OwnedPermit {
    fn drop(&mut self) {
        self.sem.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use std::time::Duration;

    const CAP: usize = 3;

    #[tokio::test]
    async fn acquire_up_to_capacity() {
        let shutdown = Shutdown::new();
        let signal = shutdown.subscribe();
        let sem = Semaphore::new(CAP);

        for i in 0..CAP {
            sem.acquire(&signal).await.unwrap();
            assert_eq!(sem.available(), CAP - i - 1);
        }
        assert!(!sem.try_acquire());

        sem.release();
        assert_eq!(sem.available(), 1);
        sem.acquire(&signal).await.unwrap();
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn capacity_below_one_is_raised() {
        let sem = Semaphore::new(0);
        assert_eq!(sem.capacity(), DEFAULT_CAPACITY);
        assert_eq!(sem.available(), DEFAULT_CAPACITY);
    }

    #[test]
    fn release_without_acquire_is_noop() {
        let sem = Semaphore::new(CAP);
        for _ in 0..CAP * 2 {
            sem.release();
        }
        assert_eq!(sem.available(), CAP);

        assert!(sem.try_acquire());
        sem.release();
        sem.release();
        assert_eq!(sem.available(), CAP);
    }

    #[tokio::test]
    async fn acquire_aborts_on_shutdown() {
        let shutdown = Shutdown::new();
        let signal = shutdown.subscribe();
        let sem = Arc::new(Semaphore::new(1));
        assert!(sem.try_acquire());

        let waiter = {
            let sem = Arc::clone(&sem);
            tokio::spawn(async move { sem.acquire(&signal).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.trigger();

        let res = tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("waiter should return")
            .unwrap();
        assert_eq!(res, Err(AcquireCancelled));
        // The aborted waiter must not have taken the permit.
        sem.release();
        assert_eq!(sem.available(), 1);
    }

    #[tokio::test]
    async fn owned_permit_releases_on_drop() {
        let shutdown = Shutdown::new();
        let signal = shutdown.subscribe();
        let sem = Arc::new(Semaphore::new(2));

        let permit = Arc::clone(&sem).acquire_owned(&signal).await.unwrap();
        assert_eq!(sem.available(), 1);
        drop(permit);
        assert_eq!(sem.available(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn held_never_exceeds_capacity() {
        let shutdown = Shutdown::new();
        let sem = Arc::new(Semaphore::new(CAP));
        let inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..32 {
            let sem = Arc::clone(&sem);
            let inside = Arc::clone(&inside);
            let signal = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    if i % 2 == 0 {
                        sem.acquire(&signal).await.unwrap();
                    } else if !sem.try_acquire() {
                        tokio::task::yield_now().await;
                        continue;
                    }
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    assert!(now <= CAP);
                    tokio::task::yield_now().await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    sem.release();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(sem.available(), CAP);

        // Once everything is back, extra releases change nothing.
        sem.release();
        assert_eq!(sem.available(), CAP);
    }
}
