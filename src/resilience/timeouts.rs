//! Timeout enforcement.
//!
//! A timeout decorator abandons a call that does not finish within a duration.
//! Every async function is treated as one canonical shape, `I -> Result<O, E>`
//! ([`AsyncFn`]); functions without input use `I = ()` and functions without
//! output use `O = ()`, so a single combinator ([`with_timeout_io`]) serves all
//! four arities. Abandoning means dropping the in-flight future.
//!
//! A zero duration disables the timeout everywhere in this module.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

/// A call was abandoned because it exceeded its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timeout")]
pub struct TimedOut;

impl From<TimedOut> for io::Error {
    fn from(e: TimedOut) -> Self {
        io::Error::new(io::ErrorKind::TimedOut, e)
    }
}

/// Shared async function value of the canonical shape.
pub type AsyncFn<I, O, E> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O, E>> + Send + Sync>;

/// Box a closure into an [`AsyncFn`].
pub fn async_fn<I, O, E, F, Fut>(f: F) -> AsyncFn<I, O, E>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, E>> + Send + 'static,
{
    Arc::new(move |input| -> BoxFuture<'static, Result<O, E>> { Box::pin(f(input)) })
}

/// Timeout decorator for functions with input and output, `I -> Result<O, E>`.
pub fn with_timeout_io<I, O, E>(timeout: Duration, f: AsyncFn<I, O, E>) -> AsyncFn<I, O, E>
where
    I: Send + 'static,
    O: Send + 'static,
    E: From<TimedOut> + Send + 'static,
{
    if timeout.is_zero() {
        return f;
    }

    Arc::new(move |input| -> BoxFuture<'static, Result<O, E>> {
        let call = f(input);
        Box::pin(async move {
            match tokio::time::timeout(timeout, call).await {
                Ok(res) => res,
                Err(_) => Err(E::from(TimedOut)),
            }
        })
    })
}

/// Timeout decorator for functions with input only, `I -> Result<(), E>`.
pub fn with_timeout_i<I, E>(timeout: Duration, f: AsyncFn<I, (), E>) -> AsyncFn<I, (), E>
where
    I: Send + 'static,
    E: From<TimedOut> + Send + 'static,
{
    with_timeout_io(timeout, f)
}

/// Timeout decorator for functions with output only, `() -> Result<O, E>`.
pub fn with_timeout_o<O, E>(timeout: Duration, f: AsyncFn<(), O, E>) -> AsyncFn<(), O, E>
where
    O: Send + 'static,
    E: From<TimedOut> + Send + 'static,
{
    with_timeout_io(timeout, f)
}

/// Timeout decorator for functions with neither input nor output.
pub fn with_timeout<E>(timeout: Duration, f: AsyncFn<(), (), E>) -> AsyncFn<(), (), E>
where
    E: From<TimedOut> + Send + 'static,
{
    with_timeout_io(timeout, f)
}

/// Run a single future under `timeout`.
pub async fn run_with_timeout<F>(timeout: Duration, fut: F) -> Result<F::Output, TimedOut>
where
    F: Future,
{
    if timeout.is_zero() {
        return Ok(fut.await);
    }
    tokio::time::timeout(timeout, fut).await.map_err(|_| TimedOut)
}
