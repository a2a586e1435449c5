//! Guarded execution: re-run a function with backoff until it succeeds or
//! shutdown is triggered.
//!
//! Servers never restart themselves; a host wraps `serve` in [`with_guard`]
//! when it wants bind failures and similar fatal errors retried.

use std::fmt::Display;
use std::future::Future;

use tracing::Instrument;

use crate::lifecycle::ShutdownSignal;
use crate::resilience::backoff::{Backoff, BackoffConfig};

/// Guard configuration.
#[derive(Debug, Clone, Default)]
pub struct GuardConfig {
    /// Tag attached to log events.
    pub tag: String,
    /// Delay policy between runs.
    pub backoff: BackoffConfig,
    /// Keep re-running even after a successful run.
    pub retry_on_success: bool,
}

/// Run `f` until it returns `Ok` (or forever with `retry_on_success`),
/// stopping as soon as `shutdown` fires.
///
/// `f` receives the shutdown signal and should return promptly once it fires.
pub async fn with_guard<F, Fut, E>(shutdown: ShutdownSignal, config: GuardConfig, mut f: F)
where
    F: FnMut(ShutdownSignal) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let span = tracing::info_span!("guard", tag = %config.tag);
    async move {
        tracing::info!("Starting");
        let mut backoff = Backoff::new(config.backoff);

        loop {
            if shutdown.is_cancelled() {
                tracing::info!("Received exit signal, exiting");
                return;
            }

            let res = f(shutdown.clone()).await;
            match res {
                Ok(()) if !config.retry_on_success => {
                    tracing::info!("Completed");
                    return;
                }
                Err(_) if shutdown.is_cancelled() => {
                    tracing::info!("Received exit signal, exiting");
                    return;
                }
                _ => {}
            }

            let delay = backoff.next_delay();
            match res {
                Err(e) => tracing::warn!(delay = ?delay, error = %e, "Re-running after error"),
                Ok(()) => tracing::warn!(delay = ?delay, "Re-running"),
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => {
                    tracing::info!("Received exit signal, exiting");
                    return;
                }
            }
        }
    }
    .instrument(span)
    .await
}
