//! Admission control middleware for HTTP servers.
//!
//! A request waits for a limiter permit before reaching the router and holds
//! it until the router has produced its response. When shutdown fires while
//! the request is still waiting the router is never invoked, and the request
//! is not aborted silently: it is answered `503 Service Unavailable` with an
//! empty body.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::lifecycle::ShutdownSignal;
use crate::sync::Semaphore;

/// State shared by every request passing through the limit middleware.
#[derive(Debug, Clone)]
pub struct LimitState {
    limiter: Arc<Semaphore>,
    shutdown: ShutdownSignal,
}

impl LimitState {
    pub fn new(limiter: Arc<Semaphore>, shutdown: ShutdownSignal) -> Self {
        Self { limiter, shutdown }
    }
}

pub async fn limit_middleware(
    State(state): State<LimitState>,
    req: Request,
    next: Next,
) -> Response {
    let permit = match Arc::clone(&state.limiter).acquire_owned(&state.shutdown).await {
        Ok(permit) => permit,
        Err(_) => {
            tracing::debug!(uri = %req.uri(), "Request rejected while waiting for admission");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let response = next.run(req).await;
    drop(permit);
    response
}

/// Wrap `router` with the limit middleware when a limiter is configured.
pub fn apply_limit(
    router: Router,
    limiter: Option<Arc<Semaphore>>,
    shutdown: ShutdownSignal,
) -> Router {
    match limiter {
        None => router,
        Some(limiter) => router.layer(middleware::from_fn_with_state(
            LimitState::new(limiter, shutdown),
            limit_middleware,
        )),
    }
}
