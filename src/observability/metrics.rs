//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (connections, handshakes, handler outcomes)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `server_connections_accepted_total` (counter): accepted connections by tag
//! - `server_active_connections` (gauge): connections currently being served
//! - `server_tls_handshake_failures_total` (counter): failed handshakes by tag
//! - `server_handler_outcomes_total` (counter): handler results by tag, outcome
//! - `server_admission_cancelled_total` (counter): waits for a permit aborted by shutdown
//!
//! # Design Decisions
//! - Low-overhead metric updates; with no recorder installed they are no-ops
//! - Labels carry the server tag

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// How a connection handler finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Ok,
    IdleTimeout,
    Error,
}

impl HandlerOutcome {
    fn as_str(self) -> &'static str {
        match self {
            HandlerOutcome::Ok => "ok",
            HandlerOutcome::IdleTimeout => "idle_timeout",
            HandlerOutcome::Error => "error",
        }
    }
}

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection_accepted(tag: &str) {
    metrics::counter!("server_connections_accepted_total", "tag" => tag.to_string()).increment(1);
}

pub fn record_connection_opened(tag: &str) {
    metrics::gauge!("server_active_connections", "tag" => tag.to_string()).increment(1.0);
}

pub fn record_connection_closed(tag: &str) {
    metrics::gauge!("server_active_connections", "tag" => tag.to_string()).decrement(1.0);
}

pub fn record_tls_handshake_failure(tag: &str) {
    metrics::counter!("server_tls_handshake_failures_total", "tag" => tag.to_string())
        .increment(1);
}

pub fn record_handler_outcome(tag: &str, outcome: HandlerOutcome) {
    metrics::counter!(
        "server_handler_outcomes_total",
        "tag" => tag.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_admission_cancelled(tag: &str) {
    metrics::counter!("server_admission_cancelled_total", "tag" => tag.to_string()).increment(1);
}
