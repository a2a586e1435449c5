//! Configuration schema definitions.
//!
//! This module defines the configuration structure for the servers and the
//! host binary. All types derive Serde traits for deserialization from config
//! files. Durations are plain milliseconds; zero disables the corresponding
//! timeout.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::BackoffConfig;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Raw TCP server.
    pub tcp: TcpServerConfig,

    /// Optional HTTP status server over TCP.
    pub http: Option<HttpServerConfig>,

    /// Optional HTTP status server over a Unix domain socket.
    pub uds: Option<UdsServerConfig>,

    /// Optional TCP readiness endpoint (accept and close).
    pub readiness: Option<ReadinessConfig>,

    /// Backoff used when the host re-runs a failed server.
    pub retry: BackoffConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// TCP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TcpServerConfig {
    /// Bind address (e.g., "0.0.0.0:7000").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum connections served at once. 0 means unlimited.
    pub limit: usize,

    /// Maximum connections served at once per client IP. 0 means unlimited.
    pub per_client_limit: usize,

    /// Soft ceiling on tracked client IPs before idle entries are reclaimed.
    pub per_client_size_hint: usize,

    /// Close a connection after this long without a successful read.
    pub idle_timeout_ms: u64,

    /// Abandon a TLS handshake after this long.
    pub tls_handshake_timeout_ms: u64,

    /// How long shutdown waits for in-flight connections.
    pub shutdown_timeout_ms: u64,

    /// Hand each connection handler its connection id.
    pub ctx_conn_id: bool,

    /// Hand each connection handler its TLS peer identity.
    pub ctx_tls_peer: bool,

    /// Tag attached to log events.
    pub tag: String,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7000".to_string(),
            tls: None,
            limit: 0,
            per_client_limit: 0,
            per_client_size_hint: 1024,
            idle_timeout_ms: 0,
            tls_handshake_timeout_ms: 10_000,
            shutdown_timeout_ms: 30_000,
            ctx_conn_id: false,
            ctx_tls_peer: false,
            tag: "tcp".to_string(),
        }
    }
}

impl TcpServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn tls_handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.tls_handshake_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// TLS configuration for a listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,

    /// Whether and how clients must present a certificate.
    #[serde(default)]
    pub client_auth: ClientAuthMode,

    /// CA bundle used to verify client certificates (PEM).
    #[serde(default)]
    pub client_ca_path: Option<PathBuf>,
}

/// Client certificate policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMode {
    /// Never request a client certificate.
    #[default]
    None,
    /// Verify a client certificate when one is presented.
    Optional,
    /// Require and verify a client certificate.
    Required,
}

/// HTTP-over-TCP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpServerConfig {
    /// Bind address (e.g., "0.0.0.0:7080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum requests served at once. 0 means unlimited.
    pub limit: usize,

    /// How long shutdown waits for in-flight requests.
    pub shutdown_timeout_ms: u64,

    /// Tag attached to log events.
    pub tag: String,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7080".to_string(),
            tls: None,
            limit: 0,
            shutdown_timeout_ms: 30_000,
            tag: "http".to_string(),
        }
    }
}

impl HttpServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// HTTP-over-UDS server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UdsServerConfig {
    /// Socket file path.
    pub path: PathBuf,

    /// Permission bits applied to the socket file (e.g., 0o660).
    pub mode: Option<u32>,

    /// Maximum requests served at once. 0 means unlimited.
    pub limit: usize,

    /// How long shutdown waits for in-flight requests.
    pub shutdown_timeout_ms: u64,

    /// Tag attached to log events.
    pub tag: String,
}

impl Default for UdsServerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/secure-net.sock"),
            mode: Some(0o660),
            limit: 0,
            shutdown_timeout_ms: 30_000,
            tag: "uds".to_string(),
        }
    }
}

impl UdsServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// TCP readiness endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Bind address (e.g., "0.0.0.0:7001").
    pub bind_address: String,

    /// Tag attached to log events.
    pub tag: String,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7001".to_string(),
            tag: "readiness".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
