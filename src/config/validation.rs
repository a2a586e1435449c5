//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and required paths
//! - Check that TLS client auth has a CA to verify against
//! - Validate backoff ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{AppConfig, ClientAuthMode, TlsConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "tcp.bind_address", &config.tcp.bind_address);
    if let Some(tls) = &config.tcp.tls {
        check_tls(&mut errors, "tcp.tls", tls);
    }
    if config.tcp.ctx_tls_peer && config.tcp.tls.is_none() {
        errors.push(ValidationError::new(
            "tcp.ctx_tls_peer",
            "requires tcp.tls to be configured",
        ));
    }

    if let Some(http) = &config.http {
        check_address(&mut errors, "http.bind_address", &http.bind_address);
        if let Some(tls) = &http.tls {
            check_tls(&mut errors, "http.tls", tls);
        }
    }

    if let Some(readiness) = &config.readiness {
        check_address(&mut errors, "readiness.bind_address", &readiness.bind_address);
    }

    if let Some(uds) = &config.uds {
        if uds.path.as_os_str().is_empty() {
            errors.push(ValidationError::new("uds.path", "must not be empty"));
        }
        if let Some(mode) = uds.mode {
            if mode > 0o777 {
                errors.push(ValidationError::new(
                    "uds.mode",
                    format!("{:#o} is not a permission mask", mode),
                ));
            }
        }
    }

    let retry = &config.retry;
    if retry.min_ms > retry.max_ms {
        errors.push(ValidationError::new(
            "retry.min_ms",
            format!("{} exceeds retry.max_ms ({})", retry.min_ms, retry.max_ms),
        ));
    }
    if retry.unit_ms == 0 {
        errors.push(ValidationError::new("retry.unit_ms", "must be positive"));
    }

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, addr: &str) {
    if addr.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{}' is not a socket address", addr),
        ));
    }
}

fn check_tls(errors: &mut Vec<ValidationError>, field: &str, tls: &TlsConfig) {
    if tls.cert_path.as_os_str().is_empty() {
        errors.push(ValidationError::new(format!("{}.cert_path", field), "must not be empty"));
    }
    if tls.key_path.as_os_str().is_empty() {
        errors.push(ValidationError::new(format!("{}.key_path", field), "must not be empty"));
    }
    if tls.client_auth != ClientAuthMode::None && tls.client_ca_path.is_none() {
        errors.push(ValidationError::new(
            format!("{}.client_ca_path", field),
            format!("required when client_auth = {:?}", tls.client_auth),
        ));
    }
}
