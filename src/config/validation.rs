//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and backend addresses.
//! Every problem is reported, not just the first.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use axum::http::uri::PathAndQuery;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::load_balancer::Backend;
use crate::security::LimitConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no backends configured")]
    NoBackends,

    #[error("backend {index}: {reason}")]
    InvalidBackend { index: usize, reason: String },

    #[error("duplicate backend {0}")]
    DuplicateBackend(String),

    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("{field} is not a socket address: {value}")]
    InvalidAddress { field: String, value: String },

    #[error("client id must not be empty")]
    EmptyClientId,

    #[error("health_check.path must be an absolute request path: {value:?}")]
    InvalidHealthPath { value: String },
}

/// Parse a health probe path. It must start with `/` and be a valid
/// request target.
pub fn parse_health_path(value: &str) -> Option<PathAndQuery> {
    if !value.starts_with('/') {
        return None;
    }
    value.parse::<PathAndQuery>().ok()
}

/// Check a limit, naming it `field` in errors.
pub fn validate_limit(field: impl fmt::Display, limit: &LimitConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if limit.capacity == 0 {
        errors.push(ValidationError::Zero {
            field: format!("{}.capacity", field),
        });
    }
    if limit.rate_per_sec == 0 {
        errors.push(ValidationError::Zero {
            field: format!("{}.rate_per_sec", field),
        });
    }
    errors
}

/// Validate a whole configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }

    let mut seen = HashSet::new();
    for (index, backend) in config.backends.iter().enumerate() {
        match Backend::parse(&backend.url) {
            Ok(parsed) => {
                if !seen.insert(parsed.address().to_string()) {
                    errors.push(ValidationError::DuplicateBackend(parsed.address().to_string()));
                }
            }
            Err(e) => errors.push(ValidationError::InvalidBackend {
                index,
                reason: e.to_string(),
            }),
        }
    }

    if config.health_check.interval_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "health_check.interval_secs".into(),
        });
    }
    if config.health_check.timeout_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "health_check.timeout_secs".into(),
        });
    }
    if parse_health_path(&config.health_check.path).is_none() {
        errors.push(ValidationError::InvalidHealthPath {
            value: config.health_check.path.clone(),
        });
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "timeouts.connect_secs".into(),
        });
    }

    errors.extend(validate_limit("rate_limit.default", &config.rate_limit.default));
    for (client, limit) in &config.clients {
        if client.trim().is_empty() {
            errors.push(ValidationError::EmptyClientId);
        }
        errors.extend(validate_limit(format_args!("clients.{}", client), limit));
    }

    check_socket_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_socket_addr(
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

/// Settings that load fine but deserve an operator's attention.
pub fn config_warnings(config: &ProxyConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.admin.enabled && config.admin.api_key.is_none() {
        warnings.push(
            "admin API is enabled without an api_key; any client of the proxy can change rate limits"
                .to_string(),
        );
    }
    warnings
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}
