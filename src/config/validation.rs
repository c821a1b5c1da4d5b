//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (upload size > 0, connection limit > 0)
//! - Validate enumerations (protocols, log format)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: Config → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::Config;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

fn check_protocol(field: &str, protocol: &str, errors: &mut Vec<ValidationError>) {
    if protocol != "http" && protocol != "https" {
        errors.push(ValidationError::new(
            field,
            format!("must be \"http\" or \"https\", got {protocol:?}"),
        ));
    }
}

pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.host.trim().is_empty() {
        errors.push(ValidationError::new("server.host", "must not be empty"));
    }
    check_protocol("server.protocol", &config.server.protocol, &mut errors);
    let size = config.server.max_upload_size;
    if size.is_nan() || size <= 0.0 {
        errors.push(ValidationError::new("server.max_upload_size", "must be greater than 0"));
    }
    if config.server.max_connections == 0 {
        errors.push(ValidationError::new("server.max_connections", "must be greater than 0"));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be greater than 0"));
    }

    if let Some(proxy) = &config.server.proxy {
        check_protocol("server.proxy.protocol", &proxy.protocol, &mut errors);
        if proxy.host.trim().is_empty() {
            errors.push(ValidationError::new("server.proxy.host", "must not be empty"));
        }
        if !proxy.base.is_empty() && !proxy.base.starts_with('/') {
            errors.push(ValidationError::new("server.proxy.base", "must start with '/'"));
        }
    }

    if config.app.default_language.trim().is_empty() {
        errors.push(ValidationError::new("app.default_language", "must not be empty"));
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            "must be \"pretty\" or \"json\"",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
