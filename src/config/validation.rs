//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check cross-field rules (namespace subjects need a lookup subject)
//! - Validate value ranges (timeouts > 0, ports valid, paths absolute)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;
use crate::http::server::HEALTH_PATH;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic rule and collect all violations.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match config.listener.bind_address.parse::<SocketAddr>() {
        Ok(addr) if addr.port() == 0 || addr.port() >= 65000 => errors.push(ValidationError::new(
            "listener.bind_address",
            format!("port {} must be between 1 and 64999", addr.port()),
        )),
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address: {}", config.listener.bind_address, e),
        )),
    }

    if config.backbone.uri.trim().is_empty() {
        errors.push(ValidationError::new("backbone.uri", "must not be empty"));
    }
    if config.backbone.request_timeout_secs == 0 {
        errors.push(ValidationError::new("backbone.request_timeout_secs", "must be greater than 0"));
    }
    if config.backbone.pass.is_some() && config.backbone.user.is_none() {
        errors.push(ValidationError::new("backbone.user", "required when a password is set"));
    }

    if !config.http.path.starts_with('/') {
        errors.push(ValidationError::new("http.path", "must start with '/'"));
    }
    if config.http.request_timeout_secs == 0 {
        errors.push(ValidationError::new("http.request_timeout_secs", "must be greater than 0"));
    }
    if config.http.max_body_size == 0 {
        errors.push(ValidationError::new("http.max_body_size", "must be greater than 0"));
    }

    if !config.websocket.path.starts_with('/') {
        errors.push(ValidationError::new("websocket.path", "must start with '/'"));
    }

    for (field, path) in [("http.path", &config.http.path), ("websocket.path", &config.websocket.path)] {
        if path == HEALTH_PATH {
            errors.push(ValidationError::new(field, format!("'{}' is reserved", HEALTH_PATH)));
        }
    }

    let auth = &config.auth;
    if auth.subjects.iter().any(|s| s.trim().is_empty()) {
        errors.push(ValidationError::new("auth.subjects", "must not contain empty subjects"));
    }
    if auth.non_authorized_subjects.iter().any(|s| s.trim().is_empty()) {
        errors.push(ValidationError::new(
            "auth.non_authorized_subjects",
            "must not contain empty subjects",
        ));
    }
    if auth.namespace_subjects.iter().any(|s| s.trim().is_empty()) {
        errors.push(ValidationError::new(
            "auth.namespace_subjects",
            "must not contain empty subjects",
        ));
    }
    let has_lookup = auth
        .namespace_subject
        .as_deref()
        .is_some_and(|s| !s.trim().is_empty());
    if !auth.namespace_subjects.is_empty() && !has_lookup {
        errors.push(ValidationError::new(
            "auth.namespace_subject",
            "required when namespace_subjects is set",
        ));
    }

    if config.cors.origins.iter().any(|o| o.trim().is_empty()) {
        errors.push(ValidationError::new("cors.origins", "must not contain empty origins"));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("'{}' is not one of {}", config.observability.log_level, LOG_LEVELS.join(", ")),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn test_namespace_subjects_need_lookup_subject() {
        let mut config = GatewayConfig::default();
        config.auth.namespace_subjects = vec!["orders".to_string()];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "auth.namespace_subject");

        config.auth.namespace_subject = Some("tenant.lookup".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "0.0.0.0:70000".to_string();
        config.backbone.request_timeout_secs = 0;
        config.http.path = "port".to_string();
        config.observability.log_level = "loud".to_string();

        let fields: Vec<_> = validate_config(&config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "backbone.request_timeout_secs",
                "http.path",
                "observability.log_level"
            ]
        );
    }

    #[test]
    fn test_health_path_is_reserved() {
        let mut config = GatewayConfig::default();
        config.websocket.path = "/health".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "websocket.path");
    }

    #[test]
    fn test_port_range() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "127.0.0.1:65001".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors[0].message.contains("between 1 and 64999"));
    }
}
